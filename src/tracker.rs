//! Server-side nonce replay tracking.
//!
//! Shared by every in-flight request. All operations go through `DashMap`, which
//! locks per shard, so operations on one nonce are atomic and never block the map.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Error, Result};

/// Last accepted usage of a nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceRecord {
    pub nonce: String,
    pub count: u32,
    pub created: DateTime<Utc>,
}

/// How a repeated nonce count is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayPolicy {
    /// Reject only an exact repeat of the count stored on first sight.
    /// The stored count is never advanced.
    #[default]
    FirstSeen,
    /// Require each count to exceed the last accepted one, and advance it.
    Monotonic,
}

/// Result of checking a presented nonce count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceUse {
    /// Nonce was not tracked yet and is now recorded
    First,
    /// Nonce was tracked and the count is acceptable
    Accepted,
    Replayed,
}

/// Sweep timing and staleness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    /// Records older than this are evicted by the sweep
    pub stale_after_secs: u64,
    /// Delay before the first sweep
    pub first_sweep_after_secs: u64,
    /// Cadence of subsequent sweeps
    pub sweep_interval_secs: u64,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        TrackerOptions {
            stale_after_secs: 5 * 60,
            first_sweep_after_secs: 15 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl TrackerOptions {
    /// # Errors
    /// `Error::Configuration` if `stale_after_secs` does not fit a `chrono::Duration`
    pub fn stale_after(&self) -> Result<Duration> {
        i64::try_from(self.stale_after_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                Error::Configuration(format!("stale_after_secs out of range: {}", self.stale_after_secs))
            })
    }

    fn schedule(&self) -> Result<(tokio::time::Instant, StdDuration)> {
        let first = StdDuration::from_secs(self.first_sweep_after_secs);
        let period = StdDuration::from_secs(self.sweep_interval_secs.max(1));
        let start = tokio::time::Instant::now()
            .checked_add(first)
            .filter(|start| start.checked_add(period).is_some())
            .ok_or_else(|| Error::Configuration("sweep schedule out of range".into()))?;
        Ok((start, period))
    }

    /// Check every setting can be turned into a timer without overflow
    pub fn validate(&self) -> Result<()> {
        self.stale_after()?;
        self.schedule()?;
        Ok(())
    }
}

/// Concurrent nonce → [`NonceRecord`] store.
///
/// Cloning is cheap and every clone shares the same records.
#[derive(Debug, Clone, Default)]
pub struct NonceTracker {
    records: Arc<DashMap<String, NonceRecord>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_get_entry(&self, nonce: &str) -> Option<NonceRecord> {
        self.records.get(nonce).map(|r| r.value().clone())
    }

    /// Insert a record unless the nonce already has one
    pub fn try_add_entry(&self, nonce: &str, count: u32) -> bool {
        self.try_add_entry_at(nonce, count, Utc::now())
    }

    pub fn try_add_entry_at(&self, nonce: &str, count: u32, created: DateTime<Utc>) -> bool {
        match self.records.entry(nonce.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(NonceRecord {
                    nonce: nonce.to_string(),
                    count,
                    created,
                });
                true
            }
        }
    }

    pub fn try_remove_entry(&self, nonce: &str) -> bool {
        self.records.remove(nonce).is_some()
    }

    /// Record a use of `nonce` with count `nc` and judge it under `policy`.
    ///
    /// The whole check-and-update runs under the entry's shard lock.
    pub fn register_use(&self, nonce: &str, nc: u32, policy: ReplayPolicy) -> NonceUse {
        match self.records.entry(nonce.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(NonceRecord {
                    nonce: nonce.to_string(),
                    count: nc,
                    created: Utc::now(),
                });
                NonceUse::First
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                match policy {
                    ReplayPolicy::FirstSeen if nc == record.count => NonceUse::Replayed,
                    ReplayPolicy::FirstSeen => NonceUse::Accepted,
                    ReplayPolicy::Monotonic if nc <= record.count => NonceUse::Replayed,
                    ReplayPolicy::Monotonic => {
                        record.count = nc;
                        NonceUse::Accepted
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Evict records created more than `stale_after` ago. Returns how many went.
    pub fn sweep(&self, stale_after: Duration) -> usize {
        self.sweep_at(Utc::now(), stale_after)
    }

    pub fn sweep_at(&self, now: DateTime<Utc>, stale_after: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now - record.created <= stale_after);
        let removed = before.saturating_sub(self.records.len());
        debug!(removed, remaining = self.records.len(), "nonce sweep");
        removed
    }

    /// Run [`sweep`](#method.sweep) on a timer until the returned handle is stopped or dropped.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `Error::Configuration` if `options` cannot be scheduled
    pub fn spawn_sweeper(&self, options: &TrackerOptions) -> Result<SweeperHandle> {
        let tracker = self.clone();
        let stale_after = options.stale_after()?;
        let (start, period) = options.schedule()?;
        let (shutdown, mut stop) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        tracker.sweep(stale_after);
                    }
                }
            }
            info!("nonce sweeper stopped");
        });

        Ok(SweeperHandle {
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }
}

/// Owns the background sweep task
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_add_get_remove() {
        let tracker = NonceTracker::new();
        assert!(tracker.try_get_entry("n").is_none());
        assert!(tracker.try_add_entry("n", 1));
        assert!(!tracker.try_add_entry("n", 2));

        let record = tracker.try_get_entry("n").unwrap();
        assert_eq!(record.nonce, "n");
        assert_eq!(record.count, 1);

        assert!(tracker.try_remove_entry("n"));
        assert!(!tracker.try_remove_entry("n"));
        assert!(!tracker.try_remove_entry("unknown"));
    }

    #[test]
    fn test_first_seen_policy() {
        let tracker = NonceTracker::new();
        let p = ReplayPolicy::FirstSeen;
        assert_eq!(tracker.register_use("n", 1, p), NonceUse::First);
        assert_eq!(tracker.register_use("n", 1, p), NonceUse::Replayed);
        assert_eq!(tracker.register_use("n", 2, p), NonceUse::Accepted);
        // the stored count never moves, so a repeat of 2 slips through
        assert_eq!(tracker.register_use("n", 2, p), NonceUse::Accepted);
        assert_eq!(tracker.register_use("n", 1, p), NonceUse::Replayed);
        assert_eq!(tracker.try_get_entry("n").unwrap().count, 1);
    }

    #[test]
    fn test_monotonic_policy() {
        let tracker = NonceTracker::new();
        let p = ReplayPolicy::Monotonic;
        assert_eq!(tracker.register_use("n", 1, p), NonceUse::First);
        assert_eq!(tracker.register_use("n", 1, p), NonceUse::Replayed);
        assert_eq!(tracker.register_use("n", 2, p), NonceUse::Accepted);
        assert_eq!(tracker.register_use("n", 2, p), NonceUse::Replayed);
        assert_eq!(tracker.register_use("n", 1, p), NonceUse::Replayed);
        assert_eq!(tracker.register_use("n", 5, p), NonceUse::Accepted);
        assert_eq!(tracker.try_get_entry("n").unwrap().count, 5);
    }

    #[test]
    fn test_sweep_evicts_only_stale() {
        let tracker = NonceTracker::new();
        let now = Utc::now();
        let stale = Duration::minutes(5);

        assert!(tracker.try_add_entry_at("old", 1, now - Duration::minutes(6)));
        assert!(tracker.try_add_entry_at("edge", 1, now - stale));
        assert!(tracker.try_add_entry_at("fresh", 1, now));

        assert_eq!(tracker.sweep_at(now, stale), 1);
        assert!(tracker.try_get_entry("old").is_none());
        assert!(tracker.try_get_entry("edge").is_some());
        assert!(tracker.try_get_entry("fresh").is_some());
    }

    #[test]
    fn test_concurrent_insert_single_winner() {
        let tracker = NonceTracker::new();
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let tracker = tracker.clone();
                let wins = wins.clone();
                thread::spawn(move || {
                    if tracker.try_add_entry("shared", i) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_concurrent_replay_single_acceptance() {
        let tracker = NonceTracker::new();
        tracker.try_add_entry("n", 0);
        let accepted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                let accepted = accepted.clone();
                thread::spawn(move || {
                    if tracker.register_use("n", 7, ReplayPolicy::Monotonic) == NonceUse::Accepted {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sweep_during_concurrent_inserts() {
        let tracker = NonceTracker::new();
        let now = Utc::now();
        for i in 0..100 {
            tracker.try_add_entry_at(&format!("old-{}", i), 1, now - Duration::hours(1));
        }

        let writer = {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    assert!(tracker.try_add_entry(&format!("new-{}", i), 1));
                }
            })
        };
        for _ in 0..10 {
            tracker.sweep(Duration::minutes(5));
        }
        writer.join().unwrap();
        tracker.sweep(Duration::minutes(5));

        assert_eq!(tracker.len(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_schedule() {
        let tracker = NonceTracker::new();
        let options = TrackerOptions {
            stale_after_secs: 0,
            first_sweep_after_secs: 15 * 60,
            sweep_interval_secs: 60 * 60,
        };
        tracker.try_add_entry_at("n", 1, Utc::now() - Duration::seconds(10));

        let handle = tracker.spawn_sweeper(&options).unwrap();
        tokio::time::sleep(StdDuration::from_secs(14 * 60)).await;
        assert_eq!(tracker.len(), 1);

        tokio::time::sleep(StdDuration::from_secs(2 * 60)).await;
        assert_eq!(tracker.len(), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_sweeper_stops() {
        let tracker = NonceTracker::new();
        let handle = tracker.spawn_sweeper(&TrackerOptions::default()).unwrap();
        handle.stop().await;
        assert!(tracker.try_add_entry("n", 1));
    }

    #[test]
    fn test_out_of_range_options() {
        let options = TrackerOptions {
            stale_after_secs: u64::MAX,
            ..TrackerOptions::default()
        };
        assert!(matches!(options.stale_after(), Err(Error::Configuration(_))));

        let options = TrackerOptions {
            first_sweep_after_secs: u64::MAX,
            ..TrackerOptions::default()
        };
        assert!(matches!(options.validate(), Err(Error::Configuration(_))));

        assert_eq!(TrackerOptions::default().stale_after(), Ok(Duration::minutes(5)));
        assert!(TrackerOptions::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_sweeper_refuses_unschedulable_options() {
        let tracker = NonceTracker::new();
        let options = TrackerOptions {
            sweep_interval_secs: u64::MAX,
            ..TrackerOptions::default()
        };
        assert!(tracker.spawn_sweeper(&options).is_err());
    }
}
