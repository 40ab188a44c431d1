//! Host-tunable settings. Every struct deserializes with defaults for missing keys.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::nonce::DEFAULT_NONCE_TTL_SECS;
use crate::tracker::{ReplayPolicy, TrackerOptions};
use crate::{Algorithm, Error, Qop, Result};

/// Settings shared by every scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    /// Refuse to authenticate requests that did not arrive over TLS
    pub require_secure_connection: bool,
    /// Body of every 401 response
    pub unauthorized_message: String,
}

impl Default for AuthOptions {
    fn default() -> Self {
        AuthOptions {
            require_secure_connection: false,
            unauthorized_message: "Unauthorized".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestOptions {
    pub realm: String,
    pub algorithm: Algorithm,
    /// qop values offered in the challenge
    pub qop: Vec<Qop>,
    pub nonce_ttl_secs: i64,
    /// Track nonce counts to reject replays
    pub track_nonces: bool,
    pub replay_policy: ReplayPolicy,
    /// Reject nonces this server could not have issued for the echoed opaque
    pub verify_nonce_integrity: bool,
    pub tracker: TrackerOptions,
}

impl Default for DigestOptions {
    fn default() -> Self {
        DigestOptions {
            realm: "default".to_string(),
            algorithm: Algorithm::MD5,
            qop: vec![Qop::AUTH, Qop::AUTH_INT],
            nonce_ttl_secs: DEFAULT_NONCE_TTL_SECS,
            track_nonces: true,
            replay_policy: ReplayPolicy::FirstSeen,
            verify_nonce_integrity: false,
            tracker: TrackerOptions::default(),
        }
    }
}

impl DigestOptions {
    /// # Errors
    /// `Error::Configuration` if `nonce_ttl_secs` is negative or does not fit a `chrono::Duration`
    pub fn nonce_ttl(&self) -> Result<Duration> {
        Duration::try_seconds(self.nonce_ttl_secs)
            .filter(|ttl| *ttl >= Duration::zero())
            .ok_or_else(|| {
                Error::Configuration(format!("nonce_ttl_secs out of range: {}", self.nonce_ttl_secs))
            })
    }
}

/// Keyed-hash algorithm for HMAC signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HmacAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Md5,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmacOptions {
    pub realm: String,
    pub algorithm: HmacAlgorithm,
    /// Check the body against `Content-MD5` when the client sends one
    pub verify_body_hash: bool,
}

impl Default for HmacOptions {
    fn default() -> Self {
        HmacOptions {
            realm: "default".to_string(),
            algorithm: HmacAlgorithm::Sha256,
            verify_body_hash: true,
        }
    }
}
