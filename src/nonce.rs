//! Nonce issuance and freshness.
//!
//! A nonce is `base64("<timestamp>:<hash>")`, where the timestamp is UTC in the
//! sortable `yyyy-MM-dd HH:mm:ssZ` form and
//! `hash = hex(SHA-256(timestamp + entity_tag + base64(secret)))`.
//! The timestamp itself contains colons, so decoding splits on the last one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};

use crate::utils::{ct_eq, random_hex};
use crate::{Algorithm, Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

/// Default freshness window for issued nonces, in seconds
pub const DEFAULT_NONCE_TTL_SECS: i64 = 30;

/// Format a timestamp the way it is embedded in nonces
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn nonce_hash(stamp: &str, entity_tag: &str, secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stamp.as_bytes());
    hasher.update(entity_tag.as_bytes());
    hasher.update(STANDARD.encode(secret).as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a nonce bound to `timestamp`, `entity_tag` and the server `secret`.
pub fn generate(timestamp: DateTime<Utc>, entity_tag: &str, secret: &[u8]) -> String {
    let stamp = format_timestamp(timestamp);
    let hash = nonce_hash(&stamp, entity_tag, secret);
    STANDARD.encode(format!("{}:{}", stamp, hash))
}

/// Decode a nonce into its timestamp and hash parts.
pub fn decode(nonce: &str) -> Result<(DateTime<Utc>, String)> {
    let malformed = || Error::MalformedNonce(nonce.to_string());

    let bytes = STANDARD.decode(nonce).map_err(|_| malformed())?;
    let protocol = String::from_utf8(bytes).map_err(|_| malformed())?;
    let (stamp, hash) = protocol.rsplit_once(':').ok_or_else(malformed)?;
    let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .map_err(|_| malformed())?
        .and_utc();

    Ok((timestamp, hash.to_string()))
}

/// True if the nonce was issued more than `ttl` ago.
///
/// A nonce that cannot be decoded is reported as not expired; callers that
/// must reject such nonces use [`decode`] or [`verify`] as well.
pub fn is_expired(nonce: &str, ttl: Duration) -> bool {
    is_expired_at(nonce, ttl, Utc::now())
}

pub fn is_expired_at(nonce: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
    match decode(nonce) {
        // nonces carry whole seconds only
        Ok((timestamp, _)) => now.trunc_subsecs(0) - timestamp > ttl,
        Err(_) => false,
    }
}

/// Check that a nonce was produced by [`generate`] with this entity tag and secret.
pub fn verify(nonce: &str, entity_tag: &str, secret: &[u8]) -> bool {
    match decode(nonce) {
        Ok((timestamp, hash)) => {
            let expected = nonce_hash(&format_timestamp(timestamp), entity_tag, secret);
            ct_eq(expected.as_bytes(), hash.as_bytes())
        }
        Err(_) => false,
    }
}

/// 32 random lower-case hex characters
pub fn generate_opaque() -> String {
    random_hex(16)
}

/// Label advertised for `algorithm` in the challenge header
pub fn algorithm_label(algorithm: Algorithm) -> &'static str {
    algorithm.label()
}
