//! HMAC scheme: `HMAC <public key>:<signature>`
//!
//! The signature is `base64(HMAC(private key, message))`, where the message is a
//! canonical description of the request chosen by the host.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use digest::{Digest, KeyInit};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Sha256, Sha512};
use tracing::{debug, warn};

use super::AuthScheme;
use crate::config::{HmacAlgorithm, HmacOptions};
use crate::credentials::{strip_scheme, Credentials, ParsedHeader};
use crate::error::{AuthError, AuthFailure};
use crate::pipeline::{AuthRequest, Resolution};
use crate::utils::QuoteForDigest;
use crate::{Error, Result};

pub const SCHEME: &str = "HMAC";
pub const CONTENT_MD5: &str = "Content-MD5";

const PUBLIC_KEY: &str = "publicKey";
const SIGNATURE: &str = "signature";

/// What the host knows about a public key
#[derive(Debug, Clone)]
pub struct KeyLookup<P> {
    pub principal: Option<P>,
    pub private_key: Option<Vec<u8>>,
}

/// `public key -> (principal, private key)`
pub type Authenticator<P> = Arc<dyn Fn(&str) -> KeyLookup<P> + Send + Sync>;

/// Canonical message a request is signed over
pub type MessageDescriptor = Arc<dyn Fn(&dyn AuthRequest) -> String + Send + Sync>;

pub struct HmacScheme<P> {
    options: HmacOptions,
    authenticator: Authenticator<P>,
    message: MessageDescriptor,
}

impl<P> fmt::Debug for HmacScheme<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacScheme")
            .field("options", &self.options)
            .finish()
    }
}

impl<P> HmacScheme<P> {
    /// # Errors
    /// `Error::Configuration` if the authenticator or message descriptor is missing
    pub fn new(
        options: HmacOptions,
        authenticator: Option<Authenticator<P>>,
        message: Option<MessageDescriptor>,
    ) -> Result<Self> {
        let authenticator = authenticator
            .ok_or_else(|| Error::Configuration("no HMAC authenticator configured".into()))?;
        let message = message
            .ok_or_else(|| Error::Configuration("no HMAC message descriptor configured".into()))?;
        Ok(HmacScheme {
            options,
            authenticator,
            message,
        })
    }
}

fn keyed<M: Mac + KeyInit>(key: &[u8], message: &[u8]) -> Option<M> {
    let mut mac = <M as Mac>::new_from_slice(key).ok()?;
    mac.update(message);
    Some(mac)
}

/// Compute `base64(HMAC(key, message))`
pub fn sign(algorithm: HmacAlgorithm, key: &[u8], message: &[u8]) -> Option<String> {
    let tag = match algorithm {
        HmacAlgorithm::Sha256 => keyed::<Hmac<Sha256>>(key, message)?.finalize().into_bytes().to_vec(),
        HmacAlgorithm::Sha512 => keyed::<Hmac<Sha512>>(key, message)?.finalize().into_bytes().to_vec(),
        HmacAlgorithm::Md5 => keyed::<Hmac<Md5>>(key, message)?.finalize().into_bytes().to_vec(),
    };
    Some(STANDARD.encode(tag))
}

/// Check a base64 signature against `HMAC(key, message)` in constant time.
///
/// `None` if the key is unusable.
pub fn verify(algorithm: HmacAlgorithm, key: &[u8], message: &[u8], signature: &str) -> Option<bool> {
    let tag = match STANDARD.decode(signature.trim()) {
        Ok(tag) => tag,
        Err(_) => return Some(false),
    };
    let verified = match algorithm {
        HmacAlgorithm::Sha256 => keyed::<Hmac<Sha256>>(key, message)?.verify_slice(&tag),
        HmacAlgorithm::Sha512 => keyed::<Hmac<Sha512>>(key, message)?.verify_slice(&tag),
        HmacAlgorithm::Md5 => keyed::<Hmac<Md5>>(key, message)?.verify_slice(&tag),
    };
    Some(verified.is_ok())
}

/// `Content-MD5` value for a body
pub fn content_md5(body: &[u8]) -> String {
    STANDARD.encode(Md5::digest(body))
}

pub fn parse_hmac(header: &str) -> Option<Credentials> {
    let payload = strip_scheme(header, SCHEME)?;
    let (public_key, signature) = payload.split_once(':')?;
    if public_key.is_empty() || signature.is_empty() {
        return None;
    }

    let mut credentials = Credentials::new(SCHEME);
    credentials.insert_first(PUBLIC_KEY, public_key.to_string());
    credentials.insert_first(SIGNATURE, signature.to_string());
    Some(credentials)
}

impl<P> AuthScheme for HmacScheme<P> {
    type Principal = P;

    fn name(&self) -> &'static str {
        SCHEME
    }

    fn parse_header(&self, header: &str) -> ParsedHeader {
        parse_hmac(header).into()
    }

    fn resolve(&self, request: &dyn AuthRequest, credentials: &Credentials) -> Resolution<P> {
        let public_key = credentials.get(PUBLIC_KEY).unwrap_or_default();
        let presented = credentials.get(SIGNATURE).unwrap_or_default();

        if self.options.verify_body_hash {
            if let Some(expected) = request.header(CONTENT_MD5) {
                if content_md5(request.body()) != expected.trim() {
                    debug!(public_key, "body does not match Content-MD5");
                    return Resolution::reject(AuthError::SignatureMismatch);
                }
            }
        }

        let lookup = (self.authenticator)(public_key);
        let private_key = match lookup.private_key {
            Some(k) => k,
            None => {
                debug!(public_key, "unknown public key");
                return Resolution::reject(AuthError::CredentialNotFound);
            }
        };

        let message = (self.message)(request);
        let verified = match verify(self.options.algorithm, &private_key, message.as_bytes(), presented) {
            Some(v) => v,
            None => {
                warn!(public_key, "unusable private key");
                return Resolution::reject(AuthError::SignatureMismatch);
            }
        };

        if !verified {
            debug!(public_key, "hmac signature mismatch");
            return Resolution {
                principal: lookup.principal,
                accepted: false,
                failure: Some(AuthFailure::new(AuthError::SignatureMismatch)),
            };
        }

        match lookup.principal {
            Some(principal) => Resolution::accept(principal),
            None => Resolution::reject(AuthError::CredentialNotFound),
        }
    }

    fn challenge(&self, _failure: Option<&AuthFailure>) -> String {
        format!("{} realm=\"{}\"", SCHEME, self.options.realm.quote_for_digest())
    }
}
