//! Digest scheme adapter: nonce freshness, replay tracking and response verification.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use super::AuthScheme;
use crate::config::DigestOptions;
use crate::credentials::{strip_scheme, Credentials, ParsedHeader};
use crate::digest::{self as codec, DigestParameters, WwwAuthenticateHeader};
use crate::error::{AuthError, AuthFailure};
use crate::nonce;
use crate::pipeline::{AuthRequest, Resolution};
use crate::tracker::{NonceTracker, NonceUse, SweeperHandle};
use crate::utils::ct_eq;
use crate::{Error, Result};

/// What the host knows about a username
#[derive(Debug, Clone)]
pub struct UserLookup<P> {
    pub principal: Option<P>,
    pub password: Option<String>,
}

/// `username -> (principal, password)`
pub type Authenticator<P> = Arc<dyn Fn(&str) -> UserLookup<P> + Send + Sync>;
/// Server secret mixed into every nonce
pub type NonceSecret = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;
/// `(timestamp, entity tag, secret) -> nonce`
pub type NonceGenerator = Arc<dyn Fn(DateTime<Utc>, &str, &[u8]) -> String + Send + Sync>;
/// `(nonce, ttl) -> expired`
pub type NonceExpiredParser = Arc<dyn Fn(&str, Duration) -> bool + Send + Sync>;
pub type OpaqueGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub struct DigestScheme<P> {
    options: DigestOptions,
    nonce_ttl: Duration,
    authenticator: Authenticator<P>,
    nonce_secret: NonceSecret,
    nonce_generator: NonceGenerator,
    /// `None` means the built-in parser, which also rejects undecodable nonces
    nonce_expired: Option<NonceExpiredParser>,
    opaque_generator: OpaqueGenerator,
    tracker: Option<NonceTracker>,
}

impl<P> fmt::Debug for DigestScheme<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestScheme")
            .field("options", &self.options)
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Collects the delegates a [`DigestScheme`] needs
pub struct DigestSchemeBuilder<P> {
    options: DigestOptions,
    authenticator: Option<Authenticator<P>>,
    nonce_secret: Option<NonceSecret>,
    nonce_generator: Option<NonceGenerator>,
    nonce_expired: Option<NonceExpiredParser>,
    opaque_generator: Option<OpaqueGenerator>,
    tracker: Option<NonceTracker>,
}

impl<P> DigestSchemeBuilder<P> {
    pub fn new(options: DigestOptions) -> Self {
        DigestSchemeBuilder {
            options,
            authenticator: None,
            nonce_secret: None,
            nonce_generator: None,
            nonce_expired: None,
            opaque_generator: None,
            tracker: None,
        }
    }

    pub fn authenticator(mut self, f: Authenticator<P>) -> Self {
        self.authenticator = Some(f);
        self
    }

    pub fn nonce_secret(mut self, f: NonceSecret) -> Self {
        self.nonce_secret = Some(f);
        self
    }

    pub fn nonce_generator(mut self, f: NonceGenerator) -> Self {
        self.nonce_generator = Some(f);
        self
    }

    pub fn nonce_expired_parser(mut self, f: NonceExpiredParser) -> Self {
        self.nonce_expired = Some(f);
        self
    }

    pub fn opaque_generator(mut self, f: OpaqueGenerator) -> Self {
        self.opaque_generator = Some(f);
        self
    }

    /// Share an existing tracker instead of creating one
    pub fn tracker(mut self, tracker: NonceTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// # Errors
    /// `Error::Configuration` if no authenticator was supplied
    pub fn build(self) -> Result<DigestScheme<P>> {
        let authenticator = self
            .authenticator
            .ok_or_else(|| Error::Configuration("no digest authenticator configured".into()))?;
        let nonce_ttl = self.options.nonce_ttl()?;
        if self.options.track_nonces {
            self.options.tracker.validate()?;
        }

        let nonce_secret: NonceSecret = match self.nonce_secret {
            Some(f) => f,
            None => {
                let secret: [u8; 32] = rand::thread_rng().gen();
                Arc::new(move || secret.to_vec())
            }
        };
        let nonce_generator: NonceGenerator = match self.nonce_generator {
            Some(f) => f,
            None => Arc::new(nonce::generate),
        };
        let opaque_generator: OpaqueGenerator = match self.opaque_generator {
            Some(f) => f,
            None => Arc::new(nonce::generate_opaque),
        };

        let tracker = match (self.options.track_nonces, self.tracker) {
            (false, _) => None,
            (true, Some(t)) => Some(t),
            (true, None) => Some(NonceTracker::new()),
        };

        Ok(DigestScheme {
            options: self.options,
            nonce_ttl,
            authenticator,
            nonce_secret,
            nonce_generator,
            nonce_expired: self.nonce_expired,
            opaque_generator,
            tracker,
        })
    }
}

impl<P> DigestScheme<P> {
    pub fn options(&self) -> &DigestOptions {
        &self.options
    }

    pub fn tracker(&self) -> Option<&NonceTracker> {
        self.tracker.as_ref()
    }

    /// Start the periodic sweep of the replay tracker, if tracking is on.
    pub fn spawn_sweeper(&self) -> Result<Option<SweeperHandle>> {
        self.tracker
            .as_ref()
            .map(|t| t.spawn_sweeper(&self.options.tracker))
            .transpose()
    }

    /// A fresh challenge; `stale` tells the client its previous nonce merely expired
    pub fn fresh_challenge(&self, stale: bool) -> WwwAuthenticateHeader {
        let opaque = (self.opaque_generator)();
        let nonce = (self.nonce_generator)(Utc::now(), &opaque, &(self.nonce_secret)());

        WwwAuthenticateHeader {
            realm: self.options.realm.clone(),
            qop: self.options.qop.clone(),
            nonce,
            opaque,
            stale,
            algorithm: self.options.algorithm,
        }
    }

    fn check_nonce(&self, credentials: &Credentials, nonce: &str) -> std::result::Result<(), AuthError> {
        let ttl = self.nonce_ttl;

        let expired = match &self.nonce_expired {
            Some(parser) => parser(nonce, ttl),
            None => {
                if nonce::decode(nonce).is_err() {
                    debug!(nonce, "undecodable nonce");
                    return Err(AuthError::Header("invalid nonce".into()));
                }
                nonce::is_expired(nonce, ttl)
            }
        };

        if self.options.verify_nonce_integrity {
            let opaque = credentials.get(codec::OPAQUE).unwrap_or_default();
            if !nonce::verify(nonce, opaque, &(self.nonce_secret)()) {
                warn!(nonce, "nonce was not issued by this server");
                return Err(AuthError::Header("invalid nonce".into()));
            }
        }

        if expired {
            debug!(nonce, "stale nonce");
            return Err(AuthError::StaleNonce);
        }
        Ok(())
    }

    fn check_replay(&self, credentials: &Credentials, nonce: &str) -> std::result::Result<(), AuthError> {
        let tracker = match &self.tracker {
            Some(t) => t,
            None => return Ok(()),
        };

        let nc = credentials
            .get(codec::NC)
            .ok_or_else(|| Error::MissingField(codec::NC.to_string()))
            .and_then(codec::parse_nc)?;

        match tracker.register_use(nonce, nc, self.options.replay_policy) {
            NonceUse::Replayed => {
                warn!(nonce, nc, "nonce count replayed");
                Err(AuthError::Replay {
                    nonce: nonce.to_string(),
                    nc,
                })
            }
            NonceUse::First | NonceUse::Accepted => Ok(()),
        }
    }
}

/// Parse a Digest `Authorization` header, insisting on the fields needed to verify it
pub fn parse_digest(header: &str) -> Option<Credentials> {
    let body = strip_scheme(header, codec::SCHEME)?;
    let credentials = codec::parse_header_map(body).ok()?;

    match codec::REQUIRED_FIELDS
        .iter()
        .find(|f| credentials.get(f).map_or(true, |v| v.is_empty()))
    {
        Some(missing) => {
            debug!(field = *missing, "digest header lacks a required field");
            None
        }
        None => Some(credentials),
    }
}

impl<P> AuthScheme for DigestScheme<P> {
    type Principal = P;

    fn name(&self) -> &'static str {
        codec::SCHEME
    }

    fn parse_header(&self, header: &str) -> ParsedHeader {
        parse_digest(header).into()
    }

    fn resolve(&self, request: &dyn AuthRequest, credentials: &Credentials) -> Resolution<P> {
        let nonce = credentials.get(codec::NONCE).unwrap_or_default();
        let username = credentials.get(codec::USERNAME).unwrap_or_default();

        if let Err(e) = self.check_nonce(credentials, nonce) {
            return Resolution::reject(e);
        }
        if let Err(e) = self.check_replay(credentials, nonce) {
            return Resolution::reject(e);
        }

        let lookup = (self.authenticator)(username);
        let password = match lookup.password {
            Some(p) => p,
            None => {
                debug!(username, "unknown digest user");
                return Resolution::reject(AuthError::CredentialNotFound);
            }
        };

        let params = DigestParameters::new(
            credentials,
            request.method(),
            &password,
            self.options.algorithm,
        )
        .with_body(request.body());

        let expected = match params.response() {
            Ok(r) => r,
            Err(e) => return Resolution::reject(e.into()),
        };
        let presented = credentials.get(codec::RESPONSE).unwrap_or_default();

        if !ct_eq(expected.as_bytes(), presented.as_bytes()) {
            debug!(username, "digest response mismatch");
            return Resolution {
                principal: lookup.principal,
                accepted: false,
                failure: Some(AuthFailure::new(AuthError::SignatureMismatch)),
            };
        }

        match lookup.principal {
            Some(principal) => {
                info!(username, "digest authentication succeeded");
                Resolution::accept(principal)
            }
            None => Resolution::reject(AuthError::CredentialNotFound),
        }
    }

    fn challenge(&self, failure: Option<&AuthFailure>) -> String {
        let stale = failure.map_or(false, AuthFailure::is_stale);
        self.fresh_challenge(stale).to_string()
    }
}
