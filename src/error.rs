use std::fmt::{self, Display, Formatter};
use std::result;

use thiserror::Error;

/// Errors raised while building, parsing or hashing Digest field sets,
/// and while configuring the scheme adapters.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("Bad Qop option: {0}")]
    BadQop(String),
    #[error("Missing \"{0}\" in digest fields")]
    MissingField(String),
    #[error("Field \"{0}\" must not be blank")]
    BlankField(String),
    #[error("Invalid nonce count: {0}")]
    BadNonceCount(String),
    #[error("Invalid header syntax: {0}")]
    InvalidHeaderSyntax(String),
    #[error("Malformed nonce: {0}")]
    MalformedNonce(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = result::Result<T, Error>;

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::BadNonceCount(e.to_string())
    }
}

/// Why a single authentication attempt was refused.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum AuthError {
    /// A secure connection is required but the request arrived in the clear.
    #[error("a secure connection is required")]
    Transport,
    /// Authorization header missing, malformed, or lacking a required field.
    #[error("authorization header {0}")]
    Header(String),
    /// The nonce is older than its TTL. The client may retry with a fresh challenge.
    #[error("nonce is stale")]
    StaleNonce,
    /// The nonce count was already presented for this nonce.
    #[error("nonce {nonce} replayed with nc {nc:08x}")]
    Replay { nonce: String, nc: u32 },
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("credentials not found")]
    CredentialNotFound,
}

impl AuthError {
    pub fn missing_header() -> Self {
        AuthError::Header("missing".into())
    }

    pub fn invalid_header() -> Self {
        AuthError::Header("invalid".into())
    }

    /// A stale nonce is the only failure a client recovers from by simply retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuthError::StaleNonce)
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        AuthError::Header(e.to_string())
    }
}

/// One or more causes of a failed authentication, in order of discovery.
///
/// Causes are never dropped: when a second fault turns up after a first one was
/// recorded, both are kept.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AuthFailure {
    causes: Vec<AuthError>,
}

impl AuthFailure {
    pub fn new(cause: AuthError) -> Self {
        AuthFailure {
            causes: vec![cause],
        }
    }

    /// The first recorded cause.
    pub fn reason(&self) -> &AuthError {
        &self.causes[0]
    }

    pub fn causes(&self) -> &[AuthError] {
        &self.causes
    }

    /// Append a further cause.
    pub fn push(&mut self, cause: AuthError) {
        self.causes.push(cause);
    }

    /// Merge another failure's causes after ours.
    pub fn aggregate(mut self, other: AuthFailure) -> Self {
        self.causes.extend(other.causes);
        self
    }

    /// True if any cause can be cured by retrying with a fresh nonce
    pub fn is_stale(&self) -> bool {
        self.causes.iter().any(AuthError::is_recoverable)
    }

    pub fn is_aggregate(&self) -> bool {
        self.causes.len() > 1
    }
}

impl From<AuthError> for AuthFailure {
    fn from(cause: AuthError) -> Self {
        AuthFailure::new(cause)
    }
}

impl Display for AuthFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for AuthFailure {}
