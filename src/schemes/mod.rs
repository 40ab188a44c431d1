//! Scheme adapters that plug a header parser and a principal resolver into the pipeline.

pub mod basic;
pub mod digest;
pub mod hmac;

use tracing::debug;

use crate::config::AuthOptions;
use crate::credentials::{Credentials, ParsedHeader};
use crate::error::AuthFailure;
use crate::pipeline::{self, AuthRequest, AuthenticationResult, Resolution, ResponseSink};

/// One authentication scheme
pub trait AuthScheme {
    type Principal;

    /// Scheme name as it appears in headers
    fn name(&self) -> &'static str;

    /// Extract credentials, or report that the header is not for this scheme
    fn parse_header(&self, header: &str) -> ParsedHeader;

    fn resolve(
        &self,
        request: &dyn AuthRequest,
        credentials: &Credentials,
    ) -> Resolution<Self::Principal>;

    /// `WWW-Authenticate` value to send after `failure` (or on first contact)
    fn challenge(&self, failure: Option<&AuthFailure>) -> String;
}

/// Runs a scheme through the pipeline and writes challenges on failure
#[derive(Debug)]
pub struct SchemeHandler<S> {
    scheme: S,
    options: AuthOptions,
}

impl<S: AuthScheme> SchemeHandler<S> {
    pub fn new(scheme: S, options: AuthOptions) -> Self {
        SchemeHandler { scheme, options }
    }

    pub fn scheme(&self) -> &S {
        &self.scheme
    }

    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    pub fn authenticate<R: AuthRequest>(&self, request: &R) -> AuthenticationResult<S::Principal> {
        pipeline::authenticate(
            request,
            self.options.require_secure_connection,
            |_, raw| self.scheme.parse_header(raw),
            |req, credentials| self.scheme.resolve(req, credentials),
        )
    }

    /// Write a 401 carrying a fresh challenge
    pub fn challenge<W: ResponseSink + ?Sized>(&self, sink: &mut W, failure: Option<&AuthFailure>) {
        let challenge = self.scheme.challenge(failure);
        pipeline::write_challenge(sink, &[challenge], &self.options.unauthorized_message);
    }

    /// Authenticate, and on failure answer with a challenge before anything else is written.
    pub fn handle<R: AuthRequest, W: ResponseSink + ?Sized>(
        &self,
        request: &R,
        sink: &mut W,
    ) -> Option<S::Principal> {
        match self.authenticate(request) {
            AuthenticationResult::Success(principal) => Some(principal),
            AuthenticationResult::Failure(failure) => {
                debug!(scheme = self.scheme.name(), reason = %failure, "sending challenge");
                self.challenge(sink, Some(&failure));
                None
            }
        }
    }
}
