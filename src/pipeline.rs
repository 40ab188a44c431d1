//! Scheme-agnostic authentication pipeline and the host-facing request/response seams.

use tracing::{debug, warn};

use crate::credentials::{Credentials, ParsedHeader};
use crate::error::{AuthError, AuthFailure};

pub const AUTHORIZATION: &str = "Authorization";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
pub const UNAUTHORIZED: u16 = 401;

/// What the pipeline needs to read from an inbound request
pub trait AuthRequest {
    /// First value of the named header; names compare case-insensitively
    fn header(&self, name: &str) -> Option<&str>;
    /// True if the request arrived over a confidentiality-protected transport
    fn is_secure(&self) -> bool;
    fn method(&self) -> &str;
    /// Request target as it appears on the request line
    fn uri(&self) -> &str;
    fn body(&self) -> &[u8];
}

/// Owned request description for hosts that don't use the `http` crate
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub secure: bool,
}

impl RequestParts {
    pub fn new(method: &str, uri: &str) -> Self {
        RequestParts {
            method: method.to_string(),
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

impl AuthRequest for RequestParts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Request extension marking an `http::Request` as received over TLS.
///
/// Server-side requests carry origin-form URIs, so the host inserts this once the
/// connection is known to be secure.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureTransport;

#[cfg(feature = "http")]
impl<B: AsRef<[u8]>> AuthRequest for http::Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn is_secure(&self) -> bool {
        self.extensions().get::<SecureTransport>().is_some()
            || http::Request::uri(self).scheme() == Some(&http::uri::Scheme::HTTPS)
    }

    fn method(&self) -> &str {
        http::Request::method(self).as_str()
    }

    fn uri(&self) -> &str {
        http::Request::uri(self)
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    fn body(&self) -> &[u8] {
        http::Request::body(self).as_ref()
    }
}

/// What a principal resolver decided about a set of credentials
#[derive(Debug)]
pub struct Resolution<P> {
    pub principal: Option<P>,
    pub accepted: bool,
    /// Failure recorded while resolving, if any
    pub failure: Option<AuthFailure>,
}

impl<P> Resolution<P> {
    pub fn accept(principal: P) -> Self {
        Resolution {
            principal: Some(principal),
            accepted: true,
            failure: None,
        }
    }

    pub fn reject(cause: AuthError) -> Self {
        Resolution {
            principal: None,
            accepted: false,
            failure: Some(AuthFailure::new(cause)),
        }
    }
}

/// Outcome of one authentication attempt
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AuthenticationResult<P> {
    Success(P),
    Failure(AuthFailure),
}

impl<P> AuthenticationResult<P> {
    pub fn fail(cause: AuthError) -> Self {
        AuthenticationResult::Failure(AuthFailure::new(cause))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuthenticationResult::Success(_))
    }

    pub fn principal(&self) -> Option<&P> {
        match self {
            AuthenticationResult::Success(p) => Some(p),
            AuthenticationResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&AuthFailure> {
        match self {
            AuthenticationResult::Success(_) => None,
            AuthenticationResult::Failure(f) => Some(f),
        }
    }

    pub fn into_result(self) -> Result<P, AuthFailure> {
        match self {
            AuthenticationResult::Success(p) => Ok(p),
            AuthenticationResult::Failure(f) => Err(f),
        }
    }
}

/// Run one authentication attempt.
///
/// `header_parser` turns the raw `Authorization` value into credentials, or reports
/// that the header is not for its scheme. `principal_resolver` decides whether the
/// credentials identify someone. The request is never mutated; on success the
/// principal is returned for the caller to attach.
pub fn authenticate<R, P, H, V>(
    request: &R,
    require_secure_connection: bool,
    header_parser: H,
    principal_resolver: V,
) -> AuthenticationResult<P>
where
    R: AuthRequest + ?Sized,
    H: FnOnce(&R, &str) -> ParsedHeader,
    V: FnOnce(&R, &Credentials) -> Resolution<P>,
{
    if require_secure_connection && !request.is_secure() {
        warn!(uri = request.uri(), "rejecting authentication over insecure transport");
        return AuthenticationResult::fail(AuthError::Transport);
    }

    let raw = match request.header(AUTHORIZATION) {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            debug!(uri = request.uri(), "no authorization header");
            return AuthenticationResult::fail(AuthError::missing_header());
        }
    };

    let credentials = match header_parser(request, raw) {
        ParsedHeader::Credentials(c) => c,
        ParsedHeader::NoMatch => {
            debug!(uri = request.uri(), "authorization header not usable by this scheme");
            return AuthenticationResult::fail(AuthError::invalid_header());
        }
    };

    let resolution = principal_resolver(request, &credentials);
    match (resolution.accepted, resolution.principal) {
        (true, Some(principal)) => {
            debug!(scheme = credentials.scheme(), "authenticated");
            AuthenticationResult::Success(principal)
        }
        (accepted, principal) => {
            let late = if accepted || principal.is_none() {
                AuthError::CredentialNotFound
            } else {
                AuthError::SignatureMismatch
            };
            let failure = match resolution.failure {
                // accepted without a principal is a second fault on top of the first
                Some(earlier) if accepted && !earlier.causes().contains(&late) => {
                    earlier.aggregate(AuthFailure::new(late))
                }
                // a rejection's own failure already explains the missing principal
                Some(earlier) => earlier,
                None => AuthFailure::new(late),
            };
            debug!(scheme = credentials.scheme(), reason = %failure, "authentication failed");
            AuthenticationResult::Failure(failure)
        }
    }
}

/// Where challenge responses are written. Implemented by the host.
pub trait ResponseSink {
    fn set_status(&mut self, status: u16);
    fn append_header(&mut self, name: &str, value: &str);
    fn write_body(&mut self, body: &[u8]);
}

/// Emit a 401: status and every challenge header first, then the body.
pub fn write_challenge<S: ResponseSink + ?Sized>(
    sink: &mut S,
    challenges: &[String],
    unauthorized_message: &str,
) {
    sink.set_status(UNAUTHORIZED);
    for challenge in challenges {
        sink.append_header(WWW_AUTHENTICATE, challenge);
    }
    sink.write_body(unauthorized_message.as_bytes());
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credentials::strip_scheme;

    /// Records everything written, in order
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub events: Vec<String>,
        pub status: Option<u16>,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl ResponseSink for RecordingSink {
        fn set_status(&mut self, status: u16) {
            self.events.push("status".into());
            self.status = Some(status);
        }

        fn append_header(&mut self, name: &str, value: &str) {
            self.events.push("header".into());
            self.headers.push((name.to_string(), value.to_string()));
        }

        fn write_body(&mut self, body: &[u8]) {
            self.events.push("body".into());
            self.body.extend_from_slice(body);
        }
    }

    fn token_parser(_: &RequestParts, raw: &str) -> ParsedHeader {
        let mut c = Credentials::new("Token");
        match strip_scheme(raw, "Token") {
            Some(t) if !t.is_empty() => {
                c.insert_first("token", t.to_string());
                ParsedHeader::Credentials(c)
            }
            _ => ParsedHeader::NoMatch,
        }
    }

    fn token_resolver(_: &RequestParts, c: &Credentials) -> Resolution<String> {
        match c.get("token") {
            Some("good") => Resolution::accept("alice".to_string()),
            _ => Resolution {
                principal: None,
                accepted: false,
                failure: None,
            },
        }
    }

    #[test]
    fn test_success() {
        let req = RequestParts::new("GET", "/").with_header("authorization", "Token good");
        let result = authenticate(&req, false, token_parser, token_resolver);
        assert_eq!(result, AuthenticationResult::Success("alice".to_string()));
    }

    #[test]
    fn test_requires_secure_transport() {
        let req = RequestParts::new("GET", "/").with_header("Authorization", "Token good");
        let result = authenticate(&req, true, token_parser, token_resolver);
        assert_eq!(result.failure().unwrap().reason(), &AuthError::Transport);

        let result = authenticate(&req.secure(true), true, token_parser, token_resolver);
        assert!(result.is_success());
    }

    #[test]
    fn test_missing_and_empty_header() {
        let req = RequestParts::new("GET", "/");
        let result = authenticate(&req, false, token_parser, token_resolver);
        assert_eq!(result.failure().unwrap().reason(), &AuthError::missing_header());

        let req = RequestParts::new("GET", "/").with_header("Authorization", "  ");
        let result = authenticate(&req, false, token_parser, token_resolver);
        assert_eq!(result.failure().unwrap().reason(), &AuthError::missing_header());
    }

    #[test]
    fn test_scheme_mismatch() {
        let req = RequestParts::new("GET", "/").with_header("Authorization", "Basic Zm9vOmJhcg==");
        let result = authenticate(&req, false, token_parser, token_resolver);
        assert_eq!(result.failure().unwrap().reason(), &AuthError::invalid_header());
    }

    #[test]
    fn test_rejected_without_principal() {
        let req = RequestParts::new("GET", "/").with_header("Authorization", "Token bad");
        let result = authenticate(&req, false, token_parser, token_resolver);
        assert_eq!(
            result.failure().unwrap().reason(),
            &AuthError::CredentialNotFound
        );
    }

    #[test]
    fn test_accepted_without_principal_aggregates() {
        let req = RequestParts::new("GET", "/").with_header("Authorization", "Token x");
        let result = authenticate(&req, false, token_parser, |_, _| Resolution::<String> {
            principal: None,
            accepted: true,
            failure: Some(AuthFailure::new(AuthError::SignatureMismatch)),
        });
        let failure = result.failure().unwrap();
        assert_eq!(
            failure.causes(),
            &[AuthError::SignatureMismatch, AuthError::CredentialNotFound]
        );
        assert!(failure.is_aggregate());

        // the same fault is not recorded twice
        let result = authenticate(&req, false, token_parser, |_, _| Resolution::<String> {
            principal: None,
            accepted: true,
            failure: Some(AuthFailure::new(AuthError::CredentialNotFound)),
        });
        assert!(!result.failure().unwrap().is_aggregate());
    }

    #[test]
    fn test_resolver_failure_is_kept() {
        let req = RequestParts::new("GET", "/").with_header("Authorization", "Token x");
        let result = authenticate(&req, false, token_parser, |_, _| {
            Resolution::<String>::reject(AuthError::StaleNonce)
        });
        assert_eq!(result.failure().unwrap().causes(), &[AuthError::StaleNonce]);
    }

    #[test]
    fn test_challenge_ordering() {
        let mut sink = RecordingSink::default();
        write_challenge(
            &mut sink,
            &["Basic realm=\"a\"".to_string(), "Digest realm=\"a\"".to_string()],
            "Unauthorized",
        );
        assert_eq!(sink.events, vec!["status", "header", "header", "body"]);
        assert_eq!(sink.status, Some(401));
        assert_eq!(sink.headers[0].0, WWW_AUTHENTICATE);
        assert_eq!(sink.body, b"Unauthorized");
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_request() {
        let mut req = http::Request::builder()
            .method("POST")
            .uri("/items?id=1")
            .header("authorization", "Token good")
            .body(b"payload".to_vec())
            .unwrap();

        assert_eq!(AuthRequest::header(&req, "Authorization"), Some("Token good"));
        assert_eq!(AuthRequest::header(&req, "X-Missing"), None);
        assert_eq!(AuthRequest::method(&req), "POST");
        assert_eq!(AuthRequest::uri(&req), "/items?id=1");
        assert_eq!(AuthRequest::body(&req), b"payload");
        assert!(!req.is_secure());

        let parser = |_: &http::Request<Vec<u8>>, raw: &str| match strip_scheme(raw, "Token") {
            Some("good") => {
                let mut c = Credentials::new("Token");
                c.insert_first("token", "good".to_string());
                ParsedHeader::Credentials(c)
            }
            _ => ParsedHeader::NoMatch,
        };
        let resolver = |_: &http::Request<Vec<u8>>, _: &Credentials| {
            Resolution::accept("alice".to_string())
        };

        let result = authenticate(&req, true, parser, resolver);
        assert_eq!(result.failure().unwrap().reason(), &AuthError::Transport);

        req.extensions_mut().insert(SecureTransport);
        assert!(req.is_secure());
        let result = authenticate(&req, true, parser, resolver);
        assert_eq!(result.principal(), Some(&"alice".to_string()));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_absolute_form_https_is_secure() {
        let req = http::Request::builder()
            .uri("https://example.org/a")
            .body(Vec::<u8>::new())
            .unwrap();
        assert!(req.is_secure());
        assert_eq!(AuthRequest::uri(&req), "/a");
    }
}
