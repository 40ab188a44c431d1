//! Basic scheme: `Basic base64(username:password)`

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use super::AuthScheme;
use crate::credentials::{strip_scheme, Credentials, ParsedHeader};
use crate::error::{AuthError, AuthFailure};
use crate::pipeline::{AuthRequest, Resolution};
use crate::utils::QuoteForDigest;
use crate::{Error, Result};

pub const SCHEME: &str = "Basic";

/// `(username, password) -> principal`
pub type CredentialsValidator<P> = Arc<dyn Fn(&str, &str) -> Option<P> + Send + Sync>;

pub struct BasicScheme<P> {
    realm: String,
    validator: CredentialsValidator<P>,
}

impl<P> fmt::Debug for BasicScheme<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicScheme").field("realm", &self.realm).finish()
    }
}

impl<P> BasicScheme<P> {
    /// # Errors
    /// `Error::Configuration` if no validator is given
    pub fn new(realm: &str, validator: Option<CredentialsValidator<P>>) -> Result<Self> {
        let validator = validator
            .ok_or_else(|| Error::Configuration("no credentials validator configured".into()))?;
        Ok(BasicScheme {
            realm: realm.to_string(),
            validator,
        })
    }
}

/// Decode the payload of a Basic header into its username and password
pub fn parse_basic(header: &str) -> Option<Credentials> {
    let payload = strip_scheme(header, SCHEME)?;
    let decoded = STANDARD.decode(payload).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    let mut credentials = Credentials::new(SCHEME);
    credentials.insert_first("username", username.to_string());
    credentials.insert_first("password", password.to_string());
    Some(credentials)
}

impl<P> AuthScheme for BasicScheme<P> {
    type Principal = P;

    fn name(&self) -> &'static str {
        SCHEME
    }

    fn parse_header(&self, header: &str) -> ParsedHeader {
        parse_basic(header).into()
    }

    fn resolve(&self, _request: &dyn AuthRequest, credentials: &Credentials) -> Resolution<P> {
        let username = credentials.get("username").unwrap_or_default();
        let password = credentials.get("password").unwrap_or_default();

        match (self.validator)(username, password) {
            Some(principal) => Resolution::accept(principal),
            None => {
                debug!(username, "basic credentials rejected");
                Resolution::reject(AuthError::CredentialNotFound)
            }
        }
    }

    fn challenge(&self, _failure: Option<&AuthFailure>) -> String {
        format!("{} realm=\"{}\"", SCHEME, self.realm.quote_for_digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthOptions;
    use crate::pipeline::tests::RecordingSink;
    use crate::pipeline::RequestParts;
    use crate::schemes::SchemeHandler;

    fn handler() -> SchemeHandler<BasicScheme<String>> {
        let validator: CredentialsValidator<String> = Arc::new(|u: &str, p: &str| {
            if u == "Aladdin" && p == "open sesame" {
                Some(u.to_string())
            } else {
                None
            }
        });
        SchemeHandler::new(
            BasicScheme::new("WallyWorld", Some(validator)).unwrap(),
            AuthOptions::default(),
        )
    }

    fn basic(user_pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(user_pass))
    }

    #[test]
    fn test_missing_validator_is_configuration_error() {
        let err = BasicScheme::<String>::new("r", None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_parse_basic() {
        let c = parse_basic("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==").unwrap();
        assert_eq!(c.get("username"), Some("Aladdin"));
        assert_eq!(c.get("password"), Some("open sesame"));

        // only the first colon separates
        let c = parse_basic(&basic("user:pa:ss")).unwrap();
        assert_eq!(c.get("password"), Some("pa:ss"));

        assert!(parse_basic("Basic !!!").is_none());
        assert!(parse_basic(&basic("nocolon")).is_none());
        assert!(parse_basic("Digest username=\"a\"").is_none());
    }

    #[test]
    fn test_succeeds_only_for_exact_pair() {
        let h = handler();
        let ok = RequestParts::new("GET", "/").with_header("Authorization", &basic("Aladdin:open sesame"));
        assert_eq!(h.authenticate(&ok).principal(), Some(&"Aladdin".to_string()));

        for wrong in ["Aladdin:open", "aladdin:open sesame", "Aladdin:open sesame "] {
            let req = RequestParts::new("GET", "/").with_header("Authorization", &basic(wrong));
            let result = h.authenticate(&req);
            assert_eq!(
                result.failure().unwrap().reason(),
                &AuthError::CredentialNotFound
            );
        }
    }

    #[test]
    fn test_failure_writes_challenge() {
        let h = handler();
        let req = RequestParts::new("GET", "/");
        let mut sink = RecordingSink::default();

        assert!(h.handle(&req, &mut sink).is_none());
        assert_eq!(sink.status, Some(401));
        assert_eq!(sink.headers[0].1, "Basic realm=\"WallyWorld\"");
        assert!(sink.headers[0].1.starts_with(h.scheme().name()));
        assert_eq!(sink.events.last().unwrap(), "body");
    }
}
