//! This crate implements the server side of HTTP challenge-response authentication:
//! a scheme-agnostic pipeline that turns an `Authorization` header into a principal,
//! and Digest Access Authentication as specified by IETF RFCs 2069, 2617, and 7616,
//! with time-bound nonces and replay tracking. Basic and HMAC adapters are included.
//!
//! # Examples
//!
//! Basic usage:
//!
//! ```
//! use std::str::FromStr;
//! use std::sync::Arc;
//! use challenge_auth::{
//!     AuthOptions, DigestHeaderBuilder, DigestOptions, DigestParameters, DigestSchemeBuilder,
//!     Qop, RequestParts, SchemeHandler, UserLookup, WwwAuthenticateHeader,
//! };
//!
//! let scheme = DigestSchemeBuilder::new(DigestOptions {
//!     realm: "testrealm@host.com".to_string(),
//!     ..DigestOptions::default()
//! })
//! .authenticator(Arc::new(|username: &str| UserLookup {
//!     principal: Some(username.to_string()),
//!     password: (username == "Mufasa").then(|| "Circle Of Life".to_string()),
//! }))
//! .build()
//! .unwrap();
//! let handler = SchemeHandler::new(scheme, AuthOptions::default());
//!
//! // First contact: no Authorization header, so the server answers with a challenge
//! let challenge = handler.scheme().fresh_challenge(false);
//! let www_authenticate = challenge.to_string();
//!
//! // The client answers it
//! let prompt = WwwAuthenticateHeader::from_str(&www_authenticate).unwrap();
//! let mut fields = DigestHeaderBuilder::new();
//! fields
//!     .username("Mufasa").unwrap()
//!     .realm(&prompt.realm)
//!     .nonce(&prompt.nonce).unwrap()
//!     .uri("/dir/index.html").unwrap()
//!     .qop(Qop::AUTH)
//!     .nc(1)
//!     .cnonce("0a4f113b")
//!     .opaque(&prompt.opaque);
//! let response = DigestParameters::new(&fields.build(), "GET", "Circle Of Life", prompt.algorithm)
//!     .response()
//!     .unwrap();
//! fields.response(&response).unwrap();
//!
//! let request = RequestParts::new("GET", "/dir/index.html")
//!     .with_header("Authorization", &challenge_auth::to_header_string(&fields.build()));
//!
//! let principal = handler.authenticate(&request).into_result().unwrap();
//! assert_eq!(principal, "Mufasa");
//!
//! // The same nonce count again is a replay
//! assert!(!handler.authenticate(&request).is_success());
//! ```

mod config;
mod credentials;
mod digest;
mod enums;
mod error;
mod pipeline;
mod utils;

pub mod nonce;
pub mod schemes;
pub mod tracker;

pub use error::{AuthError, AuthFailure, Error, Result};

pub use crate::config::{AuthOptions, DigestOptions, HmacAlgorithm, HmacOptions};
pub use crate::credentials::{strip_scheme, Credentials, ParsedHeader};
pub use crate::digest::{
    parse_authorization, parse_header_map, parse_nc, to_header_string, DigestHeaderBuilder,
    DigestParameters, WwwAuthenticateHeader,
};
pub use crate::enums::*;
pub use crate::pipeline::{
    authenticate, write_challenge, AuthRequest, AuthenticationResult, RequestParts, Resolution,
    ResponseSink, AUTHORIZATION, UNAUTHORIZED, WWW_AUTHENTICATE,
};
#[cfg(feature = "http")]
pub use crate::pipeline::SecureTransport;
pub use crate::schemes::basic::{BasicScheme, CredentialsValidator};
pub use crate::schemes::digest::{DigestScheme, DigestSchemeBuilder, UserLookup};
pub use crate::schemes::hmac::{HmacScheme, KeyLookup};
pub use crate::schemes::{AuthScheme, SchemeHandler};
pub use crate::tracker::{NonceRecord, NonceTracker, ReplayPolicy, TrackerOptions};

/// Parse a Digest `Authorization` header value into its fields.
/// It's just a convenience method to call [`parse_authorization()`](fn.parse_authorization.html).
pub fn parse(authorization: &str) -> Result<Credentials> {
    digest::parse_authorization(authorization)
}

#[test]
fn test_parse_verify() {
    let src = r#"
    Digest
       username="Mufasa",
       realm="testrealm@host.com",
       nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093",
       uri="/dir/index.html",
       qop=auth,
       nc=00000001,
       cnonce="0a4f113b",
       response="6629fae49393a05397450978507c4ef1",
       opaque="5ccc069c403ebaf9f0171e9517f40e41"
    "#;

    let fields = crate::parse(src).unwrap();
    let params = DigestParameters::new(&fields, "GET", "Circle Of Life", Algorithm::MD5);

    assert_eq!(params.response().unwrap(), fields.get("response").unwrap());
}
