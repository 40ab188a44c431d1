use crate::credentials::{strip_scheme, Credentials};
use crate::utils::QuoteForDigest;
use crate::{Algorithm, Error, Qop, Result};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub const SCHEME: &str = "Digest";

pub const USERNAME: &str = "username";
pub const REALM: &str = "realm";
pub const URI: &str = "uri";
pub const NONCE: &str = "nonce";
pub const NC: &str = "nc";
pub const CNONCE: &str = "cnonce";
pub const QOP: &str = "qop";
pub const RESPONSE: &str = "response";
pub const OPAQUE: &str = "opaque";
pub const ALGORITHM: &str = "algorithm";

/// Fields a Digest `Authorization` header cannot do without
pub const REQUIRED_FIELDS: [&str; 5] = [USERNAME, REALM, NONCE, URI, RESPONSE];

//region Builder

/// Accumulates Digest fields, validating each as it is added.
///
/// The builder is the only mutable phase; [`build()`](#method.build) hands out a
/// frozen [`Credentials`](../struct.Credentials.html).
#[derive(Debug)]
pub struct DigestHeaderBuilder {
    fields: Credentials,
}

impl Default for DigestHeaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestHeaderBuilder {
    pub fn new() -> Self {
        DigestHeaderBuilder {
            fields: Credentials::new(SCHEME),
        }
    }

    pub fn username(&mut self, username: &str) -> Result<&mut Self> {
        self.field(USERNAME, username)
    }

    pub fn realm(&mut self, realm: &str) -> &mut Self {
        self.fields.set(REALM, realm.to_string());
        self
    }

    pub fn uri(&mut self, uri: &str) -> Result<&mut Self> {
        self.field(URI, uri)
    }

    pub fn nonce(&mut self, nonce: &str) -> Result<&mut Self> {
        self.field(NONCE, nonce)
    }

    /// Nonce count, rendered as 8 zero-padded hex digits
    pub fn nc(&mut self, count: u32) -> &mut Self {
        self.fields.set(NC, format!("{:08x}", count));
        self
    }

    pub fn cnonce(&mut self, cnonce: &str) -> &mut Self {
        self.fields.set(CNONCE, cnonce.to_string());
        self
    }

    pub fn qop(&mut self, qop: Qop) -> &mut Self {
        self.fields.set(QOP, qop.to_string());
        self
    }

    pub fn response(&mut self, response: &str) -> Result<&mut Self> {
        self.field(RESPONSE, response)
    }

    pub fn opaque(&mut self, opaque: &str) -> &mut Self {
        self.fields.set(OPAQUE, opaque.to_string());
        self
    }

    pub fn algorithm(&mut self, algorithm: Algorithm) -> &mut Self {
        self.fields.set(ALGORITHM, algorithm.to_string());
        self
    }

    /// Add any field by name, applying the same rules as the typed setters.
    pub fn field(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        validate_field(name, value)?;
        self.fields.set(name, value.to_string());
        Ok(self)
    }

    /// Freeze the accumulated fields
    pub fn build(&self) -> Credentials {
        self.fields.clone()
    }
}

fn validate_field(name: &str, value: &str) -> Result<()> {
    let lname = name.to_ascii_lowercase();
    match lname.as_str() {
        USERNAME | URI | NONCE | RESPONSE => {
            if value.trim().is_empty() {
                return Err(Error::BlankField(lname));
            }
        }
        NC => {
            parse_nc(value)?;
        }
        QOP => {
            Qop::from_str(value)?;
        }
        _ => {}
    }
    Ok(())
}

/// Parse an 8-hex-digit nonce count
pub fn parse_nc(value: &str) -> Result<u32> {
    if value.len() != 8 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::BadNonceCount(value.to_string()));
    }
    Ok(u32::from_str_radix(value, 16)?)
}

//endregion

//region Parsing

/// Parse the value of a Digest `Authorization` header. A leading `Digest` is skipped.
pub fn parse_authorization(input: &str) -> Result<Credentials> {
    let body = strip_scheme(input, SCHEME).unwrap_or(input);
    parse_header_map(body)
}

/// Helper func that parses a comma separated key-value list.
///
/// Values may be quoted (with backslash escapes) or plain. The first occurrence
/// of a field name wins.
pub fn parse_header_map(input: &str) -> Result<Credentials> {
    #[derive(Debug)]
    #[allow(non_camel_case_types)]
    enum ParserState {
        P_WHITE,
        P_NAME(usize),
        P_VALUE_BEGIN,
        P_VALUE_QUOTED,
        P_VALUE_QUOTED_NEXTLITERAL,
        P_VALUE_PLAIN,
    }

    let mut state = ParserState::P_WHITE;

    let mut parsed = Credentials::new(SCHEME);
    let mut current_token = "";
    let mut current_value = String::new();

    for (pos, c) in input.char_indices() {
        match state {
            ParserState::P_WHITE => {
                if c.is_alphabetic() {
                    state = ParserState::P_NAME(pos);
                }
            }
            ParserState::P_NAME(name_start) => {
                if c == '=' {
                    current_token = input[name_start..pos].trim();
                    state = ParserState::P_VALUE_BEGIN;
                }
            }
            ParserState::P_VALUE_BEGIN => {
                current_value.clear();
                state = match c {
                    _ if c.is_ascii_whitespace() => ParserState::P_VALUE_BEGIN,
                    '"' => ParserState::P_VALUE_QUOTED,
                    _ => {
                        current_value.push(c);
                        ParserState::P_VALUE_PLAIN
                    }
                };
            }
            ParserState::P_VALUE_QUOTED => {
                match c {
                    '"' => {
                        parsed.insert_first(current_token, current_value.clone());
                        current_value.clear();
                        state = ParserState::P_WHITE;
                    }
                    '\\' => {
                        state = ParserState::P_VALUE_QUOTED_NEXTLITERAL;
                    }
                    _ => {
                        current_value.push(c);
                    }
                };
            }
            ParserState::P_VALUE_PLAIN => {
                if c == ',' || c.is_ascii_whitespace() {
                    parsed.insert_first(current_token, current_value.clone());
                    current_value.clear();
                    state = ParserState::P_WHITE;
                } else {
                    current_value.push(c);
                }
            }
            ParserState::P_VALUE_QUOTED_NEXTLITERAL => {
                current_value.push(c);
                state = ParserState::P_VALUE_QUOTED
            }
        }
    }

    match state {
        ParserState::P_VALUE_PLAIN => {
            parsed.insert_first(current_token, current_value);
        }
        ParserState::P_WHITE => {}
        _ => {
            return Err(Error::InvalidHeaderSyntax(format!(
                "unexpected end state {:?}",
                state
            )))
        }
    }

    Ok(parsed)
}

/// Render Digest fields as an `Authorization` header value.
/// Every value is quoted except the nonce count.
pub fn to_header_string(credentials: &Credentials) -> String {
    let mut out = String::from(SCHEME);
    for (i, (name, value)) in credentials.iter().enumerate() {
        out.push_str(if i == 0 { " " } else { ", " });
        if name.eq_ignore_ascii_case(NC) {
            out.push_str(&format!("{}={}", name, value));
        } else {
            out.push_str(&format!("{}=\"{}\"", name, value.quote_for_digest()));
        }
    }
    out
}

//endregion

//region Hashing

/// Inputs to the RESPONSE computation
#[derive(Debug, Clone, Copy)]
pub struct DigestParameters<'a> {
    pub credentials: &'a Credentials,
    pub http_method: &'a str,
    pub password: &'a str,
    pub algorithm: Algorithm,
    /// Request payload body, only hashed for auth-int
    pub entity_body: &'a [u8],
}

impl<'a> DigestParameters<'a> {
    pub fn new(
        credentials: &'a Credentials,
        http_method: &'a str,
        password: &'a str,
        algorithm: Algorithm,
    ) -> Self {
        DigestParameters {
            credentials,
            http_method,
            password,
            algorithm,
            entity_body: &[],
        }
    }

    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.entity_body = body;
        self
    }

    fn required(&self, name: &'static str) -> Result<&'a str> {
        let credentials: &'a Credentials = self.credentials;
        credentials
            .get(name)
            .ok_or_else(|| Error::MissingField(name.to_string()))
    }

    /// The qop the client chose, if any
    pub fn qop(&self) -> Result<Option<Qop>> {
        self.credentials.get(QOP).map(Qop::from_str).transpose()
    }

    /// `H(username:realm:password)`
    pub fn ha1(&self) -> Result<String> {
        let a1 = format!(
            "{name}:{realm}:{pw}",
            name = self.required(USERNAME)?,
            realm = self.required(REALM)?,
            pw = self.password
        );
        Ok(self.algorithm.hash_str(&a1))
    }

    /// `H(method:uri)`, or `H(method:uri:H(body))` for auth-int
    pub fn ha2(&self) -> Result<String> {
        let uri = self.required(URI)?;
        let a2 = match self.qop()? {
            Some(Qop::AUTH_INT) => format!(
                "{method}:{uri}:{bodyhash}",
                method = self.http_method,
                uri = uri,
                bodyhash = self.algorithm.hash(self.entity_body)
            ),
            _ => format!("{method}:{uri}", method = self.http_method, uri = uri),
        };
        Ok(self.algorithm.hash_str(&a2))
    }

    /// Compute the response
    ///
    /// Without a qop this falls back to the RFC 2069 form `H(HA1:nonce:HA2)`.
    pub fn response(&self) -> Result<String> {
        let ha1 = self.ha1()?;
        let ha2 = self.ha2()?;
        let nonce = self.required(NONCE)?;

        let tmp = match self.qop()? {
            Some(q) => format!(
                "{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}",
                ha1 = ha1,
                nonce = nonce,
                nc = self.required(NC)?,
                cnonce = self.required(CNONCE)?,
                qop = q,
                ha2 = ha2
            ),
            None => format!("{ha1}:{nonce}:{ha2}", ha1 = ha1, nonce = nonce, ha2 = ha2),
        };
        Ok(self.algorithm.hash_str(&tmp))
    }
}

//endregion

//region WwwAuthenticateHeader

/// Digest challenge sent in the `WWW-Authenticate` header of a 401 response
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WwwAuthenticateHeader {
    /// Authorization realm
    pub realm: String,
    /// Offered qop options; omitted from the header when empty
    pub qop: Vec<Qop>,
    /// Server nonce
    pub nonce: String,
    /// Server opaque string
    pub opaque: String,
    /// True if the client's nonce expired and this is a fresh one
    pub stale: bool,
    /// Hashing algo
    pub algorithm: Algorithm,
}

impl WwwAuthenticateHeader {
    /// Construct from the `WWW-Authenticate` header string
    ///
    /// # Errors
    /// If the header is malformed (e.g. missing 'realm', missing a closing quote, unknown algorithm etc.)
    pub fn parse(input: &str) -> Result<Self> {
        let kv = parse_authorization(input)?;
        let required = |name: &str| {
            kv.get(name)
                .map(str::to_string)
                .ok_or_else(|| Error::MissingField(name.to_string()))
        };

        let mut qop = vec![];
        if let Some(list) = kv.get(QOP) {
            for q in list.split(',') {
                qop.push(Qop::from_str(q.trim())?);
            }
        }

        Ok(Self {
            realm: required(REALM)?,
            qop,
            nonce: required(NONCE)?,
            opaque: kv.get(OPAQUE).unwrap_or_default().to_string(),
            stale: kv
                .get("stale")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            algorithm: match kv.get(ALGORITHM) {
                Some(a) => Algorithm::from_str(a)?,
                None => Algorithm::default(),
            },
        })
    }
}

impl FromStr for WwwAuthenticateHeader {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

impl Display for WwwAuthenticateHeader {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} realm=\"{}\"", SCHEME, self.realm.quote_for_digest())?;

        if !self.qop.is_empty() {
            let list: Vec<String> = self.qop.iter().map(Qop::to_string).collect();
            write!(f, ", qop=\"{}\"", list.join(", "))?;
        }

        write!(
            f,
            ", nonce=\"{}\", opaque=\"{}\", stale=\"{}\", algorithm=\"{}\"",
            self.nonce.quote_for_digest(),
            self.opaque.quote_for_digest(),
            self.stale,
            self.algorithm
        )
    }
}

//endregion

//region TESTS


//endregion
