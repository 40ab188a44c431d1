use crate::{Error, Error::*, Result};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use digest::{Digest, DynDigest};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512_256};

/// Hash algorithm used for the HA1/HA2/RESPONSE chain
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "MD5")]
    MD5,
    #[serde(rename = "SHA-256")]
    SHA2_256,
    #[serde(rename = "SHA-512-256")]
    SHA2_512_256,
}

impl Algorithm {
    /// Calculate a hash of bytes using the selected algorithm, as lower-case hex
    pub fn hash(self, bytes: &[u8]) -> String {
        let mut hash: Box<dyn DynDigest> = match self {
            Algorithm::MD5 => Box::new(Md5::new()),
            Algorithm::SHA2_256 => Box::new(Sha256::new()),
            Algorithm::SHA2_512_256 => Box::new(Sha512_256::new()),
        };

        hash.update(bytes);
        hex::encode(hash.finalize())
    }

    /// Calculate a hash of string's bytes using the selected algorithm
    pub fn hash_str(self, bytes: &str) -> String {
        self.hash(bytes.as_bytes())
    }

    /// Label advertised in the `algorithm` challenge field
    pub fn label(self) -> &'static str {
        match self {
            Algorithm::MD5 => "MD5",
            Algorithm::SHA2_256 => "SHA-256",
            Algorithm::SHA2_512_256 => "SHA-512-256",
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    /// Parse from the format used in WWW-Authenticate. Matching is case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Algorithm::MD5),
            "SHA-256" => Ok(Algorithm::SHA2_256),
            "SHA-512-256" => Ok(Algorithm::SHA2_512_256),
            _ => Err(UnknownAlgorithm(s.into())),
        }
    }
}

impl Display for Algorithm {
    /// Format to the form used in HTTP headers
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// QOP field values
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum Qop {
    #[serde(rename = "auth")]
    AUTH,
    #[serde(rename = "auth-int")]
    AUTH_INT,
}

impl FromStr for Qop {
    type Err = Error;

    /// Parse from "auth" or "auth-int" as used in HTTP headers
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auth" => Ok(Qop::AUTH),
            "auth-int" => Ok(Qop::AUTH_INT),
            _ => Err(BadQop(s.into())),
        }
    }
}

impl Display for Qop {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Qop::AUTH => "auth",
            Qop::AUTH_INT => "auth-int",
        })
    }
}
