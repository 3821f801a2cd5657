use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use common::{CryptoError, Result};

use crate::crypto::HashAlgorithm;

/// Signature family of a JWT algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Hmac,
    Rsa,
}

/// Supported JWS algorithms. `none` and ECDSA are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JwtAlgorithm {
    #[default]
    Hs256,
    Hs384,
    Hs512,
    Rs256,
    Rs384,
    Rs512,
}

impl JwtAlgorithm {
    pub const ALL: [JwtAlgorithm; 6] = [
        JwtAlgorithm::Hs256,
        JwtAlgorithm::Hs384,
        JwtAlgorithm::Hs512,
        JwtAlgorithm::Rs256,
        JwtAlgorithm::Rs384,
        JwtAlgorithm::Rs512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JwtAlgorithm::Hs256 => "HS256",
            JwtAlgorithm::Hs384 => "HS384",
            JwtAlgorithm::Hs512 => "HS512",
            JwtAlgorithm::Rs256 => "RS256",
            JwtAlgorithm::Rs384 => "RS384",
            JwtAlgorithm::Rs512 => "RS512",
        }
    }

    pub fn family(self) -> AlgorithmFamily {
        match self {
            JwtAlgorithm::Hs256 | JwtAlgorithm::Hs384 | JwtAlgorithm::Hs512 => AlgorithmFamily::Hmac,
            JwtAlgorithm::Rs256 | JwtAlgorithm::Rs384 | JwtAlgorithm::Rs512 => AlgorithmFamily::Rsa,
        }
    }

    pub fn hash(self) -> HashAlgorithm {
        match self {
            JwtAlgorithm::Hs256 | JwtAlgorithm::Rs256 => HashAlgorithm::Sha256,
            JwtAlgorithm::Hs384 | JwtAlgorithm::Rs384 => HashAlgorithm::Sha384,
            JwtAlgorithm::Hs512 | JwtAlgorithm::Rs512 => HashAlgorithm::Sha512,
        }
    }

    /// Required HMAC key length in bytes; `None` for RSA.
    pub fn hmac_key_len(self) -> Option<usize> {
        match self.family() {
            AlgorithmFamily::Hmac => Some(self.hash().output_len()),
            AlgorithmFamily::Rsa => None,
        }
    }
}

impl fmt::Display for JwtAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JwtAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        JwtAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == s)
            .ok_or_else(|| {
                let reason = if s.eq_ignore_ascii_case("none") {
                    "unsigned tokens are never accepted"
                } else if s.starts_with("ES") || s.starts_with("PS") {
                    "algorithm family is not supported"
                } else {
                    "unknown algorithm"
                };
                CryptoError::AlgorithmNotAllowed(format!("`{s}`: {reason}"))
            })
    }
}

impl TryFrom<String> for JwtAlgorithm {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<JwtAlgorithm> for String {
    fn from(alg: JwtAlgorithm) -> Self {
        alg.name().to_owned()
    }
}
