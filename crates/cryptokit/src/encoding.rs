//! Text encodings for ciphertext envelopes and token segments.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use common::{CryptoError, Result};

use crate::keys::{validate_hex, HexContext};

/// How an encrypted envelope is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// URL-safe base64 without padding.
    #[default]
    Base64Url,
    /// Standard base64 with padding.
    Base64,
    /// Lowercase hex.
    Hex,
    /// Raw bytes; not representable as a `String`.
    Raw,
}

impl OutputEncoding {
    /// `true` for every encoding whose output is printable text.
    pub fn is_text(self) -> bool {
        !matches!(self, OutputEncoding::Raw)
    }

    pub fn encode(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            OutputEncoding::Base64Url => URL_SAFE_NO_PAD.encode(bytes).into_bytes(),
            OutputEncoding::Base64 => STANDARD.encode(bytes).into_bytes(),
            OutputEncoding::Hex => hex::encode(bytes).into_bytes(),
            OutputEncoding::Raw => bytes.to_vec(),
        }
    }

    /// Decode input previously produced by [`OutputEncoding::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedEncoding`] if the input does not decode
    /// cleanly. Nothing cryptographic is attempted on such input.
    pub fn decode(self, input: &[u8]) -> Result<Vec<u8>> {
        let malformed = |what: &str| CryptoError::MalformedEncoding(format!("input is not valid {what}"));
        match self {
            OutputEncoding::Base64Url => URL_SAFE_NO_PAD.decode(input).map_err(|_| malformed("base64url")),
            OutputEncoding::Base64 => STANDARD.decode(input).map_err(|_| malformed("base64")),
            OutputEncoding::Hex => {
                let text = std::str::from_utf8(input).map_err(|_| malformed("hex"))?;
                if !validate_hex(text, HexContext::Data)? {
                    return Err(malformed("hex"));
                }
                hex::decode(text).map_err(|_| malformed("hex"))
            }
            OutputEncoding::Raw => Ok(input.to_vec()),
        }
    }
}

impl fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputEncoding::Base64Url => "base64url",
            OutputEncoding::Base64 => "base64",
            OutputEncoding::Hex => "hex",
            OutputEncoding::Raw => "raw",
        })
    }
}

impl FromStr for OutputEncoding {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base64url" => Ok(OutputEncoding::Base64Url),
            "base64" => Ok(OutputEncoding::Base64),
            "hex" => Ok(OutputEncoding::Hex),
            "raw" | "bytes" => Ok(OutputEncoding::Raw),
            other => Err(CryptoError::InvalidConfig(format!(
                "unknown output encoding `{other}` (expected base64url, base64, hex or raw)"
            ))),
        }
    }
}

/// Base64url without padding, as used by signed tokens and JWT segments.
pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Strict base64url decoding of one token segment.
pub fn b64url_decode(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| CryptoError::MalformedEncoding("segment is not valid base64url".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;

    #[test]
    fn each_encoding_decodes_its_own_output() {
        let data = b"\x00\x01\xfe\xff envelope";
        for enc in [
            OutputEncoding::Base64Url,
            OutputEncoding::Base64,
            OutputEncoding::Hex,
            OutputEncoding::Raw,
        ] {
            assert_eq!(enc.decode(&enc.encode(data)).unwrap(), data);
        }
    }

    #[test]
    fn base64url_has_no_padding() {
        let out = OutputEncoding::Base64Url.encode(b"ab");
        assert_eq!(out, b"YWI");
    }

    #[test]
    fn malformed_input_rejected_per_encoding() {
        let cases: [(OutputEncoding, &[u8]); 4] = [
            (OutputEncoding::Base64Url, b"ab+/"),
            (OutputEncoding::Base64, b"YWI"),
            (OutputEncoding::Hex, b"abc"),
            (OutputEncoding::Hex, b"zz"),
        ];
        for (enc, input) in cases {
            let err = enc.decode(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedEncoding, "{enc}");
        }
    }

    #[test]
    fn names_parse() {
        assert_eq!("BASE64URL".parse::<OutputEncoding>().unwrap(), OutputEncoding::Base64Url);
        assert_eq!("raw".parse::<OutputEncoding>().unwrap(), OutputEncoding::Raw);
        assert!("base32".parse::<OutputEncoding>().is_err());
        assert!(!OutputEncoding::Raw.is_text());
    }
}
