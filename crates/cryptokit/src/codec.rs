//! Typed values and their tagged byte representation.
//!
//! Encrypted and signed payloads carry a one-byte type tag so a value comes
//! back with the type it went in with. Decoding never coerces: a tag/bytes
//! pair that does not parse as its declared type is a
//! [`CryptoError::FormatMismatch`].
//!
//! | Tag | Variant  | Bytes                              |
//! |-----|----------|------------------------------------|
//! | 0   | `Null`   | a single `0x00`                    |
//! | 1   | `Str`    | UTF-8 text as-is                   |
//! | 2   | `Int32`  | decimal text                       |
//! | 3   | `Int64`  | decimal text                       |
//! | 4   | `Float`  | shortest round-trip decimal text   |
//! | 5   | `Bool`   | `"0"` or `"1"`                     |
//! | 6   | `Json`   | JSON text of an array or object    |
//!
//! Integers are tagged by variant, never by host word size.

use std::fmt;

use common::{CryptoError, Result};

/// A value that can be encrypted or signed.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Str(String),
    Int32(i32),
    Int64(i64),
    Float(f64),
    Bool(bool),
    /// An array or object. Scalars belong in the other variants.
    Json(serde_json::Value),
}

impl Value {
    /// The variant's type tag.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Null,
            Value::Str(_) => TypeTag::Str,
            Value::Int32(_) => TypeTag::Int32,
            Value::Int64(_) => TypeTag::Int64,
            Value::Float(_) => TypeTag::Float,
            Value::Bool(_) => TypeTag::Bool,
            Value::Json(_) => TypeTag::Json,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

/// Picks `Int32` when the value fits, `Int64` otherwise.
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        match i32::try_from(v) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// One-byte type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Null = 0,
    Str = 1,
    Int32 = 2,
    Int64 = 3,
    Float = 4,
    Bool = 5,
    Json = 6,
}

impl TypeTag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for TypeTag {
    type Error = CryptoError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => TypeTag::Null,
            1 => TypeTag::Str,
            2 => TypeTag::Int32,
            3 => TypeTag::Int64,
            4 => TypeTag::Float,
            5 => TypeTag::Bool,
            6 => TypeTag::Json,
            other => return Err(CryptoError::FormatMismatch(format!("unknown type tag {other}"))),
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Encoder/decoder between [`Value`] and tagged bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypedValueCodec {
    pub allow_null: bool,
}

impl TypedValueCodec {
    pub fn new(allow_null: bool) -> Self {
        Self { allow_null }
    }

    /// Encode a value into its tag and payload bytes.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::NullNotAllowed`] for `Null` unless `allow_null` is set.
    /// - [`CryptoError::InvalidDataType`] for a `Json` value that is not an array or object.
    pub fn encode(&self, value: &Value) -> Result<(TypeTag, Vec<u8>)> {
        let bytes = match value {
            Value::Null if !self.allow_null => return Err(CryptoError::NullNotAllowed),
            Value::Null => vec![0u8],
            Value::Str(s) => s.as_bytes().to_vec(),
            Value::Int32(n) => n.to_string().into_bytes(),
            Value::Int64(n) => n.to_string().into_bytes(),
            Value::Float(n) => n.to_string().into_bytes(),
            Value::Bool(b) => if *b { b"1".to_vec() } else { b"0".to_vec() },
            Value::Json(json) => {
                if !(json.is_array() || json.is_object()) {
                    return Err(CryptoError::InvalidDataType(
                        "JSON values must be arrays or objects; use the scalar variants otherwise".into(),
                    ));
                }
                serde_json::to_vec(json).map_err(|e| CryptoError::InvalidDataType(e.to_string()))?
            }
        };
        Ok((value.type_tag(), bytes))
    }

    /// Decode payload bytes declared as `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::FormatMismatch`] if the bytes are not a valid
    /// rendering of the declared type.
    pub fn decode(&self, tag: TypeTag, bytes: &[u8]) -> Result<Value> {
        let mismatch = |what: &str| CryptoError::FormatMismatch(format!("payload is not a valid {what}"));
        match tag {
            TypeTag::Null => match bytes {
                [0] => Ok(Value::Null),
                _ => Err(mismatch("null")),
            },
            TypeTag::Str => String::from_utf8(bytes.to_vec())
                .map(Value::Str)
                .map_err(|_| mismatch("UTF-8 string")),
            TypeTag::Int32 => parse_text(bytes)
                .and_then(|s| s.parse::<i32>().ok())
                .map(Value::Int32)
                .ok_or_else(|| mismatch("32-bit integer")),
            TypeTag::Int64 => parse_text(bytes)
                .and_then(|s| s.parse::<i64>().ok())
                .map(Value::Int64)
                .ok_or_else(|| mismatch("64-bit integer")),
            TypeTag::Float => parse_text(bytes)
                .and_then(|s| s.parse::<f64>().ok())
                .map(Value::Float)
                .ok_or_else(|| mismatch("float")),
            TypeTag::Bool => match bytes {
                b"1" => Ok(Value::Bool(true)),
                b"0" => Ok(Value::Bool(false)),
                _ => Err(mismatch("boolean")),
            },
            TypeTag::Json => match serde_json::from_slice::<serde_json::Value>(bytes) {
                Ok(json) if json.is_array() || json.is_object() => Ok(Value::Json(json)),
                _ => Err(mismatch("JSON array or object")),
            },
        }
    }

    /// `payload || tag`, the plaintext layout used inside ciphertext envelopes.
    pub fn to_tagged_bytes(&self, value: &Value) -> Result<Vec<u8>> {
        let (tag, mut bytes) = self.encode(value)?;
        bytes.push(tag.as_u8());
        Ok(bytes)
    }

    /// Inverse of [`TypedValueCodec::to_tagged_bytes`].
    pub fn from_tagged_bytes(&self, tagged: &[u8]) -> Result<Value> {
        let (tag, payload) = tagged
            .split_last()
            .ok_or_else(|| CryptoError::FormatMismatch("missing type tag".into()))?;
        self.decode(TypeTag::try_from(*tag)?, payload)
    }
}

fn parse_text(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;
    use serde_json::json;

    fn codec() -> TypedValueCodec {
        TypedValueCodec::new(true)
    }

    #[test]
    fn every_type_round_trips_through_tagged_bytes() {
        let values = [
            Value::Null,
            Value::from("hello"),
            Value::from(""),
            Value::Int32(-42),
            Value::Int64(i64::MAX),
            Value::Float(3.25),
            Value::Float(-1.0e-300),
            Value::Bool(true),
            Value::Bool(false),
            Value::Json(json!({"a": [1, 2, 3]})),
            Value::Json(json!([])),
        ];
        for v in values {
            let tagged = codec().to_tagged_bytes(&v).unwrap();
            assert_eq!(codec().from_tagged_bytes(&tagged).unwrap(), v);
        }
    }

    #[test]
    fn int_tagging_follows_variant() {
        assert_eq!(Value::Int64(5).type_tag(), TypeTag::Int64);
        let tagged = codec().to_tagged_bytes(&Value::Int64(5)).unwrap();
        assert_eq!(codec().from_tagged_bytes(&tagged).unwrap(), Value::Int64(5));
        assert_eq!(Value::from(5i64), Value::Int32(5));
        assert_eq!(Value::from(1i64 << 40), Value::Int64(1 << 40));
    }

    #[test]
    fn null_requires_opt_in() {
        let err = TypedValueCodec::new(false).encode(&Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullNotAllowed);
        let (tag, bytes) = codec().encode(&Value::Null).unwrap();
        assert_eq!(tag, TypeTag::Null);
        assert_eq!(bytes, vec![0u8]);
    }

    #[test]
    fn json_scalar_is_invalid_data_type() {
        let err = codec().encode(&Value::Json(json!(12))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDataType);
    }

    #[test]
    fn decode_failures_are_format_mismatch() {
        let cases: [(TypeTag, &[u8]); 6] = [
            (TypeTag::Int32, b"99999999999"),
            (TypeTag::Int64, b"12a"),
            (TypeTag::Float, b"one"),
            (TypeTag::Bool, b"true"),
            (TypeTag::Json, b"{not json"),
            (TypeTag::Null, b"\x01"),
        ];
        for (tag, bytes) in cases {
            let err = codec().decode(tag, bytes).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FormatMismatch, "{tag:?}");
        }
    }

    #[test]
    fn unknown_tag_is_format_mismatch() {
        let err = codec().from_tagged_bytes(b"abc\x07").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);
        assert!(codec().from_tagged_bytes(b"").is_err());
    }

    #[test]
    fn bool_and_int_text_forms() {
        assert_eq!(codec().encode(&Value::Bool(true)).unwrap().1, b"1");
        assert_eq!(codec().encode(&Value::Int32(-7)).unwrap().1, b"-7");
    }
}
