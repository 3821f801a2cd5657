//! HMAC-signed typed values with optional expiry.
//!
//! Token layout, all ASCII:
//!
//! ```text
//! base64url(payload) "." type ["." expire_epoch_ms] "." base64url(hmac)
//! ```
//!
//! The HMAC input is exactly the bytes before the final `.`.

use chrono::{DateTime, Utc};

use common::{CryptoError, ErrorPolicy, Result};

use crate::codec::{TypeTag, TypedValueCodec, Value};
use crate::crypto::{constant_time_eq, hmac, HashAlgorithm};
use crate::encoding::{b64url_decode, b64url_encode};
use crate::keys::decode_raw_key;
use crate::random;
use crate::time::{self, ExpireTime};

/// Validated configuration for [`SignedData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignedDataConfig {
    hash: HashAlgorithm,
    allow_null: bool,
    exception_on_error: bool,
}

impl SignedDataConfig {
    pub fn builder() -> SignedDataConfigBuilder {
        SignedDataConfigBuilder::default()
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn allow_null(&self) -> bool {
        self.allow_null
    }

    pub fn exception_on_error(&self) -> bool {
        self.exception_on_error
    }

    /// Signing keys are raw hex keys of the digest length.
    pub fn key_len(&self) -> usize {
        self.hash.output_len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignedDataConfigBuilder {
    inner: SignedDataConfig,
}

impl SignedDataConfigBuilder {
    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.inner.hash = hash;
        self
    }

    pub fn allow_null(mut self, allow: bool) -> Self {
        self.inner.allow_null = allow;
        self
    }

    pub fn exception_on_error(mut self, enabled: bool) -> Self {
        self.inner.exception_on_error = enabled;
        self
    }

    pub fn build(self) -> Result<SignedDataConfig> {
        Ok(self.inner)
    }
}

/// Signs and verifies [`Value`]s. Nothing is encrypted.
#[derive(Debug, Clone, Default)]
pub struct SignedData {
    config: SignedDataConfig,
    codec: TypedValueCodec,
}

impl SignedData {
    pub fn new(config: SignedDataConfig) -> Self {
        Self {
            config,
            codec: TypedValueCodec::new(config.allow_null),
        }
    }

    pub fn config(&self) -> &SignedDataConfig {
        &self.config
    }

    pub fn generate_key(&self) -> Result<String> {
        random::hex(self.config.key_len())
    }

    /// Sign `value`, optionally baking an expiry into the token.
    ///
    /// # Errors
    ///
    /// - Key errors ([`CryptoError::InvalidKeySize`], [`CryptoError::InvalidKeyFormat`]).
    /// - Codec errors for null or unsupported values.
    /// - [`CryptoError::InvalidArgument`] for a bad relative expiry.
    pub fn sign(&self, value: &Value, key: &str, expire: Option<&ExpireTime>) -> Result<String> {
        let mac_key = decode_raw_key(key, self.config.key_len())?;
        let (tag, payload) = self.codec.encode(value)?;

        let mut token = format!("{}.{}", b64url_encode(&payload), tag);
        if let Some(expire) = expire {
            let expire_ms = expire.to_epoch_millis(time::now())?;
            token.push('.');
            token.push_str(&expire_ms.to_string());
        }

        let mac = hmac(self.config.hash, &mac_key, &[token.as_bytes()])?;
        token.push('.');
        token.push_str(&b64url_encode(&mac));
        Ok(token)
    }

    /// Policy-driven verification: data errors become `Ok(None)` unless
    /// `exception_on_error` is set.
    pub fn verify(&self, token: &str, key: &str) -> Result<Option<Value>> {
        ErrorPolicy::from_exception_on_error(self.config.exception_on_error).apply(self.try_verify(token, key))
    }

    pub fn try_verify(&self, token: &str, key: &str) -> Result<Value> {
        self.try_verify_at(token, key, time::now())
    }

    /// Verify as of `now`.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::MalformedEncoding`] for a token without 3 or 4 segments.
    /// - [`CryptoError::AuthenticationFailed`] on signature mismatch.
    /// - [`CryptoError::Expired`] when `now` is past the embedded expiry.
    /// - [`CryptoError::FormatMismatch`] if the signed payload does not decode.
    pub fn try_verify_at(&self, token: &str, key: &str, now: DateTime<Utc>) -> Result<Value> {
        let mac_key = decode_raw_key(key, self.config.key_len())?;

        let (signed, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| CryptoError::MalformedEncoding("signed token has no signature segment".into()))?;
        let segments: Vec<&str> = signed.split('.').collect();
        if !(2..=3).contains(&segments.len()) {
            return Err(CryptoError::MalformedEncoding(format!(
                "signed token must have 3 or 4 segments, got {}",
                segments.len() + 1
            )));
        }

        let signature = b64url_decode(signature)?;
        let expected = hmac(self.config.hash, &mac_key, &[signed.as_bytes()])?;
        if !constant_time_eq(&expected, &signature) {
            return Err(CryptoError::AuthenticationFailed("signature mismatch".into()));
        }

        if let Some(expire) = segments.get(2) {
            let expire_ms: i64 = expire
                .parse()
                .map_err(|_| CryptoError::FormatMismatch("expiry is not an integer".into()))?;
            if now.timestamp_millis() > expire_ms {
                return Err(CryptoError::Expired(format!("token expired at {expire_ms} ms")));
            }
        }

        let tag: u8 = segments[1]
            .parse()
            .map_err(|_| CryptoError::FormatMismatch("type segment is not a tag".into()))?;
        let payload = b64url_decode(segments[0])?;
        self.codec.decode(TypeTag::try_from(tag)?, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::ErrorKind;

    fn strict() -> SignedData {
        SignedData::new(SignedDataConfig::builder().exception_on_error(true).build().unwrap())
    }

    #[test]
    fn sign_and_verify_int() {
        let sd = strict();
        let key = sd.generate_key().unwrap();
        let token = sd.sign(&Value::Int32(42), &key, None).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(sd.verify(&token, &key).unwrap(), Some(Value::Int32(42)));
    }

    #[test]
    fn token_layout() {
        let sd = strict();
        let key = "00".repeat(32);
        let token = sd.sign(&Value::from("hi"), &key, Some(&ExpireTime::EpochMillis(1234))).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts[0], "aGk");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2], "1234");
        assert_eq!(b64url_decode(parts[3]).unwrap().len(), 32);
    }

    #[test]
    fn expiry_is_distinct_from_tampering() {
        let sd = strict();
        let key = sd.generate_key().unwrap();
        let token = sd.sign(&Value::Int32(42), &key, Some(&"+2 seconds".into())).unwrap();

        let soon = time::now() + Duration::seconds(1);
        assert_eq!(sd.try_verify_at(&token, &key, soon).unwrap(), Value::Int32(42));

        let later = time::now() + Duration::seconds(3);
        let err = sd.try_verify_at(&token, &key, later).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
    }

    #[test]
    fn any_flipped_character_fails() {
        let sd = strict();
        let key = sd.generate_key().unwrap();
        let token = sd.sign(&Value::from("payload"), &key, Some(&"+1 day".into())).unwrap();
        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            if tampered == token {
                continue;
            }
            assert!(sd.try_verify(&tampered, &key).is_err(), "position {i}");
        }
    }

    #[test]
    fn wrong_key_is_authentication_failure() {
        let sd = strict();
        let token = sd.sign(&Value::Bool(true), &"11".repeat(32), None).unwrap();
        let err = sd.try_verify(&token, &"22".repeat(32)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn segment_count_enforced() {
        let sd = strict();
        let key = "00".repeat(32);
        for bad in ["abc", "a.b", "a.b.c.d.e"] {
            let err = sd.try_verify(bad, &key).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedEncoding, "{bad}");
        }
    }

    #[test]
    fn default_policy_swallows_data_errors_only() {
        let sd = SignedData::default();
        let key = "00".repeat(32);
        assert_eq!(sd.verify("a.b.c", &key).unwrap(), None);
        let err = sd.verify("a.b.c", "00").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKeySize);
    }

    #[test]
    fn key_length_follows_hash() {
        let sd = SignedData::new(SignedDataConfig::builder().hash(HashAlgorithm::Sha512).build().unwrap());
        assert_eq!(sd.generate_key().unwrap().len(), 128);
        let err = sd.sign(&Value::Int32(1), &"00".repeat(32), None).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeySize { expected: 64, actual: 32 }));
    }
}
