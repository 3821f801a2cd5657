//! Authenticated encryption of typed values.
//!
//! # Envelope
//!
//! ```text
//! non-AEAD, authenticated:  ciphertext || IV || HMAC(ciphertext || IV || AAD)
//! non-AEAD, unauthenticated: ciphertext || IV
//! AEAD (GCM/CCM):            ciphertext || IV || tag(16)
//! ```
//!
//! The envelope is then rendered with the configured [`OutputEncoding`].
//!
//! Decryption checks, in order: encoding, minimum size, HMAC (constant time,
//! before any decryption is attempted), cipher, typed-value decoding. Each step
//! has its own [`CryptoError`] kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use common::{CryptoError, ErrorPolicy, Result};

use crate::codec::{TypedValueCodec, Value};
use crate::crypto::{cipher, constant_time_eq, hmac, CipherAlgorithm, HashAlgorithm, TAG_LEN};
use crate::encoding::OutputEncoding;
use crate::keys::{KeyDerivation, KeySizes, KeyType, Pbkdf2Params};
use crate::random;

/// Whether plaintext carries a type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataFormat {
    /// Values are encoded with [`TypedValueCodec`] and come back with their type.
    #[default]
    Typed,
    /// Plaintext is used as-is; only strings (or raw bytes) are accepted.
    StringOnly,
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataFormat::Typed => "typed",
            DataFormat::StringOnly => "string-only",
        })
    }
}

impl FromStr for DataFormat {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "typed" | "type-byte" => Ok(DataFormat::Typed),
            "string-only" => Ok(DataFormat::StringOnly),
            other => Err(CryptoError::InvalidConfig(format!(
                "unknown data format `{other}` (expected typed or string-only)"
            ))),
        }
    }
}

/// Validated, immutable configuration for [`Encryption`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
    key_derivation: KeyDerivation,
    encrypt_then_authenticate: bool,
    output: OutputEncoding,
    data_format: DataFormat,
    allow_null: bool,
    exception_on_error: bool,
}

impl EncryptionConfig {
    pub fn builder() -> EncryptionConfigBuilder {
        EncryptionConfigBuilder::default()
    }

    pub fn cipher(&self) -> CipherAlgorithm {
        self.cipher
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn key_derivation(&self) -> KeyDerivation {
        self.key_derivation
    }

    pub fn encrypt_then_authenticate(&self) -> bool {
        self.encrypt_then_authenticate
    }

    pub fn output(&self) -> OutputEncoding {
        self.output
    }

    pub fn data_format(&self) -> DataFormat {
        self.data_format
    }

    pub fn allow_null(&self) -> bool {
        self.allow_null
    }

    pub fn exception_on_error(&self) -> bool {
        self.exception_on_error
    }

    /// `true` if an HMAC is appended (non-AEAD with authentication on).
    pub fn uses_hmac(&self) -> bool {
        self.encrypt_then_authenticate && !self.cipher.is_aead()
    }

    /// Key segment sizes this configuration derives.
    pub fn key_sizes(&self) -> KeySizes {
        let mac_bits = if self.encrypt_then_authenticate {
            self.hash.output_len() * 8
        } else {
            0
        };
        KeySizes::from_bits(self.cipher.key_size.bits(), mac_bits, self.cipher.is_aead())
    }

    /// Bytes appended after the IV: AEAD tag, HMAC, or nothing.
    pub fn trailer_len(&self) -> usize {
        if self.cipher.is_aead() {
            TAG_LEN
        } else if self.encrypt_then_authenticate {
            self.hash.output_len()
        } else {
            0
        }
    }

    /// Smallest envelope this configuration can produce.
    pub fn min_envelope_len(&self) -> usize {
        self.cipher.min_ciphertext_len() + self.cipher.iv_len() + self.trailer_len()
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            cipher: CipherAlgorithm::default(),
            hash: HashAlgorithm::Sha256,
            key_derivation: KeyDerivation::default(),
            encrypt_then_authenticate: true,
            output: OutputEncoding::Base64Url,
            data_format: DataFormat::Typed,
            allow_null: false,
            exception_on_error: false,
        }
    }
}

/// Builder for [`EncryptionConfig`]. Validation happens once, in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct EncryptionConfigBuilder {
    inner: EncryptionConfig,
}

impl EncryptionConfigBuilder {
    pub fn cipher(mut self, cipher: CipherAlgorithm) -> Self {
        self.inner.cipher = cipher;
        self
    }

    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.inner.hash = hash;
        self
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.inner.key_derivation.key_type = key_type;
        self
    }

    pub fn pbkdf2(mut self, params: Pbkdf2Params) -> Self {
        self.inner.key_derivation.pbkdf2 = params;
        self
    }

    pub fn encrypt_then_authenticate(mut self, enabled: bool) -> Self {
        self.inner.encrypt_then_authenticate = enabled;
        self
    }

    pub fn output(mut self, output: OutputEncoding) -> Self {
        self.inner.output = output;
        self
    }

    pub fn data_format(mut self, format: DataFormat) -> Self {
        self.inner.data_format = format;
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

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] for a zero PBKDF2 iteration count.
    pub fn build(self) -> Result<EncryptionConfig> {
        if self.inner.key_derivation.pbkdf2.iterations == 0 {
            return Err(CryptoError::InvalidConfig("PBKDF2 iterations must be > 0".into()));
        }
        Ok(self.inner)
    }
}

/// Encrypts and decrypts [`Value`]s with a fixed [`EncryptionConfig`].
#[derive(Debug, Clone, Default)]
pub struct Encryption {
    config: EncryptionConfig,
    codec: TypedValueCodec,
}

impl Encryption {
    pub fn new(config: EncryptionConfig) -> Self {
        let codec = TypedValueCodec::new(config.allow_null);
        Self { config, codec }
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    /// `true` iff the configured cipher is GCM or CCM.
    pub fn is_aead_mode(&self) -> bool {
        self.config.cipher.is_aead()
    }

    /// Generate a random hex key of the size this configuration requires.
    pub fn generate_key(&self) -> Result<String> {
        random::hex(self.config.key_sizes().total())
    }

    /// Encrypt `value` and render it as text.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidConfig`] if the output encoding is `raw`.
    /// - [`CryptoError::NullNotAllowed`] / [`CryptoError::InvalidDataType`] from encoding.
    /// - Key errors from [`KeyDerivation::derive`].
    pub fn encrypt(&self, value: &Value, key: &str) -> Result<String> {
        self.encrypt_with_aad(value, key, b"")
    }

    /// [`encrypt`](Self::encrypt) binding additional authenticated data.
    pub fn encrypt_with_aad(&self, value: &Value, key: &str, aad: &[u8]) -> Result<String> {
        if !self.config.output.is_text() {
            return Err(CryptoError::InvalidConfig(
                "raw output cannot be returned as text; use encrypt_to_bytes".into(),
            ));
        }
        let bytes = self.encrypt_to_bytes(value, key, aad)?;
        String::from_utf8(bytes).map_err(|e| CryptoError::InvalidConfig(e.to_string()))
    }

    /// Encrypt `value` and render it with the configured encoding, any encoding allowed.
    pub fn encrypt_to_bytes(&self, value: &Value, key: &str, aad: &[u8]) -> Result<Vec<u8>> {
        let plaintext = match self.config.data_format {
            DataFormat::Typed => self.codec.to_tagged_bytes(value)?,
            DataFormat::StringOnly => match value {
                Value::Str(s) => s.as_bytes().to_vec(),
                other => {
                    return Err(CryptoError::InvalidDataType(format!(
                        "string-only format accepts strings, got {:?}",
                        other.type_tag()
                    )))
                }
            },
        };
        let envelope = self.seal(&plaintext, key, aad)?;
        Ok(self.config.output.encode(&envelope))
    }

    /// Decrypt text produced by [`encrypt`](Self::encrypt).
    ///
    /// Data errors become `Ok(None)` unless `exception_on_error` is set;
    /// key and configuration errors are always returned.
    pub fn decrypt(&self, text: &str, key: &str) -> Result<Option<Value>> {
        self.decrypt_with_aad(text, key, b"")
    }

    /// [`decrypt`](Self::decrypt) with additional authenticated data.
    pub fn decrypt_with_aad(&self, text: &str, key: &str, aad: &[u8]) -> Result<Option<Value>> {
        self.policy().apply(self.try_decrypt(text.as_bytes(), key, aad))
    }

    /// Policy-driven decryption of output from [`encrypt_to_bytes`](Self::encrypt_to_bytes).
    pub fn decrypt_bytes(&self, input: &[u8], key: &str, aad: &[u8]) -> Result<Option<Value>> {
        self.policy().apply(self.try_decrypt(input, key, aad))
    }

    /// Like [`decrypt_bytes`](Self::decrypt_bytes) but skips typed decoding and
    /// returns the plaintext bytes.
    pub fn decrypt_bytes_raw(&self, input: &[u8], key: &str, aad: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = self
            .config
            .output
            .decode(input)
            .and_then(|envelope| self.open(&envelope, key, aad));
        self.policy().apply(result)
    }

    /// Decrypt, always surfacing the specific error.
    pub fn try_decrypt(&self, input: &[u8], key: &str, aad: &[u8]) -> Result<Value> {
        let envelope = self.config.output.decode(input)?;
        let plaintext = self.open(&envelope, key, aad)?;
        match self.config.data_format {
            DataFormat::Typed => self.codec.from_tagged_bytes(&plaintext),
            DataFormat::StringOnly => String::from_utf8(plaintext)
                .map(Value::Str)
                .map_err(|_| CryptoError::FormatMismatch("plaintext is not UTF-8".into())),
        }
    }

    /// Encrypt raw bytes into an un-encoded envelope.
    pub fn seal(&self, plaintext: &[u8], key: &str, aad: &[u8]) -> Result<Vec<u8>> {
        let cfg = &self.config;
        let iv = random::bytes(cfg.cipher.iv_len())?;
        let keys = cfg.key_derivation.derive(key, &iv, cfg.key_sizes())?;

        let sealed = cipher::encrypt(cfg.cipher, keys.enc_key(), &iv, plaintext, aad)?;
        let mut envelope = sealed.ciphertext;
        envelope.extend_from_slice(&iv);

        if let Some(tag) = sealed.tag {
            envelope.extend_from_slice(&tag);
        } else if let Some(mac_key) = keys.mac_key() {
            let mac = hmac(cfg.hash, mac_key, &[envelope.as_slice(), aad])?;
            envelope.extend_from_slice(&mac);
        }
        Ok(envelope)
    }

    /// Decrypt an un-encoded envelope back to raw bytes.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::TooShort`] before anything else is attempted.
    /// - [`CryptoError::AuthenticationFailed`] on HMAC or tag mismatch.
    /// - [`CryptoError::DecryptionFailed`] if the cipher rejects the ciphertext.
    pub fn open(&self, envelope: &[u8], key: &str, aad: &[u8]) -> Result<Vec<u8>> {
        let cfg = &self.config;
        let minimum = cfg.min_envelope_len();
        if envelope.len() < minimum {
            return Err(CryptoError::TooShort {
                minimum,
                actual: envelope.len(),
            });
        }

        let (body, trailer) = envelope.split_at(envelope.len() - cfg.trailer_len());
        let (ciphertext, iv) = body.split_at(body.len() - cfg.cipher.iv_len());
        let keys = cfg.key_derivation.derive(key, iv, cfg.key_sizes())?;

        if cfg.cipher.is_aead() {
            return cipher::decrypt(cfg.cipher, keys.enc_key(), iv, ciphertext, Some(trailer), aad);
        }

        if let Some(mac_key) = keys.mac_key() {
            let expected = hmac(cfg.hash, mac_key, &[body, aad])?;
            if !constant_time_eq(&expected, trailer) {
                return Err(CryptoError::AuthenticationFailed("HMAC mismatch".into()));
            }
        }
        cipher::decrypt(cfg.cipher, keys.enc_key(), iv, ciphertext, None, aad)
    }

    fn policy(&self) -> ErrorPolicy {
        ErrorPolicy::from_exception_on_error(self.config.exception_on_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;
    use serde_json::json;

    fn zero_key() -> String {
        "00".repeat(64)
    }

    fn strict(builder: EncryptionConfigBuilder) -> Encryption {
        Encryption::new(builder.exception_on_error(true).build().unwrap())
    }

    #[test]
    fn hello_round_trip_and_wrong_key() {
        let enc = strict(EncryptionConfig::builder());
        let ct = enc.encrypt(&Value::from("hello"), &zero_key()).unwrap();
        assert_eq!(enc.decrypt(&ct, &zero_key()).unwrap(), Some(Value::from("hello")));

        let err = enc.decrypt(&ct, &"01".repeat(64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn default_policy_returns_none_on_tampering() {
        let enc = Encryption::default();
        let ct = enc.encrypt(&Value::from("hello"), &zero_key()).unwrap();
        assert_eq!(enc.decrypt(&ct, &"01".repeat(64)).unwrap(), None);
        assert_eq!(enc.decrypt("!!not base64!!", &zero_key()).unwrap(), None);
    }

    #[test]
    fn default_policy_still_reports_bad_key_size() {
        let enc = Encryption::default();
        let ct = enc.encrypt(&Value::from("x"), &zero_key()).unwrap();
        let err = enc.decrypt(&ct, &"00".repeat(10)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeySize { expected: 64, actual: 10 }));
    }

    #[test]
    fn typed_values_keep_their_type() {
        let enc = strict(EncryptionConfig::builder().allow_null(true));
        let key = enc.generate_key().unwrap();
        for v in [
            Value::Null,
            Value::Int32(42),
            Value::Int64(-9_000_000_000),
            Value::Float(0.5),
            Value::Bool(false),
            Value::Json(json!({"user": "alice", "roles": ["admin"]})),
        ] {
            let ct = enc.encrypt(&v, &key).unwrap();
            assert_eq!(enc.decrypt(&ct, &key).unwrap(), Some(v));
        }
    }

    #[test]
    fn null_rejected_by_default() {
        let enc = Encryption::default();
        let err = enc.encrypt(&Value::Null, &zero_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullNotAllowed);
    }

    #[test]
    fn every_cipher_and_encoding_round_trips() {
        for name in ["aes-128-cbc", "aes-192-ctr", "aes-256-gcm", "aes-128-ccm"] {
            for output in [OutputEncoding::Base64Url, OutputEncoding::Base64, OutputEncoding::Hex] {
                let enc = strict(
                    EncryptionConfig::builder()
                        .cipher(name.parse().unwrap())
                        .hash(HashAlgorithm::Sha384)
                        .output(output),
                );
                let key = enc.generate_key().unwrap();
                let ct = enc.encrypt(&Value::from("payload"), &key).unwrap();
                assert_eq!(enc.decrypt(&ct, &key).unwrap(), Some(Value::from("payload")), "{name} {output}");
            }
        }
    }

    #[test]
    fn generated_key_size_matches_mode() {
        let cbc = Encryption::default();
        assert_eq!(cbc.generate_key().unwrap().len(), 128);
        let gcm = strict(EncryptionConfig::builder().cipher(CipherAlgorithm::AES_256_GCM));
        assert!(gcm.is_aead_mode());
        assert_eq!(gcm.generate_key().unwrap().len(), 64);
        let unauth = strict(EncryptionConfig::builder().encrypt_then_authenticate(false));
        assert_eq!(unauth.generate_key().unwrap().len(), 64);
    }

    #[test]
    fn flipping_any_byte_is_detected() {
        let enc = strict(EncryptionConfig::builder().output(OutputEncoding::Raw));
        let key = enc.generate_key().unwrap();
        let envelope = enc.encrypt_to_bytes(&Value::from("integrity"), &key, b"").unwrap();
        for i in 0..envelope.len() {
            let mut tampered = envelope.clone();
            tampered[i] ^= 0x01;
            let err = enc.try_decrypt(&tampered, &key, b"").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AuthenticationFailed, "byte {i}");
        }
    }

    #[test]
    fn aad_must_match() {
        let enc = strict(EncryptionConfig::builder());
        let key = enc.generate_key().unwrap();
        let ct = enc.encrypt_with_aad(&Value::from("v"), &key, b"user-1").unwrap();
        assert!(enc.decrypt_with_aad(&ct, &key, b"user-1").unwrap().is_some());
        let err = enc.decrypt_with_aad(&ct, &key, b"user-2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn too_short_checked_before_decryption() {
        let enc = strict(EncryptionConfig::builder().output(OutputEncoding::Hex));
        let err = enc.decrypt(&"ab".repeat(40), &zero_key()).unwrap_err();
        assert!(matches!(err, CryptoError::TooShort { minimum: 64, actual: 40 }));
    }

    #[test]
    fn malformed_encoding_reported() {
        let enc = strict(EncryptionConfig::builder().output(OutputEncoding::Hex));
        let err = enc.decrypt("not-hex", &zero_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEncoding);
    }

    #[test]
    fn unauthenticated_cbc_reports_padding_failure() {
        let enc = strict(
            EncryptionConfig::builder()
                .encrypt_then_authenticate(false)
                .output(OutputEncoding::Raw),
        );
        let key = enc.generate_key().unwrap();
        let mut envelope = enc.encrypt_to_bytes(&Value::from("x"), &key, b"").unwrap();
        // One block; flipping the last IV byte turns the 0x0e pad byte into 0xf1.
        envelope[31] ^= 0xFF;
        let err = enc.try_decrypt(&envelope, &key, b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
    }

    #[test]
    fn password_keys_round_trip() {
        let enc = strict(EncryptionConfig::builder().key_type(KeyType::Password).pbkdf2(Pbkdf2Params {
            hash: HashAlgorithm::Sha256,
            iterations: 1_000,
        }));
        let ct = enc.encrypt(&Value::Int32(7), "hunter2").unwrap();
        assert_eq!(enc.decrypt(&ct, "hunter2").unwrap(), Some(Value::Int32(7)));
        let err = enc.decrypt(&ct, "hunter3").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn string_only_format() {
        let enc = strict(EncryptionConfig::builder().data_format(DataFormat::StringOnly));
        let key = enc.generate_key().unwrap();
        let ct = enc.encrypt(&Value::from("plain"), &key).unwrap();
        assert_eq!(enc.decrypt(&ct, &key).unwrap(), Some(Value::from("plain")));
        let err = enc.encrypt(&Value::Int32(1), &key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDataType);
    }

    #[test]
    fn raw_output_needs_byte_api() {
        let enc = strict(EncryptionConfig::builder().output(OutputEncoding::Raw));
        let err = enc.encrypt(&Value::from("x"), &zero_key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let bytes = enc.encrypt_to_bytes(&Value::from("x"), &zero_key(), b"").unwrap();
        assert_eq!(enc.decrypt_bytes(&bytes, &zero_key(), b"").unwrap(), Some(Value::from("x")));
        assert_eq!(
            enc.decrypt_bytes_raw(&bytes, &zero_key(), b"").unwrap(),
            Some(b"x\x01".to_vec())
        );
    }

    #[test]
    fn zero_iterations_rejected_at_build() {
        let err = EncryptionConfig::builder()
            .pbkdf2(Pbkdf2Params {
                hash: HashAlgorithm::Sha512,
                iterations: 0,
            })
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
