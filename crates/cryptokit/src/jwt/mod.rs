//! JSON Web Tokens (RFC 7519, compact serialisation) with HS* and RS* signatures.
//!
//! Decoding refuses any `alg` outside the configured allow-list, which by
//! default holds only the configured algorithm.

pub mod algorithm;
pub mod claims;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use common::protocol::JwtHeader;
use common::{CryptoError, ErrorPolicy, Result};

use crate::crypto::{constant_time_eq, hmac, HashAlgorithm};
use crate::encoding::{b64url_decode, b64url_encode};
use crate::keys::is_hex;
use crate::public_key::{self, RsaKeyPair, DEFAULT_RSA_BITS};
use crate::{random, time};

pub use algorithm::{AlgorithmFamily, JwtAlgorithm};
pub use claims::ClaimRules;

/// A JWT payload: an open JSON object.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Validated configuration for [`Jwt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtConfig {
    algorithm: JwtAlgorithm,
    allowed: Vec<JwtAlgorithm>,
    rules: ClaimRules,
    insecure_key: bool,
    exception_on_error: bool,
}

impl JwtConfig {
    pub fn builder() -> JwtConfigBuilder {
        JwtConfigBuilder::default()
    }

    pub fn algorithm(&self) -> JwtAlgorithm {
        self.algorithm
    }

    pub fn allowed_algorithms(&self) -> &[JwtAlgorithm] {
        &self.allowed
    }

    pub fn rules(&self) -> &ClaimRules {
        &self.rules
    }

    pub fn insecure_key(&self) -> bool {
        self.insecure_key
    }

    pub fn exception_on_error(&self) -> bool {
        self.exception_on_error
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: JwtAlgorithm::default(),
            allowed: vec![JwtAlgorithm::default()],
            rules: ClaimRules {
                validate_defined_claims: true,
                ..ClaimRules::default()
            },
            insecure_key: false,
            exception_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JwtConfigBuilder {
    inner: JwtConfig,
    allowed: Option<Vec<JwtAlgorithm>>,
}

impl JwtConfigBuilder {
    pub fn algorithm(mut self, algorithm: JwtAlgorithm) -> Self {
        self.inner.algorithm = algorithm;
        self
    }

    /// Algorithms accepted by `decode`. Defaults to just [`algorithm`](Self::algorithm).
    pub fn allowed_algorithms(mut self, allowed: impl IntoIterator<Item = JwtAlgorithm>) -> Self {
        self.allowed = Some(allowed.into_iter().collect());
        self
    }

    pub fn issuers(mut self, issuers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.rules.issuers = issuers.into_iter().map(Into::into).collect();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.inner.rules.subject = Some(subject.into());
        self
    }

    pub fn audiences(mut self, audiences: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.rules.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    pub fn jwt_id(mut self, jti: impl Into<String>) -> Self {
        self.inner.rules.jwt_id = Some(jti.into());
        self
    }

    pub fn require_exp(mut self, required: bool) -> Self {
        self.inner.rules.require_exp = required;
        self
    }

    pub fn require_nbf(mut self, required: bool) -> Self {
        self.inner.rules.require_nbf = required;
        self
    }

    pub fn require_iat(mut self, required: bool) -> Self {
        self.inner.rules.require_iat = required;
        self
    }

    pub fn validate_defined_claims(mut self, enabled: bool) -> Self {
        self.inner.rules.validate_defined_claims = enabled;
        self
    }

    pub fn leeway_secs(mut self, leeway: u64) -> Self {
        self.inner.rules.leeway_secs = leeway;
        self
    }

    /// Accept HMAC keys of any non-empty length.
    pub fn insecure_key(mut self, enabled: bool) -> Self {
        self.inner.insecure_key = enabled;
        self
    }

    pub fn exception_on_error(mut self, enabled: bool) -> Self {
        self.inner.exception_on_error = enabled;
        self
    }

    /// # Errors
    ///
    /// [`CryptoError::InvalidConfig`] if an explicit allow-list is empty.
    pub fn build(mut self) -> Result<JwtConfig> {
        self.inner.allowed = match self.allowed {
            Some(list) if list.is_empty() => {
                return Err(CryptoError::InvalidConfig("JWT allow-list must not be empty".into()))
            }
            Some(list) => list,
            None => vec![self.inner.algorithm],
        };
        Ok(self.inner)
    }
}

/// Key material produced by [`Jwt::generate_key`].
#[derive(Clone)]
pub enum GeneratedKey {
    /// Hex-encoded HMAC secret.
    Secret(Zeroizing<String>),
    KeyPair(RsaKeyPair),
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratedKey::Secret(_) => f.write_str("Secret([REDACTED])"),
            GeneratedKey::KeyPair(pair) => f.debug_tuple("KeyPair").field(pair).finish(),
        }
    }
}

/// Encodes and decodes JWTs with a fixed [`JwtConfig`].
#[derive(Debug, Clone, Default)]
pub struct Jwt {
    config: JwtConfig,
}

impl Jwt {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// A fresh key for the configured algorithm: an HMAC secret of the exact
    /// required length, or a 2048-bit RSA key pair.
    pub fn generate_key(&self) -> Result<GeneratedKey> {
        match self.config.algorithm.hmac_key_len() {
            Some(len) => Ok(GeneratedKey::Secret(Zeroizing::new(random::hex(len)?))),
            None => public_key::generate_rsa_key_pair(DEFAULT_RSA_BITS).map(GeneratedKey::KeyPair),
        }
    }

    /// Sign `claims` with the configured algorithm.
    ///
    /// `key` is an HMAC secret (hex or base64) or a private-key PEM.
    pub fn encode(&self, claims: &Claims, key: &str) -> Result<String> {
        let alg = self.config.algorithm;
        let header = serde_json::to_vec(&JwtHeader::new(alg.name()))
            .map_err(|e| CryptoError::InvalidArgument(e.to_string()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| CryptoError::InvalidArgument(e.to_string()))?;

        let signing_input = format!("{}.{}", b64url_encode(&header), b64url_encode(&payload));
        let signature = self.sign(alg, signing_input.as_bytes(), key)?;
        Ok(format!("{signing_input}.{}", b64url_encode(&signature)))
    }

    /// Policy-driven decode: data errors become `Ok(None)` unless
    /// `exception_on_error` is set.
    pub fn decode(&self, token: &str, key: &str) -> Result<Option<Claims>> {
        ErrorPolicy::from_exception_on_error(self.config.exception_on_error).apply(self.try_decode(token, key))
    }

    pub fn try_decode(&self, token: &str, key: &str) -> Result<Claims> {
        self.try_decode_at(token, key, time::now())
    }

    /// Decode and validate as of `now`.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::MalformedEncoding`] for anything but three base64url JSON segments.
    /// - [`CryptoError::FormatMismatch`] if the header `typ` is not `JWT`.
    /// - [`CryptoError::AlgorithmNotAllowed`] for an `alg` outside the allow-list.
    /// - [`CryptoError::AuthenticationFailed`] on a bad signature.
    /// - Claim errors from [`ClaimRules::validate`].
    pub fn try_decode_at(&self, token: &str, key: &str, now: DateTime<Utc>) -> Result<Claims> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments[..] else {
            return Err(CryptoError::MalformedEncoding(format!(
                "JWT must have 3 segments, got {}",
                segments.len()
            )));
        };

        let header: JwtHeader = serde_json::from_slice(&b64url_decode(header_b64)?)
            .map_err(|_| CryptoError::MalformedEncoding("JWT header is not valid JSON".into()))?;
        if header.typ != JwtHeader::TYPE {
            return Err(CryptoError::FormatMismatch(format!(
                "JWT header typ must be `{}`",
                JwtHeader::TYPE
            )));
        }
        let alg: JwtAlgorithm = header.alg.parse()?;
        if !self.config.allowed.contains(&alg) {
            return Err(CryptoError::AlgorithmNotAllowed(format!("`{alg}` is not in the allow-list")));
        }

        let payload = b64url_decode(payload_b64)?;
        let signature = b64url_decode(signature_b64)?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        self.verify(alg, signing_input.as_bytes(), &signature, key)?;

        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|_| CryptoError::FormatMismatch("JWT payload is not a JSON object".into()))?;
        self.config.rules.validate(&claims, now.timestamp())?;
        Ok(claims)
    }

    fn sign(&self, alg: JwtAlgorithm, message: &[u8], key: &str) -> Result<Vec<u8>> {
        match alg.family() {
            AlgorithmFamily::Hmac => {
                let secret = self.hmac_key(alg, key)?;
                hmac(alg.hash(), &secret, &[message])
            }
            AlgorithmFamily::Rsa => {
                let private = public_key::parse_private_key(key)?;
                let signature = match alg.hash() {
                    HashAlgorithm::Sha256 => SigningKey::<Sha256>::new(private).try_sign(message),
                    HashAlgorithm::Sha384 => SigningKey::<Sha384>::new(private).try_sign(message),
                    HashAlgorithm::Sha512 => SigningKey::<Sha512>::new(private).try_sign(message),
                };
                signature
                    .map(|s| s.to_vec())
                    .map_err(|e| CryptoError::InvalidKeyFormat(format!("RSA signing failed: {e}")))
            }
        }
    }

    fn verify(&self, alg: JwtAlgorithm, message: &[u8], signature: &[u8], key: &str) -> Result<()> {
        match alg.family() {
            AlgorithmFamily::Hmac => {
                let secret = self.hmac_key(alg, key)?;
                let expected = hmac(alg.hash(), &secret, &[message])?;
                if constant_time_eq(&expected, signature) {
                    Ok(())
                } else {
                    Err(CryptoError::AuthenticationFailed("JWT signature mismatch".into()))
                }
            }
            AlgorithmFamily::Rsa => {
                let public = public_key::parse_public_key(key)?;
                let bad = |_| CryptoError::AuthenticationFailed("JWT signature mismatch".into());
                let signature = Signature::try_from(signature).map_err(bad)?;
                let verified = match alg.hash() {
                    HashAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(public).verify(message, &signature),
                    HashAlgorithm::Sha384 => VerifyingKey::<Sha384>::new(public).verify(message, &signature),
                    HashAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(public).verify(message, &signature),
                };
                verified.map_err(bad)
            }
        }
    }

    /// Decode an HMAC secret: hex first, then base64, then base64url.
    fn hmac_key(&self, alg: JwtAlgorithm, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        let required = alg.hmac_key_len().unwrap_or_default();
        if key.is_empty() {
            return Err(CryptoError::InvalidKeyFormat("HMAC key must not be empty".into()));
        }

        // A hex-looking key is hex; base64 is only consulted for other input.
        let decoded = if is_hex(key) {
            hex::decode(key).ok()
        } else {
            STANDARD.decode(key).or_else(|_| URL_SAFE_NO_PAD.decode(key)).ok()
        }
        .map(Zeroizing::new);

        match decoded {
            Some(bytes) if bytes.len() == required => Ok(bytes),
            Some(bytes) if self.config.insecure_key => Ok(bytes),
            Some(bytes) => Err(CryptoError::InvalidKeySize {
                expected: required,
                actual: bytes.len(),
            }),
            None if self.config.insecure_key => Ok(Zeroizing::new(key.as_bytes().to_vec())),
            None => Err(CryptoError::InvalidKeyFormat(
                "HMAC key must be hex or base64 encoded".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::ErrorKind;
    use serde_json::json;
    use std::sync::OnceLock;

    fn claims(value: serde_json::Value) -> Claims {
        value.as_object().cloned().unwrap_or_default()
    }

    fn hs(alg: JwtAlgorithm) -> Jwt {
        Jwt::new(JwtConfig::builder().algorithm(alg).exception_on_error(true).build().unwrap())
    }

    fn rsa_pair() -> &'static RsaKeyPair {
        static PAIR: OnceLock<RsaKeyPair> = OnceLock::new();
        PAIR.get_or_init(|| public_key::generate_rsa_key_pair(1024).unwrap())
    }

    #[test]
    fn hs256_round_trip() {
        let jwt = hs(JwtAlgorithm::Hs256);
        let key = "ab".repeat(32);
        let payload = claims(json!({"sub": "alice", "admin": true}));
        let token = jwt.encode(&payload, &key).unwrap();
        assert_eq!(jwt.decode(&token, &key).unwrap(), Some(payload));

        let header = b64url_decode(token.split('.').next().unwrap()).unwrap();
        assert_eq!(header, br#"{"alg":"HS256","typ":"JWT"}"#);
    }

    #[test]
    fn base64_secrets_accepted() {
        let jwt = hs(JwtAlgorithm::Hs384);
        let key = STANDARD.encode([7u8; 48]);
        let token = jwt.encode(&Claims::new(), &key).unwrap();
        assert!(jwt.decode(&token, &key).unwrap().is_some());
    }

    #[test]
    fn hmac_key_length_enforced_unless_insecure() {
        let jwt = hs(JwtAlgorithm::Hs256);
        let err = jwt.encode(&Claims::new(), &"ab".repeat(16)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeySize { expected: 32, actual: 16 }));

        let insecure = Jwt::new(JwtConfig::builder().insecure_key(true).build().unwrap());
        let token = insecure.encode(&Claims::new(), "short secret").unwrap();
        assert!(insecure.decode(&token, "short secret").unwrap().is_some());
    }

    #[test]
    fn hex_key_of_wrong_length_is_not_reread_as_base64() {
        // 64 hex chars also decode as 48 bytes of base64, exactly HS384's length.
        let jwt = hs(JwtAlgorithm::Hs384);
        let err = jwt.encode(&Claims::new(), &"ab".repeat(32)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeySize { expected: 48, actual: 32 }));

        let b64 = STANDARD.encode([7u8; 48]);
        assert!(jwt.encode(&Claims::new(), &b64).is_ok());
    }

    #[test]
    fn rs256_round_trip_and_key_halves() {
        let jwt = Jwt::new(
            JwtConfig::builder()
                .algorithm(JwtAlgorithm::Rs256)
                .exception_on_error(true)
                .build()
                .unwrap(),
        );
        let pair = rsa_pair();
        let payload = claims(json!({"iss": "me"}));
        let token = jwt.encode(&payload, &pair.private_pem).unwrap();
        assert_eq!(jwt.try_decode(&token, &pair.public_pem).unwrap(), payload);

        let err = jwt.encode(&payload, &pair.public_pem).unwrap_err();
        assert!(err.to_string().contains("wrong key type"));
        let err = jwt.try_decode(&token, &pair.private_pem).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKeyFormat);
    }

    #[test]
    fn algorithm_confusion_rejected() {
        let key = "cd".repeat(64);
        let hs512 = hs(JwtAlgorithm::Hs512);
        let token = hs512.encode(&Claims::new(), &key).unwrap();

        let hs256 = hs(JwtAlgorithm::Hs256);
        let err = hs256.try_decode(&token, &key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlgorithmNotAllowed);

        let none_header = b64url_encode(br#"{"alg":"none","typ":"JWT"}"#);
        let unsigned = format!("{none_header}.{}.", b64url_encode(b"{}"));
        let err = hs256.try_decode(&unsigned, &key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlgorithmNotAllowed);
    }

    #[test]
    fn allow_list_can_widen() {
        let key = "cd".repeat(64);
        let token = hs(JwtAlgorithm::Hs512).encode(&Claims::new(), &key).unwrap();
        let both = Jwt::new(
            JwtConfig::builder()
                .allowed_algorithms([JwtAlgorithm::Hs256, JwtAlgorithm::Hs512])
                .build()
                .unwrap(),
        );
        assert!(both.decode(&token, &key).unwrap().is_some());
        assert!(JwtConfig::builder().allowed_algorithms([]).build().is_err());
    }

    #[test]
    fn tampering_any_character_fails() {
        let jwt = hs(JwtAlgorithm::Hs256);
        let key = "ab".repeat(32);
        let token = jwt.encode(&claims(json!({"n": 1})), &key).unwrap();
        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'x' { b'y' } else { b'x' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert!(jwt.try_decode(&tampered, &key).is_err(), "position {i}");
        }
    }

    #[test]
    fn expiry_checked_against_clock() {
        let jwt = hs(JwtAlgorithm::Hs256);
        let key = "ab".repeat(32);
        let now = Utc::now();
        let token = jwt
            .encode(&claims(json!({"exp": (now + Duration::hours(1)).timestamp()})), &key)
            .unwrap();
        jwt.try_decode_at(&token, &key, now).unwrap();
        let err = jwt.try_decode_at(&token, &key, now + Duration::hours(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
    }

    #[test]
    fn header_typ_required() {
        let jwt = hs(JwtAlgorithm::Hs256);
        let key = "ab".repeat(32);
        let header = b64url_encode(br#"{"alg":"HS256"}"#);
        let payload = b64url_encode(b"{}");
        let input = format!("{header}.{payload}");
        let sig = hmac(HashAlgorithm::Sha256, &hex::decode(&key).unwrap(), &[input.as_bytes()]).unwrap();
        let token = format!("{input}.{}", b64url_encode(&sig));
        let err = jwt.try_decode(&token, &key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);
    }

    #[test]
    fn default_policy_hides_tampering_but_not_bad_keys() {
        let jwt = Jwt::default();
        let key = "ab".repeat(32);
        assert_eq!(jwt.decode("a.b", &key).unwrap(), None);
        let token = jwt.encode(&Claims::new(), &key).unwrap();
        assert!(jwt.decode(&token, "").is_err());
    }

    #[test]
    fn generated_keys_fit_algorithm() {
        match hs(JwtAlgorithm::Hs512).generate_key().unwrap() {
            GeneratedKey::Secret(hex) => assert_eq!(hex.len(), 128),
            GeneratedKey::KeyPair(_) => panic!("expected an HMAC secret"),
        }
    }
}
