//! One-call helpers over the components, driven by [`Settings`].
//!
//! [`Crypto`] builds every component once and holds the default keys, so
//! application code can write `crypto.encrypt(&value)` without threading keys
//! and configs through each call site.

use std::path::Path;

use zeroize::Zeroizing;

use common::{CryptoError, Result};

use crate::codec::Value;
use crate::config::Settings;
use crate::encryption::Encryption;
use crate::file::FileEncryption;
use crate::jwt::{Claims, Jwt};
use crate::signed::SignedData;
use crate::time::ExpireTime;

/// Every component plus the default keys from [`Settings`].
///
/// Unlike the components, which take a key per call and drop it afterwards,
/// the facade keeps its default keys for as long as it lives. They sit in
/// [`Zeroizing`] buffers that are wiped on drop and are left out of `Debug`.
pub struct Crypto {
    encryption: Encryption,
    signed: SignedData,
    jwt: Jwt,
    file: FileEncryption,
    encryption_key: Option<Zeroizing<String>>,
    signing_key: Option<Zeroizing<String>>,
    jwt_key: Option<Zeroizing<String>>,
    jwt_public_key: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypto")
            .field("encryption", &self.encryption)
            .field("signed", &self.signed)
            .field("jwt", &self.jwt)
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

fn required<'a>(key: &'a Option<Zeroizing<String>>, name: &str) -> Result<&'a str> {
    key.as_deref()
        .map(String::as_str)
        .ok_or_else(|| CryptoError::InvalidConfig(format!("no default {name} configured")))
}

impl Crypto {
    /// Build from `CRYPTOKIT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(&Settings::from_env()?)
    }

    pub fn new(settings: &Settings) -> Result<Self> {
        let keep = |k: &Option<String>| k.clone().map(Zeroizing::new);
        let crypto = Self {
            encryption: Encryption::new(settings.encryption_config()?),
            signed: SignedData::new(settings.signed_data_config()?),
            jwt: Jwt::new(settings.jwt_config()?),
            file: FileEncryption::new(settings.file_config()?)?,
            encryption_key: keep(&settings.encryption_key),
            signing_key: keep(&settings.signing_key),
            jwt_key: keep(&settings.jwt_key),
            jwt_public_key: keep(&settings.jwt_public_key),
        };
        tracing::debug!(
            cipher = %crypto.encryption.config().cipher(),
            jwt_alg = %crypto.jwt.config().algorithm(),
            external_files = crypto.file.is_external_backend(),
            "crypto facade ready"
        );
        Ok(crypto)
    }

    pub fn encryption(&self) -> &Encryption {
        &self.encryption
    }

    pub fn signed_data(&self) -> &SignedData {
        &self.signed
    }

    pub fn jwt(&self) -> &Jwt {
        &self.jwt
    }

    pub fn files(&self) -> &FileEncryption {
        &self.file
    }

    pub fn encrypt(&self, value: &Value) -> Result<String> {
        self.encryption.encrypt(value, required(&self.encryption_key, "encryption key")?)
    }

    pub fn decrypt(&self, text: &str) -> Result<Option<Value>> {
        self.encryption.decrypt(text, required(&self.encryption_key, "encryption key")?)
    }

    pub fn sign(&self, value: &Value, expire: Option<&ExpireTime>) -> Result<String> {
        self.signed.sign(value, required(&self.signing_key, "signing key")?, expire)
    }

    pub fn verify(&self, token: &str) -> Result<Option<Value>> {
        self.signed.verify(token, required(&self.signing_key, "signing key")?)
    }

    pub fn encode_jwt(&self, claims: &Claims) -> Result<String> {
        self.jwt.encode(claims, required(&self.jwt_key, "JWT key")?)
    }

    /// Verifies with `jwt_public_key` when set, otherwise with `jwt_key`.
    pub fn decode_jwt(&self, token: &str) -> Result<Option<Claims>> {
        let key = match &self.jwt_public_key {
            Some(pem) => pem.as_str(),
            None => required(&self.jwt_key, "JWT key")?,
        };
        self.jwt.decode(token, key)
    }

    pub fn encrypt_file(&self, input: &Path, output: &Path) -> Result<()> {
        self.file
            .encrypt_file(input, output, required(&self.encryption_key, "encryption key")?)
    }

    pub fn decrypt_file(&self, input: &Path, output: &Path) -> Result<()> {
        self.file
            .decrypt_file(input, output, required(&self.encryption_key, "encryption key")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random;

    fn settings() -> Settings {
        let mut s = Settings {
            encryption_key: Some(random::hex(64).unwrap()),
            signing_key: Some(random::hex(32).unwrap()),
            jwt_key: Some(random::hex(32).unwrap()),
            ..Settings::default()
        };
        s.encryption.pbkdf2_iterations = 1000;
        s.file.pbkdf2_iterations = 1000;
        s
    }

    #[test]
    fn encrypt_round_trips_with_default_key() {
        let crypto = Crypto::new(&settings()).unwrap();
        let token = crypto.encrypt(&Value::from(42_i32)).unwrap();
        assert_eq!(crypto.decrypt(&token).unwrap(), Some(Value::Int32(42)));
    }

    #[test]
    fn sign_and_verify() {
        let crypto = Crypto::new(&settings()).unwrap();
        let token = crypto.sign(&Value::from("hi"), None).unwrap();
        assert_eq!(crypto.verify(&token).unwrap(), Some(Value::Str("hi".into())));
    }

    #[test]
    fn jwt_round_trips() {
        let crypto = Crypto::new(&settings()).unwrap();
        let mut claims = Claims::new();
        claims.insert("sub".into(), "alice".into());
        let token = crypto.encode_jwt(&claims).unwrap();
        assert_eq!(crypto.decode_jwt(&token).unwrap(), Some(claims));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let crypto = Crypto::new(&Settings::default()).unwrap();
        assert!(matches!(
            crypto.encrypt(&Value::from("x")),
            Err(CryptoError::InvalidConfig(_))
        ));
        // Misconfiguration is never swallowed by the error policy.
        assert!(crypto.verify("a.1.b").is_err());
    }

    #[test]
    fn debug_leaves_out_default_keys() {
        let s = settings();
        let crypto = Crypto::new(&s).unwrap();
        let shown = format!("{crypto:?}");
        for key in [&s.encryption_key, &s.signing_key, &s.jwt_key] {
            assert!(!shown.contains(key.as_deref().unwrap()));
        }
    }

    #[test]
    fn file_round_trip() {
        let crypto = Crypto::new(&settings()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let enc = dir.path().join("plain.enc");
        let out = dir.path().join("plain.out");
        std::fs::write(&plain, b"file body").unwrap();

        crypto.encrypt_file(&plain, &enc).unwrap();
        crypto.decrypt_file(&enc, &out).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"file body");
    }
}
