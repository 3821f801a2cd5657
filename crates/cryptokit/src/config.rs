//! Environment-driven settings for applications embedding cryptokit.
//!
//! Variables use the `CRYPTOKIT_` prefix and `__` between nested sections:
//!
//! ```text
//! CRYPTOKIT_ENCRYPTION_KEY=<hex>
//! CRYPTOKIT_ENCRYPTION__CIPHER=aes-256-gcm
//! CRYPTOKIT_ENCRYPTION__PBKDF2_ITERATIONS=310000
//! CRYPTOKIT_JWT__ALGORITHM=HS512
//! CRYPTOKIT_FILE__USE_EXTERNAL_COMMANDS=true
//! ```
//!
//! Algorithm names stay strings until [`Settings::validate`] parses them, so a
//! typo is reported with the variable it came from.

use serde::Deserialize;

use common::{CryptoError, Result};

use crate::crypto::{CipherAlgorithm, HashAlgorithm};
use crate::encoding::OutputEncoding;
use crate::encryption::{DataFormat, EncryptionConfig};
use crate::file::{FileEncryptionConfig, ToolNames};
use crate::jwt::{JwtAlgorithm, JwtConfig};
use crate::keys::{KeyType, Pbkdf2Params, DEFAULT_PBKDF2_ITERATIONS};
use crate::signed::SignedDataConfig;

/// Top-level settings document.
#[derive(Clone, Default, Deserialize)]
pub struct Settings {
    /// Default key for [`crate::Crypto::encrypt`] and file operations.
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Default key for [`crate::Crypto::sign`].
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Default key (HMAC secret or PEM) for JWT encode/decode.
    #[serde(default)]
    pub jwt_key: Option<String>,
    /// PEM used only for JWT verification when it differs from `jwt_key`.
    #[serde(default)]
    pub jwt_public_key: Option<String>,

    #[serde(default)]
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub signing: SigningSettings,
    #[serde(default)]
    pub jwt: JwtSettings,
    #[serde(default)]
    pub file: FileSettings,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("Settings")
            .field("encryption_key", &redacted(&self.encryption_key))
            .field("signing_key", &redacted(&self.signing_key))
            .field("jwt_key", &redacted(&self.jwt_key))
            .field("jwt_public_key", &redacted(&self.jwt_public_key))
            .field("encryption", &self.encryption)
            .field("signing", &self.signing)
            .field("jwt", &self.jwt)
            .field("file", &self.file)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionSettings {
    #[serde(default = "default_cipher")]
    pub cipher: String,
    #[serde(default = "default_hash")]
    pub hash: String,
    #[serde(default = "default_key_type")]
    pub key_type: String,
    #[serde(default = "default_pbkdf2_hash")]
    pub pbkdf2_hash: String,
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
    #[serde(default = "default_true")]
    pub encrypt_then_authenticate: bool,
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_data_format")]
    pub data_format: String,
    #[serde(default)]
    pub allow_null: bool,
    #[serde(default)]
    pub exception_on_error: bool,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            cipher: default_cipher(),
            hash: default_hash(),
            key_type: default_key_type(),
            pbkdf2_hash: default_pbkdf2_hash(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
            encrypt_then_authenticate: true,
            output: default_output(),
            data_format: default_data_format(),
            allow_null: false,
            exception_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningSettings {
    #[serde(default = "default_hash")]
    pub hash: String,
    #[serde(default)]
    pub allow_null: bool,
    #[serde(default)]
    pub exception_on_error: bool,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            hash: default_hash(),
            allow_null: false,
            exception_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    /// Comma-separated allow-list; empty means "only `algorithm`".
    #[serde(default)]
    pub allowed_algorithms: String,
    /// Comma-separated issuer allow-list.
    #[serde(default)]
    pub issuers: String,
    /// Comma-separated audience allow-list.
    #[serde(default)]
    pub audiences: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub jwt_id: Option<String>,
    #[serde(default)]
    pub require_exp: bool,
    #[serde(default)]
    pub require_nbf: bool,
    #[serde(default)]
    pub require_iat: bool,
    #[serde(default = "default_true")]
    pub validate_defined_claims: bool,
    #[serde(default)]
    pub leeway_secs: u64,
    #[serde(default)]
    pub insecure_key: bool,
    #[serde(default)]
    pub exception_on_error: bool,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            algorithm: default_jwt_algorithm(),
            allowed_algorithms: String::new(),
            issuers: String::new(),
            audiences: String::new(),
            subject: None,
            jwt_id: None,
            require_exp: false,
            require_nbf: false,
            require_iat: false,
            validate_defined_claims: true,
            leeway_secs: 0,
            insecure_key: false,
            exception_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSettings {
    #[serde(default = "default_cipher")]
    pub cipher: String,
    #[serde(default = "default_hash")]
    pub hash: String,
    #[serde(default = "default_key_type")]
    pub key_type: String,
    #[serde(default = "default_pbkdf2_hash")]
    pub pbkdf2_hash: String,
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
    #[serde(default = "default_true")]
    pub encrypt_then_authenticate: bool,
    #[serde(default)]
    pub use_external_commands: bool,
    #[serde(default)]
    pub include_command_output: bool,
    #[serde(default)]
    pub tools: ToolNames,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            cipher: default_cipher(),
            hash: default_hash(),
            key_type: default_key_type(),
            pbkdf2_hash: default_pbkdf2_hash(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
            encrypt_then_authenticate: true,
            use_external_commands: false,
            include_command_output: false,
            tools: ToolNames::default(),
        }
    }
}

fn default_cipher() -> String {
    CipherAlgorithm::AES_256_CBC.to_string()
}
fn default_hash() -> String {
    HashAlgorithm::Sha256.to_string()
}
fn default_pbkdf2_hash() -> String {
    HashAlgorithm::Sha512.to_string()
}
fn default_pbkdf2_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}
fn default_key_type() -> String {
    KeyType::RawKey.to_string()
}
fn default_output() -> String {
    "base64url".into()
}
fn default_data_format() -> String {
    DataFormat::Typed.to_string()
}
fn default_jwt_algorithm() -> String {
    JwtAlgorithm::Hs256.to_string()
}
fn default_true() -> bool {
    true
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Prefixes a parse error with the setting it came from.
fn field<T>(name: &str, parsed: Result<T>) -> Result<T> {
    parsed.map_err(|e| CryptoError::InvalidConfig(format!("{name}: {e}")))
}

impl Settings {
    /// Load and validate settings from `CRYPTOKIT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_source(
            config::Environment::with_prefix("CRYPTOKIT")
                .prefix_separator("_")
                .separator("__"),
        )
    }

    /// Load and validate settings from an explicit `config` source.
    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = config::Config::builder()
            .add_source(source)
            .build()
            .map_err(|e| CryptoError::InvalidConfig(format!("failed to build cryptokit settings: {e}")))?;

        let settings: Settings = cfg
            .try_deserialize()
            .map_err(|e| CryptoError::InvalidConfig(format!("failed to deserialise cryptokit settings: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse every algorithm name and run each component's builder once.
    pub fn validate(&self) -> Result<()> {
        for (name, key) in [
            ("encryption_key", &self.encryption_key),
            ("signing_key", &self.signing_key),
            ("jwt_key", &self.jwt_key),
        ] {
            if key.as_deref().is_some_and(|k| k.trim().is_empty()) {
                return Err(CryptoError::InvalidConfig(format!(
                    "{name} must not be empty when set"
                )));
            }
        }
        self.encryption_config()?;
        self.signed_data_config()?;
        self.jwt_config()?;
        self.file_config()?;
        Ok(())
    }

    pub fn encryption_config(&self) -> Result<EncryptionConfig> {
        let e = &self.encryption;
        EncryptionConfig::builder()
            .cipher(field("encryption.cipher", e.cipher.parse())?)
            .hash(field("encryption.hash", e.hash.parse())?)
            .key_type(field("encryption.key_type", e.key_type.parse())?)
            .pbkdf2(Pbkdf2Params {
                hash: field("encryption.pbkdf2_hash", e.pbkdf2_hash.parse())?,
                iterations: e.pbkdf2_iterations,
            })
            .encrypt_then_authenticate(e.encrypt_then_authenticate)
            .output(field::<OutputEncoding>("encryption.output", e.output.parse())?)
            .data_format(field("encryption.data_format", e.data_format.parse())?)
            .allow_null(e.allow_null)
            .exception_on_error(e.exception_on_error)
            .build()
    }

    pub fn signed_data_config(&self) -> Result<SignedDataConfig> {
        let s = &self.signing;
        SignedDataConfig::builder()
            .hash(field("signing.hash", s.hash.parse())?)
            .allow_null(s.allow_null)
            .exception_on_error(s.exception_on_error)
            .build()
    }

    pub fn jwt_config(&self) -> Result<JwtConfig> {
        let j = &self.jwt;
        let algorithm: JwtAlgorithm = field("jwt.algorithm", j.algorithm.parse())?;
        let mut builder = JwtConfig::builder()
            .algorithm(algorithm)
            .require_exp(j.require_exp)
            .require_nbf(j.require_nbf)
            .require_iat(j.require_iat)
            .validate_defined_claims(j.validate_defined_claims)
            .leeway_secs(j.leeway_secs)
            .insecure_key(j.insecure_key)
            .exception_on_error(j.exception_on_error);

        if !j.allowed_algorithms.trim().is_empty() {
            let allowed = split_list(&j.allowed_algorithms)
                .map(str::parse)
                .collect::<Result<Vec<JwtAlgorithm>>>();
            builder = builder.allowed_algorithms(field("jwt.allowed_algorithms", allowed)?);
        }
        if !j.issuers.trim().is_empty() {
            builder = builder.issuers(split_list(&j.issuers));
        }
        if !j.audiences.trim().is_empty() {
            builder = builder.audiences(split_list(&j.audiences));
        }
        if let Some(subject) = j.subject.as_deref().filter(|s| !s.is_empty()) {
            builder = builder.subject(subject);
        }
        if let Some(jti) = j.jwt_id.as_deref().filter(|s| !s.is_empty()) {
            builder = builder.jwt_id(jti);
        }
        builder.build()
    }

    pub fn file_config(&self) -> Result<FileEncryptionConfig> {
        let f = &self.file;
        FileEncryptionConfig::builder()
            .cipher(field("file.cipher", f.cipher.parse())?)
            .hash(field("file.hash", f.hash.parse())?)
            .key_type(field("file.key_type", f.key_type.parse())?)
            .pbkdf2(Pbkdf2Params {
                hash: field("file.pbkdf2_hash", f.pbkdf2_hash.parse())?,
                iterations: f.pbkdf2_iterations,
            })
            .encrypt_then_authenticate(f.encrypt_then_authenticate)
            .use_external_commands(f.use_external_commands)
            .include_command_output(f.include_command_output)
            .tools(f.tools.clone())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        config::Environment::with_prefix("CRYPTOKIT")
            .prefix_separator("_")
            .separator("__")
            .source(Some(map))
    }

    #[test]
    fn defaults() {
        assert_eq!(default_cipher(), "aes-256-cbc");
        assert_eq!(default_hash(), "sha256");
        assert_eq!(default_pbkdf2_hash(), "sha512");
        assert_eq!(default_pbkdf2_iterations(), 200_000);
        assert_eq!(default_jwt_algorithm(), "HS256");
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let s = Settings::from_source(env(&[])).unwrap();
        assert!(s.encryption_key.is_none());
        assert_eq!(s.encryption_config().unwrap(), EncryptionConfig::default());
        assert_eq!(s.jwt_config().unwrap().algorithm(), JwtAlgorithm::Hs256);
        assert!(!s.file_config().unwrap().use_external_commands());
    }

    #[test]
    fn nested_values_are_read() {
        let s = Settings::from_source(env(&[
            ("CRYPTOKIT_ENCRYPTION_KEY", "00112233"),
            ("CRYPTOKIT_ENCRYPTION__CIPHER", "aes-128-gcm"),
            ("CRYPTOKIT_ENCRYPTION__PBKDF2_ITERATIONS", "1000"),
            ("CRYPTOKIT_JWT__ALGORITHM", "HS512"),
            ("CRYPTOKIT_JWT__ISSUERS", "a, b"),
            ("CRYPTOKIT_JWT__LEEWAY_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(s.encryption_key.as_deref(), Some("00112233"));
        let enc = s.encryption_config().unwrap();
        assert!(enc.cipher().is_aead());
        assert_eq!(enc.key_derivation().pbkdf2.iterations, 1000);

        let jwt = s.jwt_config().unwrap();
        assert_eq!(jwt.algorithm(), JwtAlgorithm::Hs512);
        assert_eq!(jwt.rules().leeway_secs, 30);
        assert_eq!(jwt.rules().issuers, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn unknown_cipher_names_the_setting() {
        let err = Settings::from_source(env(&[("CRYPTOKIT_ENCRYPTION__CIPHER", "des-cbc")])).unwrap_err();
        assert!(err.to_string().contains("encryption.cipher"), "{err}");
    }

    #[test]
    fn validate_rejects_blank_key() {
        let s = Settings {
            signing_key: Some("  ".into()),
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(CryptoError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_pipeline_with_aead() {
        let mut s = Settings::default();
        s.file.use_external_commands = true;
        s.file.cipher = "aes-256-gcm".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn debug_redacts_keys() {
        let s = Settings {
            jwt_key: Some("super-secret".into()),
            ..Settings::default()
        };
        assert!(!format!("{s:?}").contains("super-secret"));
    }
}
