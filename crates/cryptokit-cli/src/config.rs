//! Configuration loading and validation for `filecrypt`.
//!
//! Everything comes from `FILECRYPT_*` variables; the first command-line
//! argument, when given, overrides `FILECRYPT_ACTION`. Cipher, hash and
//! pipeline settings are read separately as `cryptokit::Settings`
//! (`CRYPTOKIT_FILE__*`).

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Encrypt,
    Decrypt,
    /// Print the external-tool diagnostics report as JSON.
    Check,
    GenerateKey,
    GenerateRsa,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Encrypt => "encrypt",
            Action::Decrypt => "decrypt",
            Action::Check => "check",
            Action::GenerateKey => "generate-key",
            Action::GenerateRsa => "generate-rsa",
        })
    }
}

/// Validated `filecrypt` configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// What to do. **Required**, via argument or `FILECRYPT_ACTION`.
    pub action: Action,

    /// Source file for `encrypt`/`decrypt`.
    #[serde(default)]
    pub input: Option<PathBuf>,

    /// Destination file for `encrypt`/`decrypt`; must not exist yet.
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Key or password. Falls back to `CRYPTOKIT_ENCRYPTION_KEY`.
    #[serde(default)]
    pub key: Option<String>,

    /// Modulus size for `generate-rsa`.
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: usize,

    /// Tracing log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("action", &self.action)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("rsa_bits", &self.rsa_bits)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn default_rsa_bits() -> usize {
    cryptokit::public_key::DEFAULT_RSA_BITS
}
fn default_log_level() -> String {
    "warn".into()
}

impl Config {
    /// Load and validate configuration from the environment and argv.
    pub fn from_env() -> Result<Self> {
        Self::load(
            config::Environment::with_prefix("FILECRYPT"),
            std::env::args().nth(1),
        )
    }

    fn load(env: config::Environment, action: Option<String>) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .set_override_option("action", action)
            .context("failed to apply filecrypt action argument")?
            .build()
            .context("failed to build filecrypt configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise filecrypt configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        if matches!(self.action, Action::Encrypt | Action::Decrypt) {
            if self.input.is_none() {
                anyhow::bail!("FILECRYPT_INPUT is required for `{}`", self.action);
            }
            if self.output.is_none() {
                anyhow::bail!("FILECRYPT_OUTPUT is required for `{}`", self.action);
            }
            if self.input == self.output {
                anyhow::bail!("FILECRYPT_INPUT and FILECRYPT_OUTPUT must differ");
            }
        }
        if self.key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            anyhow::bail!("FILECRYPT_KEY must not be empty when set");
        }
        if self.action == Action::GenerateRsa && self.rsa_bits < 1024 {
            anyhow::bail!("FILECRYPT_RSA_BITS must be at least 1024");
        }
        Ok(())
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
        config::Environment::with_prefix("FILECRYPT").source(Some(map))
    }

    fn base(action: Action) -> Config {
        Config {
            action,
            input: Some("in.bin".into()),
            output: Some("out.bin".into()),
            key: None,
            rsa_bits: 2048,
            log_level: "warn".into(),
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(default_rsa_bits(), 2048);
        assert_eq!(default_log_level(), "warn");
    }

    #[test]
    fn argument_overrides_env_action() {
        let cfg = Config::load(
            env(&[("FILECRYPT_ACTION", "encrypt")]),
            Some("generate-key".into()),
        )
        .unwrap();
        assert_eq!(cfg.action, Action::GenerateKey);
    }

    #[test]
    fn reads_paths_from_env() {
        let cfg = Config::load(
            env(&[
                ("FILECRYPT_ACTION", "decrypt"),
                ("FILECRYPT_INPUT", "a.enc"),
                ("FILECRYPT_OUTPUT", "a.txt"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(cfg.action, Action::Decrypt);
        assert_eq!(cfg.input, Some(PathBuf::from("a.enc")));
    }

    #[test]
    fn missing_action_is_an_error() {
        assert!(Config::load(env(&[]), None).is_err());
    }

    #[test]
    fn unknown_action_is_an_error() {
        assert!(Config::load(env(&[]), Some("shred".into())).is_err());
    }

    #[test]
    fn validate_requires_paths_for_file_actions() {
        let mut cfg = base(Action::Encrypt);
        cfg.output = None;
        assert!(cfg.validate().is_err());

        let mut cfg = base(Action::Check);
        cfg.input = None;
        cfg.output = None;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_same_input_and_output() {
        let mut cfg = base(Action::Decrypt);
        cfg.output = cfg.input.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_small_rsa() {
        let mut cfg = base(Action::GenerateRsa);
        cfg.rsa_bits = 512;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_hides_key() {
        let mut cfg = base(Action::Encrypt);
        cfg.key = Some("hunter2".into());
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
