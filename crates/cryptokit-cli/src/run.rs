//! Executes one `filecrypt` action.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use cryptokit::public_key::generate_rsa_key_pair;
use cryptokit::FileEncryption;

use crate::config::{Action, Config};

/// Run `cfg.action`, writing keys and reports to `out`.
///
/// `default_key` is used when `FILECRYPT_KEY` is unset.
pub fn run(cfg: &Config, files: &FileEncryption, default_key: Option<&str>, out: &mut dyn Write) -> Result<()> {
    match cfg.action {
        Action::Encrypt | Action::Decrypt => {
            let (input, output) = paths(cfg)?;
            let key = cfg
                .key
                .as_deref()
                .or(default_key)
                .context("FILECRYPT_KEY or CRYPTOKIT_ENCRYPTION_KEY is required")?;

            let result = if cfg.action == Action::Encrypt {
                files.encrypt_file(input, output, key)
            } else {
                files.decrypt_file(input, output, key)
            };
            result.with_context(|| format!("{} {} failed", cfg.action, input.display()))?;

            info!(
                action = %cfg.action,
                input = %input.display(),
                output = %output.display(),
                external = files.is_external_backend(),
                "file processed"
            );
        }
        Action::Check => {
            let report = files.check_file_setup();
            if !report.is_ready() {
                tracing::warn!(missing = ?report.missing(), "pipeline backend unavailable");
            }
            serde_json::to_writer_pretty(&mut *out, &report).context("failed to write report")?;
            writeln!(out)?;
        }
        Action::GenerateKey => {
            let key = files.generate_key()?;
            writeln!(out, "{key}")?;
        }
        Action::GenerateRsa => {
            let pair = generate_rsa_key_pair(cfg.rsa_bits)?;
            write!(out, "{}{}", pair.private_pem.as_str(), pair.public_pem)?;
        }
    }
    Ok(())
}

fn paths(cfg: &Config) -> Result<(&Path, &Path)> {
    let input = cfg.input.as_deref().context("FILECRYPT_INPUT is required")?;
    let output = cfg.output.as_deref().context("FILECRYPT_OUTPUT is required")?;
    Ok((input, output))
}
