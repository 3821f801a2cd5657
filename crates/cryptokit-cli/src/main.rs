//! `filecrypt`: command-line entry point for cryptokit file encryption.
//!
//! Startup sequence:
//! 1. Load and validate [`config::Config`] from `FILECRYPT_*` variables and argv.
//! 2. Initialise structured JSON logging on stderr.
//! 3. Build the file-encryption component from `CRYPTOKIT_*` settings.
//! 4. Run the requested action.

mod config;
mod run;
mod telemetry;

use anyhow::{Context, Result};

fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = config::Config::from_env().map_err(|e| {
        eprintln!("ERROR: filecrypt configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    tracing::debug!(?cfg, "configuration loaded");

    // -----------------------------------------------------------------------
    // 3-4. Components and action
    // -----------------------------------------------------------------------
    execute(&cfg).map_err(|e| {
        let chain = format!("{e:#}");
        tracing::error!(error = %chain, action = %cfg.action, "filecrypt failed");
        e
    })
}

fn execute(cfg: &config::Config) -> Result<()> {
    let settings = cryptokit::Settings::from_env().context("invalid CRYPTOKIT_* settings")?;
    let files = cryptokit::FileEncryption::new(settings.file_config()?)?;

    let stdout = std::io::stdout();
    run::run(cfg, &files, settings.encryption_key.as_deref(), &mut stdout.lock())
}
