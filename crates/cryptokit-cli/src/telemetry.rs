//! Logging for `filecrypt`.
//!
//! Events go to stderr as flat JSON objects so stdout carries only keys and
//! reports. `FILECRYPT_LOG_LEVEL` applies to this binary and the `cryptokit`
//! library; every other crate stays at `warn`. A set `RUST_LOG` replaces the
//! whole filter.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Targets that follow `FILECRYPT_LOG_LEVEL`.
const OWN_TARGETS: [&str; 2] = ["filecrypt", "cryptokit"];

fn directives(log_level: &str) -> String {
    std::iter::once("warn".to_owned())
        .chain(OWN_TARGETS.iter().map(|target| format!("{target}={log_level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn level_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives(log_level))
        .with_context(|| format!("invalid FILECRYPT_LOG_LEVEL `{log_level}`"))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error for an unparseable level or when a subscriber is already installed.
pub fn init(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(log_level)?,
    };

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("filecrypt logging already initialised: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_own_crates_only() {
        assert_eq!(directives("debug"), "warn,filecrypt=debug,cryptokit=debug");
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(level_filter("trace").is_ok());
        assert!(level_filter("loud").is_err());
    }
}
