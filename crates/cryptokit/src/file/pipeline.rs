//! External-command backend.
//!
//! Encrypt:
//!
//! ```text
//! openssl enc -<cipher> -in IN -out OUT -K <enc key> -iv <iv>
//! xxd -r -p  <<< <iv hex>                                   >> OUT
//! openssl dgst -<hash> -mac HMAC -macopt hexkey:<mac key> -binary OUT  >> OUT
//! ```
//!
//! Decrypt works on a temporary copy of the input: read the trailing HMAC and IV,
//! `truncate` the HMAC off, recompute it over what is left, `truncate` the IV off,
//! then `openssl enc -d` into the output. The temporary copy is removed on every
//! exit path.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use common::protocol::{CommandCheck, FileSetupReport};
use common::{CryptoError, Result};

use crate::crypto::constant_time_eq;
use crate::encryption::EncryptionConfig;
use crate::random;

use super::runner::{CommandOutput, CommandRunner};
use super::{create_new, remove_if_present, with_cleanup};

/// Program names for the three external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolNames {
    pub openssl: String,
    pub xxd: String,
    pub truncate: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            openssl: "openssl".into(),
            xxd: "xxd".into(),
            truncate: "truncate".into(),
        }
    }
}

/// Progress of a pipeline decrypt, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptState {
    Start,
    TempFileCreated,
    HmacVerified,
    HmacFailed,
    Truncated,
    Decrypted,
    DecryptFailed,
    Cleanup,
}

pub struct PipelineBackend {
    config: EncryptionConfig,
    tools: ToolNames,
    include_output: bool,
    runner: Arc<dyn CommandRunner + Send + Sync>,
}

impl PipelineBackend {
    pub fn new(
        config: EncryptionConfig,
        tools: ToolNames,
        include_output: bool,
        runner: Arc<dyn CommandRunner + Send + Sync>,
    ) -> Self {
        Self {
            config,
            tools,
            include_output,
            runner,
        }
    }

    pub fn encrypt(&self, input: &Path, output: &Path, key: &str) -> Result<()> {
        // Claim the output before openssl opens it with `-out`, which would
        // otherwise truncate a file created after path validation.
        drop(create_new(output)?);
        match self.encrypt_into(input, output, key) {
            Ok(()) => {
                tracing::debug!(output = %output.display(), "pipeline encrypt finished");
                Ok(())
            }
            Err(e) => with_cleanup(Err(e), output),
        }
    }

    fn encrypt_into(&self, input: &Path, output: &Path, key: &str) -> Result<()> {
        let cfg = &self.config;
        let iv = random::bytes(cfg.cipher().iv_len())?;
        let keys = cfg.key_derivation().derive(key, &iv, cfg.key_sizes())?;
        let iv_hex = hex::encode(&iv);

        self.run(
            vec![
                self.tools.openssl.clone(),
                "enc".into(),
                format!("-{}", cfg.cipher()),
                "-in".into(),
                path_arg(input)?,
                "-out".into(),
                path_arg(output)?,
                "-K".into(),
                hex::encode(keys.enc_key()),
                "-iv".into(),
                iv_hex.clone(),
            ],
            None,
        )?;

        let raw_iv = self.run(
            vec![self.tools.xxd.clone(), "-r".into(), "-p".into()],
            Some(iv_hex.into_bytes()),
        )?;
        expect_len(&raw_iv, iv.len(), &self.tools.xxd)?;
        append(output, &raw_iv.stdout)?;

        if let Some(mac_key) = keys.mac_key() {
            let mac = self.dgst(mac_key, output)?;
            append(output, &mac)?;
        }
        Ok(())
    }

    pub fn decrypt(&self, input: &Path, output: &Path, key: &str) -> Result<()> {
        let temp = temp_path(output);
        let mut state = DecryptState::Start;
        log_state(state);

        drop(create_new(output)?);
        let mut temp_file = match create_new(&temp) {
            Ok(file) => file,
            Err(e) => return with_cleanup(Err(e), output),
        };
        state = DecryptState::TempFileCreated;
        log_state(state);

        let mut result = self.decrypt_via_temp(&mut temp_file, &temp, input, output, key, &mut state);
        drop(temp_file);

        if result.is_err() {
            if let Err(cleanup_error) = remove_if_present(output) {
                result = Err(CryptoError::TempFileCleanupFailed {
                    path: output.to_path_buf(),
                    cleanup_error,
                    original: result.err().map(Box::new),
                });
            }
        }

        state = DecryptState::Cleanup;
        log_state(state);
        with_cleanup(result, &temp)
    }

    fn decrypt_via_temp(
        &self,
        temp_file: &mut File,
        temp: &Path,
        input: &Path,
        output: &Path,
        key: &str,
        state: &mut DecryptState,
    ) -> Result<()> {
        let cfg = &self.config;
        let iv_len = cfg.cipher().iv_len();
        let mac_len = cfg.trailer_len();

        io::copy(&mut File::open(input)?, temp_file)?;
        temp_file.flush()?;

        let len = temp_file.metadata()?.len();
        let minimum = cfg.min_envelope_len();
        if len < minimum as u64 {
            return Err(CryptoError::TooShort {
                minimum,
                actual: len as usize,
            });
        }

        let mut tail = vec![0u8; iv_len + mac_len];
        let mut reader = File::open(temp)?;
        reader.seek(SeekFrom::End(-(tail.len() as i64)))?;
        reader.read_exact(&mut tail)?;
        let (iv, stored_mac) = tail.split_at(iv_len);

        let keys = cfg.key_derivation().derive(key, iv, cfg.key_sizes())?;

        if let Some(mac_key) = keys.mac_key() {
            self.truncate(temp, mac_len)?;
            let computed = self.dgst(mac_key, temp)?;
            if !constant_time_eq(&computed, stored_mac) {
                *state = DecryptState::HmacFailed;
                log_state(*state);
                return Err(CryptoError::AuthenticationFailed("file HMAC mismatch".into()));
            }
            *state = DecryptState::HmacVerified;
            log_state(*state);
        }

        self.truncate(temp, iv_len)?;
        *state = DecryptState::Truncated;
        log_state(*state);

        let decrypted = self.run(
            vec![
                self.tools.openssl.clone(),
                "enc".into(),
                "-d".into(),
                format!("-{}", cfg.cipher()),
                "-in".into(),
                path_arg(temp)?,
                "-out".into(),
                path_arg(output)?,
                "-K".into(),
                hex::encode(keys.enc_key()),
                "-iv".into(),
                hex::encode(iv),
            ],
            None,
        );
        *state = match decrypted {
            Ok(_) => DecryptState::Decrypted,
            Err(_) => DecryptState::DecryptFailed,
        };
        log_state(*state);
        decrypted.map(|_| ())
    }

    fn dgst(&self, mac_key: &[u8], path: &Path) -> Result<Vec<u8>> {
        let hash = self.config.hash();
        let out = self.run(
            vec![
                self.tools.openssl.clone(),
                "dgst".into(),
                format!("-{}", hash.name()),
                "-mac".into(),
                "HMAC".into(),
                "-macopt".into(),
                format!("hexkey:{}", hex::encode(mac_key)),
                "-binary".into(),
                path_arg(path)?,
            ],
            None,
        )?;
        expect_len(&out, hash.output_len(), &self.tools.openssl)?;
        Ok(out.stdout)
    }

    fn truncate(&self, path: &Path, bytes: usize) -> Result<()> {
        self.run(
            vec![
                self.tools.truncate.clone(),
                "-s".into(),
                format!("-{bytes}"),
                path_arg(path)?,
            ],
            None,
        )
        .map(|_| ())
    }

    /// Run one command; a non-zero exit becomes [`CryptoError::ExternalCommandFailed`].
    fn run(&self, argv: Vec<String>, stdin: Option<Vec<u8>>) -> Result<CommandOutput> {
        tracing::debug!(program = %argv[0], "running external command");
        let out = self.runner.run(&argv, stdin)?;
        tracing::trace!(program = %argv[0], exit_code = out.exit_code, "external command finished");
        if out.success() {
            return Ok(out);
        }
        Err(CryptoError::ExternalCommandFailed {
            command: redact(&argv),
            exit_code: out.exit_code,
            output: self
                .include_output
                .then(|| String::from_utf8_lossy(&out.stderr).into_owned()),
        })
    }
}

/// Run each tool's version command and report what was found.
pub fn check_tools(runner: &dyn CommandRunner, tools: &ToolNames) -> FileSetupReport {
    let checks = [
        (&tools.openssl, "version", "symmetric cipher and HMAC"),
        (&tools.xxd, "-v", "hex to binary conversion"),
        (&tools.truncate, "--version", "removing trailing IV and HMAC"),
    ];
    let commands = checks
        .into_iter()
        .map(|(name, arg, purpose)| {
            let outcome = runner.run(&[name.clone(), arg.to_owned()], None);
            let (found, exit_code, version) = match outcome {
                Ok(out) => {
                    let banner = if out.stdout.is_empty() { &out.stderr } else { &out.stdout };
                    let version = String::from_utf8_lossy(banner).lines().next().map(str::to_owned);
                    (out.success(), Some(out.exit_code), version)
                }
                Err(_) => (false, None, None),
            };
            tracing::debug!(command = %name, found, "checked external command");
            CommandCheck {
                name: name.clone(),
                purpose: purpose.to_owned(),
                found,
                exit_code,
                version: version.filter(|_| found),
            }
        })
        .collect();

    FileSetupReport {
        platform_supported: !cfg!(windows),
        commands,
    }
}

/// Render an argv with key material replaced.
pub fn redact(argv: &[String]) -> String {
    let mut out = Vec::with_capacity(argv.len());
    let mut hide_next = false;
    for arg in argv {
        if hide_next {
            out.push("<redacted>".to_owned());
            hide_next = false;
        } else if arg.starts_with("hexkey:") {
            out.push("hexkey:<redacted>".to_owned());
        } else {
            hide_next = arg == "-K";
            out.push(arg.clone());
        }
    }
    out.join(" ")
}

/// Deterministic temp name beside the output.
pub fn temp_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".decrypting");
    output.with_file_name(name)
}

fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| CryptoError::InvalidArgument(format!("path {} is not valid UTF-8", path.display())))
}

fn append(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    Ok(())
}

fn expect_len(out: &CommandOutput, expected: usize, program: &str) -> Result<()> {
    if out.stdout.len() == expected {
        return Ok(());
    }
    Err(CryptoError::ExternalCommandFailed {
        command: program.to_owned(),
        exit_code: out.exit_code,
        output: Some(format!("expected {expected} bytes of output, got {}", out.stdout.len())),
    })
}

fn log_state(state: DecryptState) {
    tracing::debug!(?state, "pipeline decrypt");
}
