//! Whole-file encryption with two interchangeable backends.
//!
//! - [`MemoryBackend`] reads the file, seals it with [`Encryption`] and writes the envelope.
//! - [`PipelineBackend`] drives `openssl`, `xxd` and `truncate` so the file never has to
//!   fit in memory.
//!
//! Both produce the same envelope as [`Encryption::seal`] (ciphertext, IV, then HMAC),
//! so a file written by one backend can be read by the other given the same settings.
//!
//! # Concurrency
//!
//! The pipeline decrypts through a temporary copy named after the output file. Two
//! decrypts targeting the same output therefore collide; the second one fails with
//! [`CryptoError::FileAlreadyExists`] on the temp file. Callers must serialise them.

mod memory;
mod pipeline;
mod runner;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use common::protocol::FileSetupReport;
use common::{CryptoError, Result};

use crate::crypto::{CipherAlgorithm, HashAlgorithm};
use crate::encoding::OutputEncoding;
use crate::encryption::{DataFormat, Encryption, EncryptionConfig};
use crate::keys::{KeyType, Pbkdf2Params};

pub use memory::MemoryBackend;
pub use pipeline::{DecryptState, PipelineBackend, ToolNames};
pub use runner::{CommandOutput, CommandRunner, SystemCommandRunner, EXIT_NOT_FOUND};

#[cfg(test)]
pub use runner::MockCommandRunner;

/// Validated configuration for [`FileEncryption`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEncryptionConfig {
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
    key_type: KeyType,
    pbkdf2: Pbkdf2Params,
    encrypt_then_authenticate: bool,
    use_external_commands: bool,
    include_command_output: bool,
    tools: ToolNames,
}

impl Default for FileEncryptionConfig {
    fn default() -> Self {
        Self {
            cipher: CipherAlgorithm::default(),
            hash: HashAlgorithm::default(),
            key_type: KeyType::default(),
            pbkdf2: Pbkdf2Params::default(),
            encrypt_then_authenticate: true,
            use_external_commands: false,
            include_command_output: false,
            tools: ToolNames::default(),
        }
    }
}

impl FileEncryptionConfig {
    pub fn builder() -> FileEncryptionConfigBuilder {
        FileEncryptionConfigBuilder::default()
    }

    pub fn use_external_commands(&self) -> bool {
        self.use_external_commands
    }

    pub fn include_command_output(&self) -> bool {
        self.include_command_output
    }

    pub fn tools(&self) -> &ToolNames {
        &self.tools
    }

    /// The equivalent [`EncryptionConfig`]: string-only data, raw output, errors propagated.
    pub fn encryption_config(&self) -> Result<EncryptionConfig> {
        EncryptionConfig::builder()
            .cipher(self.cipher)
            .hash(self.hash)
            .key_type(self.key_type)
            .pbkdf2(self.pbkdf2)
            .encrypt_then_authenticate(self.encrypt_then_authenticate)
            .data_format(DataFormat::StringOnly)
            .output(OutputEncoding::Raw)
            .exception_on_error(true)
            .build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileEncryptionConfigBuilder {
    inner: FileEncryptionConfig,
}

impl FileEncryptionConfigBuilder {
    pub fn cipher(mut self, cipher: CipherAlgorithm) -> Self {
        self.inner.cipher = cipher;
        self
    }

    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.inner.hash = hash;
        self
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.inner.key_type = key_type;
        self
    }

    pub fn pbkdf2(mut self, params: Pbkdf2Params) -> Self {
        self.inner.pbkdf2 = params;
        self
    }

    pub fn encrypt_then_authenticate(mut self, enabled: bool) -> Self {
        self.inner.encrypt_then_authenticate = enabled;
        self
    }

    /// Select the external-pipeline backend.
    pub fn use_external_commands(mut self, enabled: bool) -> Self {
        self.inner.use_external_commands = enabled;
        self
    }

    /// Attach command stderr to [`CryptoError::ExternalCommandFailed`].
    pub fn include_command_output(mut self, enabled: bool) -> Self {
        self.inner.include_command_output = enabled;
        self
    }

    pub fn tools(mut self, tools: ToolNames) -> Self {
        self.inner.tools = tools;
        self
    }

    /// # Errors
    ///
    /// [`CryptoError::InvalidConfig`] if the pipeline is selected with an AEAD
    /// cipher or on Windows, or if the PBKDF2 iteration count is zero.
    pub fn build(self) -> Result<FileEncryptionConfig> {
        let cfg = self.inner;
        if cfg.use_external_commands {
            if cfg!(windows) {
                return Err(CryptoError::InvalidConfig(
                    "the external-command backend is not available on Windows".into(),
                ));
            }
            if cfg.cipher.is_aead() {
                return Err(CryptoError::InvalidConfig(format!(
                    "the external-command backend supports CBC and CTR only, not {}",
                    cfg.cipher
                )));
            }
        }
        cfg.encryption_config()?;
        Ok(cfg)
    }
}

enum Backend {
    Memory(MemoryBackend),
    Pipeline(PipelineBackend),
}

/// Encrypts and decrypts files with the backend chosen by the configuration.
pub struct FileEncryption {
    config: FileEncryptionConfig,
    encryption: Encryption,
    backend: Backend,
    runner: std::sync::Arc<dyn CommandRunner + Send + Sync>,
}

impl std::fmt::Debug for FileEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEncryption")
            .field("config", &self.config)
            .field("external", &self.is_external_backend())
            .finish_non_exhaustive()
    }
}

impl FileEncryption {
    pub fn new(config: FileEncryptionConfig) -> Result<Self> {
        Self::with_runner(config, SystemCommandRunner)
    }

    /// Build with a custom [`CommandRunner`], e.g. one that maps tool names or a test fake.
    pub fn with_runner(config: FileEncryptionConfig, runner: impl CommandRunner + Send + Sync + 'static) -> Result<Self> {
        let encryption = Encryption::new(config.encryption_config()?);
        let runner: std::sync::Arc<dyn CommandRunner + Send + Sync> = std::sync::Arc::new(runner);
        let backend = if config.use_external_commands {
            Backend::Pipeline(PipelineBackend::new(
                encryption.config().clone(),
                config.tools.clone(),
                config.include_command_output,
                runner.clone(),
            ))
        } else {
            Backend::Memory(MemoryBackend::new(encryption.clone()))
        };
        tracing::debug!(external = config.use_external_commands, cipher = %config.cipher, "file encryption ready");
        Ok(Self {
            config,
            encryption,
            backend,
            runner,
        })
    }

    pub fn config(&self) -> &FileEncryptionConfig {
        &self.config
    }

    pub fn is_external_backend(&self) -> bool {
        matches!(self.backend, Backend::Pipeline(_))
    }

    /// A random hex key of the size this configuration requires.
    pub fn generate_key(&self) -> Result<String> {
        self.encryption.generate_key()
    }

    /// Encrypt `input` into a new file at `output`.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::FileNotFound`] / [`CryptoError::FileAlreadyExists`] /
    ///   [`CryptoError::InvalidArgument`] from path validation.
    /// - [`CryptoError::ExternalCommandFailed`] from the pipeline.
    /// - [`CryptoError::TempFileCleanupFailed`] if a partial output could not be removed.
    pub fn encrypt_file(&self, input: &Path, output: &Path, key: &str) -> Result<()> {
        validate_paths(input, output)?;
        match &self.backend {
            Backend::Memory(b) => b.encrypt(input, output, key),
            Backend::Pipeline(b) => b.encrypt(input, output, key),
        }
    }

    /// Decrypt `input` into a new file at `output`.
    pub fn decrypt_file(&self, input: &Path, output: &Path, key: &str) -> Result<()> {
        validate_paths(input, output)?;
        match &self.backend {
            Backend::Memory(b) => b.decrypt(input, output, key),
            Backend::Pipeline(b) => b.decrypt(input, output, key),
        }
    }

    /// Check that the external commands run. Diagnostic only.
    pub fn check_file_setup(&self) -> FileSetupReport {
        pipeline::check_tools(self.runner.as_ref(), &self.config.tools)
    }
}

/// Input must exist; output must not, and must be free of NUL and quote characters.
pub fn validate_paths(input: &Path, output: &Path) -> Result<()> {
    if !input.is_file() {
        return Err(CryptoError::FileNotFound(input.to_path_buf()));
    }
    let rendered = output.to_string_lossy();
    if rendered.contains(&['\0', '"', '\''][..]) {
        return Err(CryptoError::InvalidArgument(format!(
            "output path {rendered:?} contains a NUL or quote character"
        )));
    }
    if output.exists() {
        return Err(CryptoError::FileAlreadyExists(output.to_path_buf()));
    }
    Ok(())
}

/// Create `path` exclusively and write `bytes`; a partial file is removed on failure.
pub(crate) fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = create_new(path)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    match written {
        Ok(()) => Ok(()),
        Err(e) => with_cleanup(Err(e.into()), path),
    }
}

pub(crate) fn create_new(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => CryptoError::FileAlreadyExists(path.to_path_buf()),
            _ => CryptoError::Io(e),
        })
}

/// Remove `path`, treating "already gone" as success.
pub(crate) fn remove_if_present(path: &Path) -> std::result::Result<(), String> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Remove `path` and fold a removal failure into `result`.
pub(crate) fn with_cleanup<T>(result: Result<T>, path: &Path) -> Result<T> {
    match (result, remove_if_present(path)) {
        (result, Ok(())) => result,
        (Ok(_), Err(cleanup_error)) => Err(cleanup_failed(path, cleanup_error, None)),
        (Err(original), Err(cleanup_error)) => Err(cleanup_failed(path, cleanup_error, Some(original))),
    }
}

fn cleanup_failed(path: &Path, cleanup_error: String, original: Option<CryptoError>) -> CryptoError {
    CryptoError::TempFileCleanupFailed {
        path: PathBuf::from(path),
        cleanup_error,
        original: original.map(Box::new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;
    use tempfile::TempDir;

    fn fast() -> FileEncryptionConfigBuilder {
        FileEncryptionConfig::builder().pbkdf2(Pbkdf2Params {
            hash: HashAlgorithm::Sha512,
            iterations: 1_000,
        })
    }

    #[test]
    fn memory_round_trip() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain.bin");
        let sealed = dir.path().join("plain.bin.enc");
        let restored = dir.path().join("restored.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&plain, &data).unwrap();

        let files = FileEncryption::new(fast().build().unwrap()).unwrap();
        assert!(!files.is_external_backend());
        let key = files.generate_key().unwrap();
        files.encrypt_file(&plain, &sealed, &key).unwrap();
        assert_ne!(std::fs::read(&sealed).unwrap(), data);
        files.decrypt_file(&sealed, &restored, &key).unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), data);
    }

    #[test]
    fn memory_wrong_key_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("a");
        let sealed = dir.path().join("b");
        let restored = dir.path().join("c");
        std::fs::write(&plain, b"secret").unwrap();

        let files = FileEncryption::new(fast().key_type(KeyType::Password).build().unwrap()).unwrap();
        files.encrypt_file(&plain, &sealed, "pw-1").unwrap();
        let err = files.decrypt_file(&sealed, &restored, "pw-2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(!restored.exists());
    }

    #[test]
    fn path_rules() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("exists");
        std::fs::write(&existing, b"x").unwrap();
        let missing = dir.path().join("missing");

        let err = validate_paths(&missing, &dir.path().join("out")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        let err = validate_paths(&existing, &existing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileAlreadyExists);
        for bad in ["o\"ut", "o'ut"] {
            let err = validate_paths(&existing, &dir.path().join(bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn pipeline_rejects_aead() {
        let err = FileEncryptionConfig::builder()
            .cipher(CipherAlgorithm::AES_256_GCM)
            .use_external_commands(true)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        // The memory backend handles AEAD fine.
        FileEncryptionConfig::builder()
            .cipher(CipherAlgorithm::AES_256_GCM)
            .build()
            .unwrap();
    }

    #[test]
    fn cleanup_failure_is_reported_with_original_error() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory cannot be removed with remove_file.
        let stuck = dir.path().join("stuck");
        std::fs::create_dir(&stuck).unwrap();
        std::fs::write(stuck.join("child"), b"x").unwrap();

        let err = with_cleanup::<()>(Err(CryptoError::AuthenticationFailed("hmac".into())), &stuck).unwrap_err();
        match &err {
            CryptoError::TempFileCleanupFailed { original: Some(original), .. } => {
                assert_eq!(original.kind(), ErrorKind::AuthenticationFailed)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("removed manually"));

        let err = with_cleanup(Ok(()), &stuck).unwrap_err();
        assert!(matches!(err, CryptoError::TempFileCleanupFailed { original: None, .. }));
    }
}
