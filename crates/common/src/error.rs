//! Error taxonomy shared by every cryptokit component.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Every failure a cryptokit operation can report.
///
/// Variants fall into two groups:
/// - **Data errors** (malformed input, tampering, expiry): recoverable, and
///   swallowed into `None` by [`ErrorPolicy::ReturnNone`].
/// - **Misconfiguration** (see [`CryptoError::is_misconfiguration`]): programmer
///   errors that always surface, whatever the policy.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A raw key decoded to the wrong number of bytes.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    /// The key is not in an accepted text format (hex, base64, PEM).
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Input could not be decoded from its declared text encoding.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Input is shorter than the smallest envelope the configuration can produce.
    #[error("input too short: need at least {minimum} bytes, got {actual}")]
    TooShort { minimum: usize, actual: usize },

    /// MAC, AEAD tag or signature did not verify.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The cipher rejected the ciphertext (e.g. bad padding).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Authenticated data did not decode to a typed value.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// The value cannot be represented by the typed-value codec.
    #[error("invalid data type: {0}")]
    InvalidDataType(String),

    /// A null value was encoded while null values are disabled.
    #[error("null values are not allowed unless explicitly enabled")]
    NullNotAllowed,

    /// A signed token or JWT is past its expiry.
    #[error("expired: {0}")]
    Expired(String),

    /// A JWT `nbf` claim lies in the future.
    #[error("not yet valid: {0}")]
    NotYetValid(String),

    /// A JWT claim is missing, mistyped or not in the allowed set.
    #[error("claim validation failed for `{claim}`: {reason}")]
    ClaimValidationFailed { claim: String, reason: String },

    /// The algorithm is unsupported or not in the caller's allow-list.
    #[error("algorithm not allowed: {0}")]
    AlgorithmNotAllowed(String),

    /// The RSA key-generation primitive failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// An external command exited non-zero.
    ///
    /// `command` is a redacted rendering of the argv; `output` is only present
    /// when the caller opted into capturing command output.
    #[error("{}", describe_command_failure(.command, .exit_code, .output.as_deref()))]
    ExternalCommandFailed {
        command: String,
        exit_code: i32,
        output: Option<String>,
    },

    /// Refusing to overwrite an existing file.
    #[error("file already exists: {}", .0.display())]
    FileAlreadyExists(PathBuf),

    /// A required input file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A temporary or partial file could not be removed.
    ///
    /// `original` is the error that triggered the cleanup, if any.
    #[error("{}", describe_cleanup_failure(.path, .cleanup_error, .original.as_deref()))]
    TempFileCleanupFailed {
        path: PathBuf,
        cleanup_error: String,
        original: Option<Box<CryptoError>>,
    },

    /// A component was built with an invalid or unsupported configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A non-secret argument is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The platform CSPRNG could not produce bytes.
    #[error("secure random source unavailable: {0}")]
    RandomUnavailable(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat discriminant of [`CryptoError`], convenient for matching and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidKeySize,
    InvalidKeyFormat,
    MalformedEncoding,
    TooShort,
    AuthenticationFailed,
    DecryptionFailed,
    FormatMismatch,
    InvalidDataType,
    NullNotAllowed,
    Expired,
    NotYetValid,
    ClaimValidationFailed,
    AlgorithmNotAllowed,
    KeyGenerationFailed,
    ExternalCommandFailed,
    FileAlreadyExists,
    FileNotFound,
    TempFileCleanupFailed,
    InvalidConfig,
    InvalidArgument,
    RandomUnavailable,
    Io,
}

impl CryptoError {
    /// Returns the flat [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::InvalidKeySize { .. } => ErrorKind::InvalidKeySize,
            CryptoError::InvalidKeyFormat(_) => ErrorKind::InvalidKeyFormat,
            CryptoError::MalformedEncoding(_) => ErrorKind::MalformedEncoding,
            CryptoError::TooShort { .. } => ErrorKind::TooShort,
            CryptoError::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            CryptoError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            CryptoError::FormatMismatch(_) => ErrorKind::FormatMismatch,
            CryptoError::InvalidDataType(_) => ErrorKind::InvalidDataType,
            CryptoError::NullNotAllowed => ErrorKind::NullNotAllowed,
            CryptoError::Expired(_) => ErrorKind::Expired,
            CryptoError::NotYetValid(_) => ErrorKind::NotYetValid,
            CryptoError::ClaimValidationFailed { .. } => ErrorKind::ClaimValidationFailed,
            CryptoError::AlgorithmNotAllowed(_) => ErrorKind::AlgorithmNotAllowed,
            CryptoError::KeyGenerationFailed(_) => ErrorKind::KeyGenerationFailed,
            CryptoError::ExternalCommandFailed { .. } => ErrorKind::ExternalCommandFailed,
            CryptoError::FileAlreadyExists(_) => ErrorKind::FileAlreadyExists,
            CryptoError::FileNotFound(_) => ErrorKind::FileNotFound,
            CryptoError::TempFileCleanupFailed { .. } => ErrorKind::TempFileCleanupFailed,
            CryptoError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            CryptoError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CryptoError::RandomUnavailable(_) => ErrorKind::RandomUnavailable,
            CryptoError::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns `true` for programmer errors that must never be swallowed:
    /// bad keys passed in code, bad configuration, a missing CSPRNG.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidKeySize
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidConfig
                | ErrorKind::InvalidArgument
                | ErrorKind::RandomUnavailable
                | ErrorKind::KeyGenerationFailed
        )
    }
}

/// How verification-style operations report data errors.
///
/// `decrypt`, `verify` and JWT `decode` return `Result<Option<T>>`. Under
/// [`ErrorPolicy::ReturnNone`] every data error collapses into `Ok(None)` so
/// callers can use a presence check; [`ErrorPolicy::Propagate`] surfaces the
/// specific error. Misconfiguration is returned as `Err` under both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    ReturnNone,
    Propagate,
}

impl ErrorPolicy {
    /// Maps the `exception_on_error` configuration flag to a policy.
    pub fn from_exception_on_error(exception_on_error: bool) -> Self {
        if exception_on_error {
            ErrorPolicy::Propagate
        } else {
            ErrorPolicy::ReturnNone
        }
    }

    /// Apply the policy to the outcome of a verification-style operation.
    pub fn apply<T>(self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self == ErrorPolicy::Propagate || e.is_misconfiguration() => Err(e),
            Err(_) => Ok(None),
        }
    }
}

fn describe_command_failure(command: &str, exit_code: &i32, output: Option<&str>) -> String {
    let mut msg = if *exit_code == 127 {
        format!("external command not found (exit code 127): {command}")
    } else {
        format!("external command failed with exit code {exit_code}: {command}")
    };
    if let Some(out) = output.filter(|o| !o.trim().is_empty()) {
        msg.push_str("; output: ");
        msg.push_str(out.trim());
    }
    msg
}

fn describe_cleanup_failure(path: &Path, cleanup_error: &str, original: Option<&CryptoError>) -> String {
    let stranded = format!(
        "failed to remove temporary file {} ({cleanup_error}); it may still be on disk and must be removed manually",
        path.display()
    );
    match original {
        Some(e) => format!("{e}; additionally {stranded}"),
        None => stranded,
    }
}
