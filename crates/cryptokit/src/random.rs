//! Byte source backed by the operating system CSPRNG.
//!
//! Every IV, generated key and pipeline IV comes from here. A failure of the OS
//! generator is reported as [`CryptoError::RandomUnavailable`] and is never
//! retried or replaced by a weaker source.

use rand::rngs::OsRng;
use rand::RngCore;

use common::{CryptoError, Result};

/// Fill `buf` with cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`CryptoError::RandomUnavailable`] if the OS generator fails.
pub fn fill(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))
}

/// Return `length` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`CryptoError::RandomUnavailable`] if the OS generator fails.
pub fn bytes(length: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; length];
    fill(&mut buf)?;
    Ok(buf)
}

/// Return `length` random bytes as lowercase hex (`2 * length` characters).
pub fn hex(length: usize) -> Result<String> {
    bytes(length).map(hex::encode)
}
