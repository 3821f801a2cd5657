//! Low-level AES and HMAC primitives.
//!
//! This module is intentionally free of key-derivation, encoding and file I/O
//! concerns. It provides the raw operations used by [`crate::encryption`],
//! [`crate::signed`] and [`crate::file`].
//!
//! # Envelope format
//!
//! ```text
//! non-AEAD:  ciphertext || IV || HMAC(ciphertext || IV || AAD)
//! AEAD:      ciphertext || IV || tag(16)
//! ```
//!
//! The IV trails the ciphertext so a streaming reader can locate it from the
//! end of a file without knowing the plaintext length.

pub mod cipher;
pub mod mac;

pub use cipher::{AesKeySize, CipherAlgorithm, CipherMode, TAG_LEN};
pub use mac::{constant_time_eq, hmac, HashAlgorithm};
