//! Key validation and derivation shared by every symmetric component.
//!
//! A caller-supplied key is either a **raw key** (hex, decoded length checked
//! exactly) or a **password** (stretched with PBKDF2 using the operation's IV
//! as salt). Either way the result is split into an encryption key and, for
//! non-AEAD authenticated modes, an HMAC key.
//!
//! # Security invariants
//!
//! - Derived key bytes live in [`Zeroizing`] buffers and are wiped on drop.
//! - Key material is never logged or included in error messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use common::{CryptoError, Result};

use crate::crypto::HashAlgorithm;

/// Default PBKDF2 iteration count.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 200_000;

/// How the caller's key string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// Hex-encoded key of exactly the required length.
    #[default]
    RawKey,
    /// Arbitrary-length secret expanded with PBKDF2.
    Password,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyType::RawKey => "raw-key",
            KeyType::Password => "password",
        })
    }
}

impl FromStr for KeyType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw-key" | "key" => Ok(KeyType::RawKey),
            "password" => Ok(KeyType::Password),
            other => Err(CryptoError::InvalidConfig(format!(
                "unknown key type `{other}` (expected raw-key or password)"
            ))),
        }
    }
}

/// PBKDF2 parameters. Changing them changes every derived key, so callers
/// that lower the iteration count must keep track of it alongside their data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pbkdf2Params {
    pub hash: HashAlgorithm,
    pub iterations: u32,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::Sha512,
            iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

/// Byte lengths of the key segments an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySizes {
    pub enc_len: usize,
    /// `0` when no HMAC key is needed (AEAD, or authentication disabled).
    pub mac_len: usize,
}

impl KeySizes {
    /// Sizes from bit lengths; the MAC segment is dropped for AEAD ciphers.
    pub fn from_bits(enc_bits: usize, mac_bits: usize, is_aead: bool) -> Self {
        Self {
            enc_len: enc_bits / 8,
            mac_len: if is_aead { 0 } else { mac_bits / 8 },
        }
    }

    pub fn total(&self) -> usize {
        self.enc_len + self.mac_len
    }
}

/// Encryption key plus optional HMAC key, wiped on drop.
pub struct DerivedKeys {
    enc: Zeroizing<Vec<u8>>,
    mac: Option<Zeroizing<Vec<u8>>>,
}

impl DerivedKeys {
    fn split(mut material: Zeroizing<Vec<u8>>, sizes: KeySizes) -> Self {
        let mac = (sizes.mac_len > 0).then(|| Zeroizing::new(material.split_off(sizes.enc_len)));
        Self { enc: material, mac }
    }

    pub fn enc_key(&self) -> &[u8] {
        &self.enc
    }

    pub fn mac_key(&self) -> Option<&[u8]> {
        self.mac.as_deref().map(Vec::as_slice)
    }
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKeys([REDACTED])")
    }
}

/// Turns a caller key into [`DerivedKeys`] according to a [`KeyType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyDerivation {
    pub key_type: KeyType,
    pub pbkdf2: Pbkdf2Params,
}

impl KeyDerivation {
    pub fn new(key_type: KeyType, pbkdf2: Pbkdf2Params) -> Self {
        Self { key_type, pbkdf2 }
    }

    /// Derive the encryption and HMAC keys for one operation.
    ///
    /// `salt` is only used for password keys; callers pass the operation's IV.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidKeySize`] if a raw key decodes to the wrong length,
    ///   reporting the exact required length.
    /// - [`CryptoError::InvalidKeyFormat`] if a raw key is not hex or a password is empty.
    pub fn derive(&self, key: &str, salt: &[u8], sizes: KeySizes) -> Result<DerivedKeys> {
        let material = match self.key_type {
            KeyType::RawKey => decode_raw_key(key, sizes.total())?,
            KeyType::Password => {
                if key.is_empty() {
                    return Err(CryptoError::InvalidKeyFormat("password must not be empty".into()));
                }
                pbkdf2(self.pbkdf2, key.as_bytes(), salt, sizes.total())
            }
        };
        Ok(DerivedKeys::split(material, sizes))
    }
}

/// Decode a hex raw key and check it is exactly `expected` bytes.
pub fn decode_raw_key(key: &str, expected: usize) -> Result<Zeroizing<Vec<u8>>> {
    if key.is_empty() {
        return Err(CryptoError::InvalidKeySize { expected, actual: 0 });
    }
    validate_hex(key, HexContext::Key)?;
    let bytes = Zeroizing::new(
        hex::decode(key).map_err(|_| CryptoError::InvalidKeyFormat("key must be hex-encoded".into()))?,
    );
    if bytes.len() != expected {
        return Err(CryptoError::InvalidKeySize {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// PBKDF2-HMAC with the configured hash, producing `len` bytes.
pub fn pbkdf2(params: Pbkdf2Params, password: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    match params.hash {
        HashAlgorithm::Sha256 => pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password, salt, params.iterations, &mut out),
        HashAlgorithm::Sha384 => pbkdf2::pbkdf2_hmac::<sha2::Sha384>(password, salt, params.iterations, &mut out),
        HashAlgorithm::Sha512 => pbkdf2::pbkdf2_hmac::<sha2::Sha512>(password, salt, params.iterations, &mut out),
    }
    out
}

/// Where a hex string came from, which decides how a bad value is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexContext {
    /// A key argument: invalid hex is a programming error.
    Key,
    /// Ciphertext or other untrusted data: invalid hex signals tampering.
    Data,
}

/// `true` if `value` is non-empty, of even length and made only of hex digits.
pub fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.len() % 2 == 0 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Validate a hex string.
///
/// Returns `Ok(true)` when valid. An invalid value yields `Ok(false)` in the
/// [`HexContext::Data`] context and [`CryptoError::InvalidKeyFormat`] in the
/// [`HexContext::Key`] context.
pub fn validate_hex(value: &str, context: HexContext) -> Result<bool> {
    if is_hex(value) {
        return Ok(true);
    }
    match context {
        HexContext::Data => Ok(false),
        HexContext::Key => Err(CryptoError::InvalidKeyFormat(
            "key must be a non-empty, even-length hex string".into(),
        )),
    }
}
