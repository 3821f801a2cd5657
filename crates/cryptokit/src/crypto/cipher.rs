//! AES block-mode and AEAD primitives.
//!
//! Supported modes:
//! - **CBC** with PKCS#7 padding and **CTR** (128-bit big-endian counter).
//!   Neither authenticates; callers pair them with an HMAC.
//! - **GCM** and **CCM**, both AEAD with a 16-byte tag and 12-byte nonce.
//!
//! Byte layouts match OpenSSL's `aes-*-cbc` / `aes-*-ctr`, so data produced
//! here can be processed by `openssl enc` and vice versa.

use std::fmt;
use std::str::FromStr;

use aes::cipher::{
    block_padding::Pkcs7, consts::U12, consts::U16, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    StreamCipher,
};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
use aes_gcm::AesGcm;
use ccm::Ccm;
use serde::{Deserialize, Serialize};

use common::{CryptoError, Result};

use self::AesKeySize as K;
use self::CipherMode as M;

/// Byte length of the AEAD authentication tag.
pub const TAG_LEN: usize = 16;

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// AES key size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesKeySize {
    Bits128,
    Bits192,
    Bits256,
}

impl AesKeySize {
    pub fn bits(self) -> usize {
        match self {
            AesKeySize::Bits128 => 128,
            AesKeySize::Bits192 => 192,
            AesKeySize::Bits256 => 256,
        }
    }
}

/// Block-cipher mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    Cbc,
    Ctr,
    Gcm,
    Ccm,
}

impl CipherMode {
    fn name(self) -> &'static str {
        match self {
            CipherMode::Cbc => "cbc",
            CipherMode::Ctr => "ctr",
            CipherMode::Gcm => "gcm",
            CipherMode::Ccm => "ccm",
        }
    }
}

/// An AES cipher selection such as `aes-256-cbc`.
///
/// Parsed from and displayed as the OpenSSL-style lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CipherAlgorithm {
    pub key_size: AesKeySize,
    pub mode: CipherMode,
}

impl CipherAlgorithm {
    pub const AES_256_CBC: Self = Self::new(AesKeySize::Bits256, CipherMode::Cbc);
    pub const AES_256_CTR: Self = Self::new(AesKeySize::Bits256, CipherMode::Ctr);
    pub const AES_256_GCM: Self = Self::new(AesKeySize::Bits256, CipherMode::Gcm);
    pub const AES_256_CCM: Self = Self::new(AesKeySize::Bits256, CipherMode::Ccm);

    pub const fn new(key_size: AesKeySize, mode: CipherMode) -> Self {
        Self { key_size, mode }
    }

    /// Encryption key length in bytes.
    pub fn key_len(self) -> usize {
        self.key_size.bits() / 8
    }

    /// IV / nonce length in bytes.
    pub fn iv_len(self) -> usize {
        match self.mode {
            CipherMode::Cbc | CipherMode::Ctr => BLOCK_LEN,
            CipherMode::Gcm | CipherMode::Ccm => 12,
        }
    }

    /// `true` iff the algorithm name ends in `gcm` or `ccm`.
    pub fn is_aead(self) -> bool {
        let name = self.to_string();
        name.ends_with("gcm") || name.ends_with("ccm")
    }

    /// Smallest ciphertext (excluding IV and tag) this mode can produce.
    pub fn min_ciphertext_len(self) -> usize {
        match self.mode {
            CipherMode::Cbc => BLOCK_LEN,
            _ => 0,
        }
    }
}

impl Default for CipherAlgorithm {
    fn default() -> Self {
        Self::AES_256_CBC
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aes-{}-{}", self.key_size.bits(), self.mode.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let unsupported = || {
            CryptoError::InvalidConfig(format!(
                "unsupported cipher `{s}` (expected aes-<128|192|256>-<cbc|ctr|gcm|ccm>)"
            ))
        };
        let mut parts = lower.split('-');
        if parts.next() != Some("aes") {
            return Err(unsupported());
        }
        let key_size = match parts.next() {
            Some("128") => AesKeySize::Bits128,
            Some("192") => AesKeySize::Bits192,
            Some("256") => AesKeySize::Bits256,
            _ => return Err(unsupported()),
        };
        let mode = match parts.next() {
            Some("cbc") => CipherMode::Cbc,
            Some("ctr") => CipherMode::Ctr,
            Some("gcm") => CipherMode::Gcm,
            Some("ccm") => CipherMode::Ccm,
            _ => return Err(unsupported()),
        };
        if parts.next().is_some() {
            return Err(unsupported());
        }
        Ok(Self::new(key_size, mode))
    }
}

impl TryFrom<String> for CipherAlgorithm {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CipherAlgorithm> for String {
    fn from(value: CipherAlgorithm) -> Self {
        value.to_string()
    }
}

/// Output of [`encrypt`]: ciphertext plus the AEAD tag for GCM/CCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: Option<Vec<u8>>,
}

/// Encrypt `plaintext` under `key` and `iv`.
///
/// `aad` is bound into the tag for AEAD modes and ignored otherwise.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeySize`] if `key` does not match the cipher,
/// [`CryptoError::InvalidArgument`] if `iv` has the wrong length.
pub fn encrypt(
    algorithm: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Sealed> {
    check_lengths(algorithm, key, iv)?;

    let ciphertext = match (algorithm.mode, algorithm.key_size) {
        (M::Cbc, K::Bits128) => cbc_encrypt::<cbc::Encryptor<Aes128>>(key, iv, plaintext)?,
        (M::Cbc, K::Bits192) => cbc_encrypt::<cbc::Encryptor<Aes192>>(key, iv, plaintext)?,
        (M::Cbc, K::Bits256) => cbc_encrypt::<cbc::Encryptor<Aes256>>(key, iv, plaintext)?,
        (M::Ctr, K::Bits128) => ctr_apply::<ctr::Ctr128BE<Aes128>>(key, iv, plaintext)?,
        (M::Ctr, K::Bits192) => ctr_apply::<ctr::Ctr128BE<Aes192>>(key, iv, plaintext)?,
        (M::Ctr, K::Bits256) => ctr_apply::<ctr::Ctr128BE<Aes256>>(key, iv, plaintext)?,
        (M::Gcm, K::Bits128) => return aead_encrypt::<AesGcm<Aes128, U12>>(key, iv, plaintext, aad),
        (M::Gcm, K::Bits192) => return aead_encrypt::<AesGcm<Aes192, U12>>(key, iv, plaintext, aad),
        (M::Gcm, K::Bits256) => return aead_encrypt::<AesGcm<Aes256, U12>>(key, iv, plaintext, aad),
        (M::Ccm, K::Bits128) => return aead_encrypt::<Ccm<Aes128, U16, U12>>(key, iv, plaintext, aad),
        (M::Ccm, K::Bits192) => return aead_encrypt::<Ccm<Aes192, U16, U12>>(key, iv, plaintext, aad),
        (M::Ccm, K::Bits256) => return aead_encrypt::<Ccm<Aes256, U16, U12>>(key, iv, plaintext, aad),
    };
    Ok(Sealed {
        ciphertext,
        tag: None,
    })
}

/// Decrypt `ciphertext` produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::AuthenticationFailed`] if an AEAD tag is missing or does not verify.
/// - [`CryptoError::DecryptionFailed`] if CBC padding is invalid.
/// - [`CryptoError::InvalidKeySize`] / [`CryptoError::InvalidArgument`] on bad lengths.
pub fn decrypt(
    algorithm: CipherAlgorithm,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: Option<&[u8]>,
    aad: &[u8],
) -> Result<Vec<u8>> {
    check_lengths(algorithm, key, iv)?;

    match (algorithm.mode, algorithm.key_size) {
        (M::Cbc, K::Bits128) => cbc_decrypt::<cbc::Decryptor<Aes128>>(key, iv, ciphertext),
        (M::Cbc, K::Bits192) => cbc_decrypt::<cbc::Decryptor<Aes192>>(key, iv, ciphertext),
        (M::Cbc, K::Bits256) => cbc_decrypt::<cbc::Decryptor<Aes256>>(key, iv, ciphertext),
        (M::Ctr, K::Bits128) => ctr_apply::<ctr::Ctr128BE<Aes128>>(key, iv, ciphertext),
        (M::Ctr, K::Bits192) => ctr_apply::<ctr::Ctr128BE<Aes192>>(key, iv, ciphertext),
        (M::Ctr, K::Bits256) => ctr_apply::<ctr::Ctr128BE<Aes256>>(key, iv, ciphertext),
        (M::Gcm, K::Bits128) => aead_decrypt::<AesGcm<Aes128, U12>>(key, iv, &with_tag(ciphertext, tag)?, aad),
        (M::Gcm, K::Bits192) => aead_decrypt::<AesGcm<Aes192, U12>>(key, iv, &with_tag(ciphertext, tag)?, aad),
        (M::Gcm, K::Bits256) => aead_decrypt::<AesGcm<Aes256, U12>>(key, iv, &with_tag(ciphertext, tag)?, aad),
        (M::Ccm, K::Bits128) => aead_decrypt::<Ccm<Aes128, U16, U12>>(key, iv, &with_tag(ciphertext, tag)?, aad),
        (M::Ccm, K::Bits192) => aead_decrypt::<Ccm<Aes192, U16, U12>>(key, iv, &with_tag(ciphertext, tag)?, aad),
        (M::Ccm, K::Bits256) => aead_decrypt::<Ccm<Aes256, U16, U12>>(key, iv, &with_tag(ciphertext, tag)?, aad),
    }
}

/// `ciphertext || tag`, the layout the AEAD implementations expect.
fn with_tag(ciphertext: &[u8], tag: Option<&[u8]>) -> Result<Vec<u8>> {
    let tag = tag
        .filter(|t| t.len() == TAG_LEN)
        .ok_or_else(|| CryptoError::AuthenticationFailed(format!("missing {TAG_LEN}-byte tag")))?;
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    Ok(combined)
}

fn check_lengths(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> Result<()> {
    if key.len() != algorithm.key_len() {
        return Err(CryptoError::InvalidKeySize {
            expected: algorithm.key_len(),
            actual: key.len(),
        });
    }
    if iv.len() != algorithm.iv_len() {
        return Err(CryptoError::InvalidArgument(format!(
            "{algorithm} requires a {}-byte IV, got {}",
            algorithm.iv_len(),
            iv.len()
        )));
    }
    Ok(())
}

fn key_iv_error<E: fmt::Display>(e: E) -> CryptoError {
    CryptoError::InvalidArgument(format!("cipher rejected key or IV: {e}"))
}

fn cbc_encrypt<E: KeyIvInit + BlockEncryptMut>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let encryptor = E::new_from_slices(key, iv).map_err(key_iv_error)?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt<D: KeyIvInit + BlockDecryptMut>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let decryptor = D::new_from_slices(key, iv).map_err(key_iv_error)?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("invalid block length or padding".into()))
}

fn ctr_apply<C: KeyIvInit + StreamCipher>(key: &[u8], iv: &[u8], input: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = C::new_from_slices(key, iv).map_err(key_iv_error)?;
    let mut buf = input.to_vec();
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

fn aead_encrypt<A: Aead + KeyInit>(key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let cipher = A::new_from_slice(key).map_err(key_iv_error)?;
    let mut out = cipher
        .encrypt(GenericArray::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::InvalidArgument("aead encryption failed".into()))?;
    let tag = out.split_off(out.len() - TAG_LEN);
    Ok(Sealed {
        ciphertext: out,
        tag: Some(tag),
    })
}

fn aead_decrypt<A: Aead + KeyInit>(key: &[u8], iv: &[u8], combined: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = A::new_from_slice(key).map_err(key_iv_error)?;
    cipher
        .decrypt(GenericArray::from_slice(iv), Payload { msg: combined, aad })
        .map_err(|_| CryptoError::AuthenticationFailed("aead tag mismatch".into()))
}
