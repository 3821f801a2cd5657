//! RSA key-pair generation and PEM parsing for RS* JWTs.

use std::fmt;

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use common::{CryptoError, Result};

pub const DEFAULT_RSA_BITS: usize = 2048;

/// PEM-encoded RSA key pair. The private half is PKCS#8, the public half SPKI.
#[derive(Clone)]
pub struct RsaKeyPair {
    pub private_pem: Zeroizing<String>,
    pub public_pem: String,
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("private_pem", &"[REDACTED]")
            .field("public_pem", &self.public_pem)
            .finish()
    }
}

/// Generate an RSA key pair with a `bits`-bit modulus.
///
/// # Errors
///
/// Returns [`CryptoError::KeyGenerationFailed`] carrying the library's error
/// text if generation or PEM encoding fails.
pub fn generate_rsa_key_pair(bits: usize) -> Result<RsaKeyPair> {
    let failed = |e: &dyn fmt::Display| CryptoError::KeyGenerationFailed(e.to_string());

    let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| failed(&e))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private.to_pkcs8_pem(LineEnding::LF).map_err(|e| failed(&e))?;
    let public_pem = public.to_public_key_pem(LineEnding::LF).map_err(|e| failed(&e))?;

    Ok(RsaKeyPair { private_pem, public_pem })
}

/// Which half of a key pair a PEM block holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemKind {
    Private,
    Public,
}

/// Classify a PEM block by its `BEGIN` label, or `None` if `pem` is not PEM.
pub fn pem_kind(pem: &str) -> Option<PemKind> {
    let label = pem.trim_start().strip_prefix("-----BEGIN ")?.split_once("-----")?.0;
    if label.ends_with("PRIVATE KEY") {
        Some(PemKind::Private)
    } else if label.ends_with("PUBLIC KEY") {
        Some(PemKind::Public)
    } else {
        None
    }
}

fn expect_kind(pem: &str, wanted: PemKind) -> Result<()> {
    match pem_kind(pem) {
        Some(kind) if kind == wanted => Ok(()),
        Some(kind) => Err(CryptoError::InvalidKeyFormat(format!(
            "wrong key type: expected a {wanted:?} key PEM block, got a {kind:?} key"
        ))),
        None => Err(CryptoError::InvalidKeyFormat(
            "not a key: expected a PEM block with a PUBLIC KEY or PRIVATE KEY label".into(),
        )),
    }
}

/// Parse a PKCS#8 or PKCS#1 private key.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    expect_kind(pem, PemKind::Private)?;
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("unreadable RSA private key: {e}")))
}

/// Parse an SPKI or PKCS#1 public key.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    expect_kind(pem, PemKind::Public)?;
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKeyFormat(format!("unreadable RSA public key: {e}")))
}
