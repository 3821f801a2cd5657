//! `cryptokit`: typed-value encryption, signed data, JWT, RSA key pairs and
//! whole-file encryption.
//!
//! Components:
//! - [`Encryption`]: AES (CBC/CTR with HMAC, or GCM/CCM) over typed values.
//! - [`SignedData`]: HMAC-signed, optionally expiring tokens.
//! - [`Jwt`]: HS*/RS* JSON Web Tokens with claim validation.
//! - [`public_key`]: RSA key-pair generation and PEM parsing.
//! - [`FileEncryption`]: files sealed in memory or through `openssl`/`xxd`/`truncate`.
//! - [`Crypto`]: the above behind one settings-driven facade.
//!
//! Every component takes an immutable config built once and validated by its
//! builder. Errors are [`CryptoError`]; decrypt/verify/decode helpers follow
//! the component's [`ErrorPolicy`] and return `Ok(None)` for bad input unless
//! `exception_on_error` is set.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod encryption;
pub mod facade;
pub mod file;
pub mod jwt;
pub mod keys;
pub mod public_key;
pub mod random;
pub mod signed;
pub mod time;

pub use codec::{TypeTag, TypedValueCodec, Value};
pub use common::{CryptoError, ErrorKind, ErrorPolicy, Result};
pub use config::Settings;
pub use crypto::{CipherAlgorithm, HashAlgorithm};
pub use encoding::OutputEncoding;
pub use encryption::{DataFormat, Encryption, EncryptionConfig};
pub use facade::Crypto;
pub use file::{FileEncryption, FileEncryptionConfig};
pub use jwt::{Claims, Jwt, JwtAlgorithm, JwtConfig};
pub use keys::{KeyType, Pbkdf2Params};
pub use public_key::RsaKeyPair;
pub use signed::{SignedData, SignedDataConfig};
pub use time::ExpireTime;
