//! Common types, wire definitions, and errors shared across `cryptokit` crates.

pub mod error;
pub mod protocol;

pub use error::{CryptoError, ErrorKind, ErrorPolicy, Result};
