//! In-process file backend: whole file in memory, sealed with [`Encryption`].

use std::path::Path;

use common::Result;

use crate::encryption::Encryption;

use super::write_new;

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    encryption: Encryption,
}

impl MemoryBackend {
    pub fn new(encryption: Encryption) -> Self {
        Self { encryption }
    }

    pub fn encrypt(&self, input: &Path, output: &Path, key: &str) -> Result<()> {
        let plaintext = std::fs::read(input)?;
        let envelope = self.encryption.seal(&plaintext, key, b"")?;
        tracing::debug!(bytes = plaintext.len(), "sealed file in memory");
        write_new(output, &envelope)
    }

    pub fn decrypt(&self, input: &Path, output: &Path, key: &str) -> Result<()> {
        let envelope = std::fs::read(input)?;
        let plaintext = self.encryption.open(&envelope, key, b"")?;
        tracing::debug!(bytes = plaintext.len(), "opened file in memory");
        write_new(output, &plaintext)
    }
}
