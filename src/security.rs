//! Encryption of exchange credentials at rest.
//!
//! Values are stored as Fernet tokens (AES-128-CBC + HMAC-SHA256), so keys
//! produced by any Fernet implementation can decrypt an existing `api_keys.json`.

use std::fmt;

use fernet::Fernet;

use crate::error::CryptoError;

/// Symmetric cipher for API keys, secrets and passphrases.
pub struct CredentialCipher {
    fernet: Fernet,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Build a cipher from a url-safe base64 encoded 32-byte key.
    pub fn new(key: &str) -> Result<Self, CryptoError> {
        Fernet::new(key.trim())
            .map(|fernet| Self { fernet })
            .ok_or(CryptoError::InvalidKey)
    }

    /// Generate a fresh random key.
    pub fn generate_key() -> String {
        Fernet::generate_key()
    }

    /// Encrypt a plaintext value into a Fernet token.
    pub fn encrypt(&self, plaintext: &str) -> String {
        self.fernet.encrypt(plaintext.as_bytes())
    }

    /// Decrypt a Fernet token.
    pub fn decrypt(&self, token: &str) -> Result<String, CryptoError> {
        let bytes = self
            .fernet
            .decrypt(token)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Decrypt)
    }
}
