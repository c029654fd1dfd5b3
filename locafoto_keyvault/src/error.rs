//! Error types for the Locafoto key vault

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("Invalid PIN")]
    InvalidPin,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Tag mismatch on open. Never split into "wrong key" vs "bad data".
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid encrypted key: {0}")]
    InvalidEncryptedKey(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Secure random generator unavailable: {0}")]
    Rng(String),

    #[error("PIN salt already exists")]
    SaltAlreadyExists,

    #[error("PIN salt not found")]
    SaltMissing,

    #[error("Secret store failure: {0}")]
    StorageFailure(String),
}

pub type Result<T> = std::result::Result<T, KeyVaultError>;

impl KeyVaultError {
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::InvalidEncryptedKey(_) | Self::SaltMissing
        )
    }
}

impl From<std::io::Error> for KeyVaultError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageFailure(e.to_string())
    }
}
