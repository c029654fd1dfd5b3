//! Locafoto Vault - Error Types

use locafoto_keyvault::KeyVaultError;
use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types. Each kind is stable so callers can map it to a message.
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // PIN / DERIVATION
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid PIN")]
    InvalidPin,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Too many failed attempts - try again later")]
    TooManyAttempts,

    #[error("Biometric unlock failed")]
    BiometricFailed,

    #[error("Biometric unlock unavailable: {0}")]
    BiometricUnavailable(String),

    #[error("PIN salt already exists")]
    SaltAlreadyExists,

    #[error("PIN salt not found - vault was never set up")]
    SaltMissing,

    // ═══════════════════════════════════════════════════════════════
    // KEY REGISTRY
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid key name: {0}")]
    InvalidKeyName(String),

    #[error("Key name already in use: {0}")]
    DuplicateKeyName(String),

    #[error("Invalid key data: expected {expected} bytes, got {actual}")]
    InvalidKeyData { expected: usize, actual: usize },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key is used by {0} imported file(s)")]
    KeyInUse(usize),

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO / FORMAT
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid encrypted key: {0}")]
    InvalidEncryptedKey(String),

    #[error("Data too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Secure random generator unavailable: {0}")]
    Rng(String),

    // ═══════════════════════════════════════════════════════════════
    // VAULT / STORAGE
    // ═══════════════════════════════════════════════════════════════

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Vault already exists at: {0}")]
    VaultAlreadyExists(String),

    #[error("Vault not found at: {0}")]
    VaultNotFound(String),

    #[error("Photo not found: {0}")]
    PhotoNotFound(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl VaultError {
    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailed
                | VaultError::InvalidEncryptedKey(_)
                | VaultError::TooManyAttempts
                | VaultError::SaltMissing
        )
    }

    /// Errors that come from parsing untrusted input
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            VaultError::TooShort { .. }
                | VaultError::InvalidFormat(_)
                | VaultError::InvalidKeyName(_)
                | VaultError::InvalidKeyData { .. }
        )
    }
}

impl From<KeyVaultError> for VaultError {
    fn from(e: KeyVaultError) -> Self {
        match e {
            KeyVaultError::InvalidPin => VaultError::InvalidPin,
            KeyVaultError::KeyDerivationFailed(msg) => VaultError::KeyDerivationFailed(msg),
            KeyVaultError::EncryptionFailed(msg) => VaultError::EncryptionFailed(msg),
            KeyVaultError::AuthenticationFailed => VaultError::AuthenticationFailed,
            KeyVaultError::InvalidEncryptedKey(msg) => VaultError::InvalidEncryptedKey(msg),
            KeyVaultError::InvalidKeyLength { expected, actual } => {
                VaultError::InvalidKeyData { expected, actual }
            }
            KeyVaultError::Rng(msg) => VaultError::Rng(msg),
            KeyVaultError::SaltAlreadyExists => VaultError::SaltAlreadyExists,
            KeyVaultError::SaltMissing => VaultError::SaltMissing,
            KeyVaultError::StorageFailure(msg) => VaultError::StorageFailure(msg),
        }
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::StorageFailure(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::InvalidFormat(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyvault_errors_keep_their_kind() {
        assert!(matches!(
            VaultError::from(KeyVaultError::AuthenticationFailed),
            VaultError::AuthenticationFailed
        ));
        assert!(matches!(
            VaultError::from(KeyVaultError::InvalidKeyLength { expected: 32, actual: 16 }),
            VaultError::InvalidKeyData { expected: 32, actual: 16 }
        ));
        assert!(matches!(
            VaultError::from(KeyVaultError::InvalidPin),
            VaultError::InvalidPin
        ));
    }

    #[test]
    fn test_key_in_use_message_carries_count() {
        assert_eq!(
            VaultError::KeyInUse(3).to_string(),
            "Key is used by 3 imported file(s)"
        );
    }
}
