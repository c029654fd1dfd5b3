//! # Locafoto Key Vault
//!
//! Bottom tier of the Locafoto key hierarchy:
//! - PBKDF2-HMAC-SHA256 master key from PIN + 32-byte salt
//! - AES-256-GCM seal/open with detached 16-byte tags
//! - key wrapping (`nonce || ciphertext || tag`)
//! - HKDF subkeys (dedicated thumbnail key)
//! - injected secret store for the PIN salt

pub mod crypto;
pub mod error;
pub mod secret_store;

// Re-exports
pub use crypto::{KdfParams, MasterKey, RawKey, SealedBox};
pub use error::{KeyVaultError, Result};
pub use secret_store::{FileSecretStore, MemorySecretStore, SecretStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
