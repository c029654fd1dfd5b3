//! # Locafoto Vault
//!
//! Key management and envelope encryption core of the Locafoto photo app.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     LOCAFOTO VAULT                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  SESSION    │  │  KEY        │  │  USAGE          │  │
//! │  │  PIN + bio  │  │  REGISTRY   │◄─┤  TRACKER        │  │
//! │  └──────┬──────┘  └──────┬──────┘  └─────────────────┘  │
//! │         │                │                              │
//! │  ┌──────┴────────────────┴────────────────────────────┐ │
//! │  │               LOCAFOTO_KEYVAULT                     │ │
//! │  │   PBKDF2 master key / AES-256-GCM / key wrapping    │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! │                                                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  ENVELOPE   │  │  PHOTO      │  │  SECURE FS      │  │
//! │  │  .lfs/.lfkey│  │  CRYPTO     │  │  record store   │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Master key derived from PIN + per-install salt, never stored
//! - Named keys persisted only wrapped under the master key
//! - Photos sealed with AES-256-GCM under a named key or a wrapped content key
//! - Thumbnails sealed separately under an HKDF subkey
//! - Key material zeroized on drop

mod b64;

pub mod biometrics;
pub mod envelope;
pub mod error;
pub mod photo_crypto;
pub mod registry;
pub mod secure_fs;
pub mod session;
pub mod usage;
pub mod vault;

pub use envelope::{decode_lfs, encode_lfs, LfsContainer, LfsOptions, SharedKey};
pub use error::{VaultError, VaultResult};
pub use photo_crypto::{EncryptedPayload, PayloadStore, PhotoMetadata};
pub use registry::{KeyLookup, KeyRegistry, NamedKey};
pub use secure_fs::{MemoryStore, RecordStore, SecureFs};
pub use session::Session;
pub use usage::{UsageRecord, UsageTracker};
pub use vault::{LocafotoVault, VaultConfig, VaultState};

/// Locafoto Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
