//! Cryptographic core - PBKDF2 master keys, AES-256-GCM, HKDF subkeys

pub mod aead;
pub mod hkdf_derive;
pub mod kdf;
pub mod keys;

pub use aead::{open, open_box, seal, seal_with_nonce, unwrap_key, wrap_key, SealedBox};
pub use hkdf_derive::{derive_subkey, derive_thumbnail_key};
pub use kdf::{
    derive_master_key, derive_master_key_async, generate_salt, verify_pin, KdfParams,
    DEFAULT_ITERATIONS, MIN_ITERATIONS,
};
pub use keys::{
    fill_random, generate_nonce, KeyBytes, MasterKey, RawKey, KEY_LEN, NONCE_LEN, SALT_LEN,
    TAG_LEN, WRAPPED_KEY_LEN,
};
