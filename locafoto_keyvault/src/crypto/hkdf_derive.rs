//! HKDF subkeys of the master key

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use super::keys::{MasterKey, RawKey, KEY_LEN};
use crate::error::{KeyVaultError, Result};

/// Derive a 32-byte subkey of the master key for a fixed purpose
pub fn derive_subkey(master: &MasterKey, purpose: &str) -> Result<RawKey> {
    let hk = Hkdf::<Sha256>::new(None, master.expose());
    let mut okm = [0u8; KEY_LEN];
    hk.expand(purpose.as_bytes(), &mut okm)
        .map_err(|e| KeyVaultError::KeyDerivationFailed(e.to_string()))?;

    let key = RawKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

/// Derivation purposes
pub mod purposes {
    /// Dedicated thumbnail key, shared by every import path
    pub const THUMBNAILS: &str = "locafoto:thumbnails:v1";
}

/// The dedicated thumbnail key
pub fn derive_thumbnail_key(master: &MasterKey) -> Result<RawKey> {
    derive_subkey(master, purposes::THUMBNAILS)
}
