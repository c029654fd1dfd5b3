//! Key material types
//!
//! Both key tiers hold exactly 256 bits behind `secrecy`, are zeroized on
//! drop and never print their bytes.

use secrecy::{ExposeSecret, SecretBox};

use crate::error::{KeyVaultError, Result};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// PIN salt length
pub const SALT_LEN: usize = 32;

/// Length of a wrapped key: nonce || ciphertext || tag
pub const WRAPPED_KEY_LEN: usize = NONCE_LEN + KEY_LEN + TAG_LEN;

/// Fill `buf` from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| KeyVaultError::Rng(e.to_string()))
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

/// Master key derived from PIN + salt. Lives only for an unlock session.
pub struct MasterKey {
    inner: SecretBox<[u8; KEY_LEN]>,
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: SecretBox::new(Box::new(bytes)),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self::from_bytes(*self.expose())
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Raw 256-bit content key: a named key after unwrapping, a per-photo
/// content key, or the derived thumbnail key.
pub struct RawKey {
    inner: SecretBox<[u8; KEY_LEN]>,
}

impl RawKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: SecretBox::new(Box::new(bytes)),
        }
    }

    /// Build from an untrusted slice; anything but 32 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyVaultError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self::from_bytes(arr))
    }

    /// Generate a random key
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        fill_random(&mut bytes)?;
        Ok(Self::from_bytes(bytes))
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }
}

impl Clone for RawKey {
    fn clone(&self) -> Self {
        Self::from_bytes(*self.expose())
    }
}

impl std::fmt::Debug for RawKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawKey([REDACTED])")
    }
}

/// Anything usable as an AES-256 key.
pub trait KeyBytes {
    fn key_bytes(&self) -> &[u8; KEY_LEN];
}

impl KeyBytes for MasterKey {
    fn key_bytes(&self) -> &[u8; KEY_LEN] {
        self.expose()
    }
}

impl KeyBytes for RawKey {
    fn key_bytes(&self) -> &[u8; KEY_LEN] {
        self.expose()
    }
}
