//! PBKDF2-HMAC-SHA256 master key derivation from the user PIN

use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use super::aead::unwrap_key;
use super::keys::{fill_random, MasterKey, KEY_LEN, SALT_LEN};
use crate::error::{KeyVaultError, Result};

/// Iterations used for every production derivation.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Lowest iteration count accepted at all.
pub const MIN_ITERATIONS: u32 = 1_000;

/// PBKDF2 configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(KeyVaultError::KeyDerivationFailed(format!(
                "PBKDF2 iterations must be >= {}",
                MIN_ITERATIONS
            )));
        }
        Ok(())
    }
}

/// Generate a fresh PIN salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Derive the master key. Same (pin, salt, params) always gives the same key.
pub fn derive_master_key(pin: &[u8], salt: &[u8], params: KdfParams) -> Result<MasterKey> {
    if pin.is_empty() {
        return Err(KeyVaultError::InvalidPin);
    }
    if salt.len() != SALT_LEN {
        return Err(KeyVaultError::KeyDerivationFailed(format!(
            "salt must be {} bytes, got {}",
            SALT_LEN,
            salt.len()
        )));
    }
    params.validate()?;

    let mut output = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(pin, salt, params.iterations, &mut output)
        .map_err(|e| KeyVaultError::KeyDerivationFailed(e.to_string()))?;

    let key = MasterKey::from_bytes(output);
    output.zeroize();

    tracing::debug!(iterations = params.iterations, "derived master key");
    Ok(key)
}

/// Derive on the blocking pool.
///
/// Dropping the returned future abandons the result; derivation persists
/// nothing, so a cancelled unlock leaves no partial state behind.
pub async fn derive_master_key_async(
    pin: Vec<u8>,
    salt: [u8; SALT_LEN],
    params: KdfParams,
) -> Result<MasterKey> {
    let pin = Zeroizing::new(pin);
    let handle = tokio::task::spawn_blocking(move || derive_master_key(&pin, &salt, params));

    handle
        .await
        .map_err(|e| KeyVaultError::KeyDerivationFailed(e.to_string()))?
}

/// Check a PIN by unwrapping one existing wrapped key.
///
/// With no keys yet (`sample_wrapped_key == None`) any non-empty PIN passes.
pub fn verify_pin(
    pin: &[u8],
    salt: &[u8],
    params: KdfParams,
    sample_wrapped_key: Option<&[u8]>,
) -> Result<bool> {
    let master = derive_master_key(pin, salt, params)?;

    let Some(wrapped) = sample_wrapped_key else {
        return Ok(true);
    };

    match unwrap_key(wrapped, &master) {
        Ok(_) => Ok(true),
        Err(KeyVaultError::AuthenticationFailed) => Ok(false),
        Err(e) => Err(e),
    }
}
