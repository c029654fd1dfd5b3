//! Locafoto Vault - PIN session
//!
//! A session owns the master key for as long as the vault is unlocked. The
//! key is re-derived from PIN + salt on every unlock and never persisted.

use locafoto_keyvault::crypto::{derive_master_key, derive_master_key_async, unwrap_key, verify_pin};
use locafoto_keyvault::secret_store::{create_pin_salt, load_pin_salt};
use locafoto_keyvault::{KdfParams, KeyVaultError, MasterKey, SecretStore};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};
use crate::registry::KeyRegistry;

pub struct Session {
    master: MasterKey,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// First-time PIN setup. Fails if the installation already has a salt.
    pub fn setup(store: &dyn SecretStore, pin: &str, params: KdfParams) -> VaultResult<Self> {
        if pin.is_empty() {
            return Err(VaultError::InvalidPin);
        }
        params.validate()?;

        let salt = create_pin_salt(store)?;
        let master = derive_master_key(pin.as_bytes(), &salt, params)?;
        log::info!("PIN set up");
        Ok(Self { master })
    }

    /// Derive from the stored salt and check the PIN against a wrapped key.
    pub fn unlock(
        store: &dyn SecretStore,
        registry: &KeyRegistry,
        pin: &str,
        params: KdfParams,
    ) -> VaultResult<Self> {
        let salt = load_pin_salt(store)?.ok_or(VaultError::SaltMissing)?;
        let master = derive_master_key(pin.as_bytes(), &salt, params)?;
        Self::accept(registry, master, VaultError::InvalidPin)
    }

    /// [`Session::unlock`] with derivation on the blocking pool.
    pub async fn unlock_async(
        store: &dyn SecretStore,
        registry: &KeyRegistry,
        pin: Zeroizing<String>,
        params: KdfParams,
    ) -> VaultResult<Self> {
        let salt = load_pin_salt(store)?.ok_or(VaultError::SaltMissing)?;
        let master = derive_master_key_async(pin.as_bytes().to_vec(), salt, params).await?;
        Self::accept(registry, master, VaultError::InvalidPin)
    }

    /// Adopt a master key released by a biometric prompt
    pub fn from_released_key(registry: &KeyRegistry, master: MasterKey) -> VaultResult<Self> {
        Self::accept(registry, master, VaultError::BiometricFailed)
    }

    /// Check a PIN without keeping the derived key
    pub fn verify_pin(
        store: &dyn SecretStore,
        registry: &KeyRegistry,
        pin: &str,
        params: KdfParams,
    ) -> VaultResult<bool> {
        let salt = load_pin_salt(store)?.ok_or(VaultError::SaltMissing)?;
        let sample = registry.sample_wrapped_key()?;
        Ok(verify_pin(pin.as_bytes(), &salt, params, sample.as_deref())?)
    }

    fn accept(registry: &KeyRegistry, master: MasterKey, rejection: VaultError) -> VaultResult<Self> {
        if let Some(sample) = registry.sample_wrapped_key()? {
            match unwrap_key(&sample, &master) {
                Ok(_) => {}
                Err(KeyVaultError::AuthenticationFailed) => return Err(rejection),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Self { master })
    }

    pub fn master(&self) -> &MasterKey {
        &self.master
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_fs::{MemoryStore, RecordStore};
    use crate::usage::UsageTracker;
    use locafoto_keyvault::crypto::MIN_ITERATIONS;
    use locafoto_keyvault::MemorySecretStore;
    use std::sync::Arc;

    fn fast() -> KdfParams {
        KdfParams::new(MIN_ITERATIONS).unwrap()
    }

    fn registry() -> KeyRegistry {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let usage = Arc::new(UsageTracker::new(Arc::clone(&store)));
        KeyRegistry::new(store, usage)
    }

    #[test]
    fn test_setup_then_unlock() {
        let secrets = MemorySecretStore::new();
        let registry = registry();

        let session = Session::setup(&secrets, "2580", fast()).unwrap();
        registry.create_key("vault", session.master()).unwrap();

        let again = Session::unlock(&secrets, &registry, "2580", fast()).unwrap();
        assert_eq!(again.master().expose(), session.master().expose());
    }

    #[test]
    fn test_wrong_pin() {
        let secrets = MemorySecretStore::new();
        let registry = registry();
        let session = Session::setup(&secrets, "2580", fast()).unwrap();
        registry.create_key("vault", session.master()).unwrap();

        assert!(matches!(
            Session::unlock(&secrets, &registry, "0000", fast()),
            Err(VaultError::InvalidPin)
        ));
        assert!(!Session::verify_pin(&secrets, &registry, "0000", fast()).unwrap());
        assert!(Session::verify_pin(&secrets, &registry, "2580", fast()).unwrap());
    }

    #[test]
    fn test_setup_twice_refused() {
        let secrets = MemorySecretStore::new();
        Session::setup(&secrets, "1111", fast()).unwrap();
        assert!(matches!(
            Session::setup(&secrets, "2222", fast()),
            Err(VaultError::SaltAlreadyExists)
        ));
    }

    #[test]
    fn test_unlock_without_setup() {
        assert!(matches!(
            Session::unlock(&MemorySecretStore::new(), &registry(), "1234", fast()),
            Err(VaultError::SaltMissing)
        ));
    }

    #[test]
    fn test_empty_pin() {
        let secrets = MemorySecretStore::new();
        assert!(matches!(
            Session::setup(&secrets, "", fast()),
            Err(VaultError::InvalidPin)
        ));
        Session::setup(&secrets, "1234", fast()).unwrap();
        assert!(matches!(
            Session::unlock(&secrets, &registry(), "", fast()),
            Err(VaultError::InvalidPin)
        ));
    }

    #[test]
    fn test_released_key_checked() {
        let secrets = MemorySecretStore::new();
        let registry = registry();
        let session = Session::setup(&secrets, "2580", fast()).unwrap();
        registry.create_key("vault", session.master()).unwrap();

        assert!(Session::from_released_key(&registry, session.master().clone()).is_ok());
        assert!(matches!(
            Session::from_released_key(&registry, MasterKey::from_bytes([0u8; 32])),
            Err(VaultError::BiometricFailed)
        ));
    }

    #[tokio::test]
    async fn test_unlock_async() {
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        let registry = registry();
        let session = Session::setup(secrets.as_ref(), "2580", fast()).unwrap();
        registry.create_key("vault", session.master()).unwrap();

        let unlocked = Session::unlock_async(
            secrets.as_ref(),
            &registry,
            Zeroizing::new("2580".to_string()),
            fast(),
        )
        .await
        .unwrap();
        assert_eq!(unlocked.master().expose(), session.master().expose());
    }
}
