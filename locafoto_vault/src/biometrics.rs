//! Locafoto Vault - PIN attempts and biometric unlock
//!
//! The prompt itself belongs to the platform. After a successful prompt the
//! platform releases the gated secret (the master key bytes) and the vault
//! consumes it; nothing here derives keys.

use chrono::{DateTime, TimeDelta, Utc};
use locafoto_keyvault::crypto::KEY_LEN;
use locafoto_keyvault::secret_store::accounts;
use locafoto_keyvault::{MasterKey, SecretStore};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Lockout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Lock after this many consecutive failures
    pub max_attempts: u8,
    /// Cooldown period after lockout (seconds)
    pub lockout_seconds: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_seconds: 300, // 5 minutes
        }
    }
}

/// Caller-side failed-PIN counter
#[derive(Debug, Clone)]
pub struct PinAttempts {
    config: LockoutConfig,
    failed_attempts: u8,
    locked_until: Option<DateTime<Utc>>,
}

impl PinAttempts {
    pub fn new(config: LockoutConfig) -> Self {
        Self {
            config,
            failed_attempts: 0,
            locked_until: None,
        }
    }

    /// Check if locked out
    pub fn is_locked(&self) -> bool {
        self.locked_until.is_some_and(|until| Utc::now() < until)
    }

    /// `TooManyAttempts` while the cooldown runs
    pub fn check(&self) -> VaultResult<()> {
        if self.is_locked() {
            return Err(VaultError::TooManyAttempts);
        }
        Ok(())
    }

    /// Count a failure and return the error to report for it
    pub fn record_failure(&mut self) -> VaultError {
        self.failed_attempts = self.failed_attempts.saturating_add(1);

        if self.failed_attempts >= self.config.max_attempts {
            let now = Utc::now();
            let until = i64::try_from(self.config.lockout_seconds)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|cooldown| now.checked_add_signed(cooldown))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.locked_until = Some(until);
            self.failed_attempts = 0;
            log::warn!("PIN locked for {}s after repeated failures", self.config.lockout_seconds);
            VaultError::TooManyAttempts
        } else {
            VaultError::InvalidPin
        }
    }

    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
    }

    /// Get remaining attempts
    pub fn remaining_attempts(&self) -> u8 {
        self.config.max_attempts.saturating_sub(self.failed_attempts)
    }

    /// Get lockout remaining time (seconds)
    pub fn lockout_remaining(&self) -> Option<i64> {
        self.locked_until
            .map(|until| (until - Utc::now()).num_seconds().max(0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Biometric-gated secret
// ═══════════════════════════════════════════════════════════════════════════

/// Store the master key behind the platform's biometric gate. Refused on
/// stores that do not gate reads.
pub fn store_biometric_secret(store: &dyn SecretStore, master: &MasterKey) -> VaultResult<()> {
    if !store.is_access_controlled() {
        return Err(VaultError::BiometricUnavailable(
            "secret store is not access controlled".into(),
        ));
    }
    store.upsert(accounts::BIOMETRIC_SECRET, master.expose())?;
    log::info!("biometric unlock enabled");
    Ok(())
}

/// The secret released after a successful prompt, if one was stored
pub fn load_biometric_secret(store: &dyn SecretStore) -> VaultResult<Option<MasterKey>> {
    let Some(bytes) = store.get(accounts::BIOMETRIC_SECRET)? else {
        return Ok(None);
    };
    let key: [u8; KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::BiometricFailed)?;
    Ok(Some(MasterKey::from_bytes(key)))
}

pub fn clear_biometric_secret(store: &dyn SecretStore) -> VaultResult<()> {
    store.delete(accounts::BIOMETRIC_SECRET)?;
    log::info!("biometric unlock disabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use locafoto_keyvault::MemorySecretStore;

    #[test]
    fn test_failures_then_success() {
        let mut attempts = PinAttempts::new(LockoutConfig::default());
        assert!(attempts.check().is_ok());

        assert!(matches!(attempts.record_failure(), VaultError::InvalidPin));
        assert_eq!(attempts.remaining_attempts(), 4);

        attempts.record_success();
        assert_eq!(attempts.remaining_attempts(), 5);
    }

    #[test]
    fn test_lockout() {
        let mut attempts = PinAttempts::new(LockoutConfig {
            max_attempts: 3,
            ..Default::default()
        });

        assert!(matches!(attempts.record_failure(), VaultError::InvalidPin));
        assert!(matches!(attempts.record_failure(), VaultError::InvalidPin));
        assert!(matches!(attempts.record_failure(), VaultError::TooManyAttempts));

        assert!(attempts.is_locked());
        assert!(matches!(attempts.check(), Err(VaultError::TooManyAttempts)));
        assert!(attempts.lockout_remaining().unwrap() > 0);
    }

    #[test]
    fn test_zero_cooldown_unlocks_immediately() {
        let mut attempts = PinAttempts::new(LockoutConfig {
            max_attempts: 1,
            lockout_seconds: 0,
        });
        assert!(matches!(attempts.record_failure(), VaultError::TooManyAttempts));
        assert!(attempts.check().is_ok());
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let mut attempts = PinAttempts::new(LockoutConfig {
            max_attempts: 1,
            lockout_seconds: u64::MAX,
        });
        assert!(matches!(attempts.record_failure(), VaultError::TooManyAttempts));
        assert!(attempts.is_locked());
        assert!(attempts.lockout_remaining().unwrap() > 0);

        let mut attempts = PinAttempts::new(LockoutConfig {
            max_attempts: 1,
            lockout_seconds: i64::MAX as u64 / 1000 + 1,
        });
        assert!(matches!(attempts.record_failure(), VaultError::TooManyAttempts));
        assert!(attempts.is_locked());
    }

    #[test]
    fn test_biometric_secret_needs_gated_store() {
        let store = MemorySecretStore::new();
        let master = MasterKey::from_bytes([8u8; 32]);
        assert!(matches!(
            store_biometric_secret(&store, &master),
            Err(VaultError::BiometricUnavailable(_))
        ));
        assert!(store.get(accounts::BIOMETRIC_SECRET).unwrap().is_none());
    }

    #[test]
    fn test_biometric_secret_passthrough() {
        let store = MemorySecretStore::access_controlled();
        assert!(load_biometric_secret(&store).unwrap().is_none());

        let master = MasterKey::from_bytes([8u8; 32]);
        store_biometric_secret(&store, &master).unwrap();
        assert_eq!(
            load_biometric_secret(&store).unwrap().unwrap().expose(),
            master.expose()
        );

        clear_biometric_secret(&store).unwrap();
        assert!(load_biometric_secret(&store).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_biometric_secret() {
        let store = MemorySecretStore::new();
        store.upsert(accounts::BIOMETRIC_SECRET, b"short").unwrap();
        assert!(matches!(
            load_biometric_secret(&store),
            Err(VaultError::BiometricFailed)
        ));
    }
}
