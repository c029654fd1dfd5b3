//! Locafoto Vault - Named Key Registry
//!
//! Named keys are persisted only in wrapped form (`nonce || ct || tag`, under
//! the master key), one JSON record per key id. Creation and import hold the
//! lock for the key's name so the duplicate check and the write are one step;
//! unwrap-with-usage-bump holds the lock for the key's id. Deletion holds both,
//! name first, and so does [`KeyRegistry::with_key_for_import`] while the
//! caller records what it stored under the key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use locafoto_keyvault::crypto::{unwrap_key, wrap_key, KEY_LEN, WRAPPED_KEY_LEN};
use locafoto_keyvault::{KeyVaultError, MasterKey, RawKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::envelope::{self, HEADER_LEN};
use crate::error::{VaultError, VaultResult};
use crate::secure_fs::{namespaces, RecordStore};
use crate::usage::UsageTracker;

/// Persisted named key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedKey {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::b64::bytes")]
    pub wrapped_key: Vec<u8>,
}

/// How to find a key
#[derive(Debug, Clone, Copy)]
pub enum KeyLookup<'a> {
    Name(&'a str),
    Id(Uuid),
}

impl std::fmt::Display for KeyLookup<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyLookup::Name(name) => write!(f, "'{}'", name),
            KeyLookup::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Validate a user-supplied key name
pub fn validate_key_name(name: &str) -> VaultResult<()> {
    if name.is_empty() {
        return Err(VaultError::InvalidKeyName("empty".into()));
    }
    if name.len() > HEADER_LEN {
        return Err(VaultError::InvalidKeyName(format!(
            "{} bytes (max {})",
            name.len(),
            HEADER_LEN
        )));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(VaultError::InvalidKeyName(format!(
            "{:?} contains a path separator or '..'",
            name
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(VaultError::InvalidKeyName(
            "contains control characters".into(),
        ));
    }
    if name.trim() != name {
        return Err(VaultError::InvalidKeyName(
            "leading or trailing whitespace".into(),
        ));
    }
    Ok(())
}

/// Lazily created lock per string key. An entry is dropped again once no
/// caller holds or waits on it.
#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.locks.lock().entry(key.to_string()).or_default());
        let out = {
            let _guard = lock.lock();
            f()
        };
        self.release(key, lock);
        out
    }

    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        // clones are only handed out under `locks`, so a count of 1 is final
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct KeyRegistry {
    store: Arc<dyn RecordStore>,
    usage: Arc<UsageTracker>,
    name_locks: LockTable,
    id_locks: LockTable,
}

impl KeyRegistry {
    pub fn new(store: Arc<dyn RecordStore>, usage: Arc<UsageTracker>) -> Self {
        Self {
            store,
            usage,
            name_locks: LockTable::default(),
            id_locks: LockTable::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════

    fn load(&self, id: &str) -> VaultResult<Option<NamedKey>> {
        let Some(bytes) = self.store.get(namespaces::KEYS, id)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| VaultError::InvalidEncryptedKey(format!("key record {}: {}", id, e)))
    }

    fn save(&self, key: &NamedKey) -> VaultResult<()> {
        self.store.put(
            namespaces::KEYS,
            &key.id.to_string(),
            &serde_json::to_vec(key)?,
        )
    }

    /// Every readable record. Unparseable records are skipped; they only fail
    /// when asked for by id.
    fn all(&self) -> VaultResult<Vec<NamedKey>> {
        let mut keys = Vec::new();
        for id in self.store.list(namespaces::KEYS)? {
            match self.load(&id) {
                Ok(Some(key)) => keys.push(key),
                Ok(None) => {}
                Err(VaultError::InvalidEncryptedKey(reason)) => {
                    log::warn!("skipping unreadable {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(keys)
    }

    // ═══════════════════════════════════════════════════════════════
    // CREATE / IMPORT
    // ═══════════════════════════════════════════════════════════════

    /// Generate a fresh random key under `name`
    pub fn create_key(&self, name: &str, master: &MasterKey) -> VaultResult<NamedKey> {
        validate_key_name(name)?;
        let raw = RawKey::generate()?;
        self.insert(name, &raw, master)
    }

    /// Import raw key bytes under `name`
    pub fn import_key(&self, name: &str, raw: &[u8], master: &MasterKey) -> VaultResult<NamedKey> {
        validate_key_name(name)?;
        if raw.len() != KEY_LEN {
            return Err(VaultError::InvalidKeyData {
                expected: KEY_LEN,
                actual: raw.len(),
            });
        }
        let raw = RawKey::from_slice(raw)?;
        self.insert(name, &raw, master)
    }

    /// Import the hex text form (64 hex characters, surrounding whitespace ignored)
    pub fn import_key_hex(&self, name: &str, hex_key: &str, master: &MasterKey) -> VaultResult<NamedKey> {
        let raw = Zeroizing::new(
            hex::decode(hex_key.trim())
                .map_err(|e| VaultError::InvalidFormat(format!("key is not hex: {}", e)))?,
        );
        self.import_key(name, &raw, master)
    }

    /// Import a `.lfkey` shared key file
    pub fn import_shared_key(&self, data: &[u8], master: &MasterKey) -> VaultResult<NamedKey> {
        let shared = envelope::decode_shared_key(data)?;
        validate_key_name(&shared.name)?;
        self.insert(&shared.name, &shared.key, master)
    }

    /// Export a key as a `.lfkey` document. Counts as a use of the key.
    pub fn export_shared_key(&self, name: &str, master: &MasterKey) -> VaultResult<Zeroizing<Vec<u8>>> {
        let raw = self.get_key(KeyLookup::Name(name), master)?;
        envelope::encode_shared_key(name, &raw)
    }

    fn insert(&self, name: &str, raw: &RawKey, master: &MasterKey) -> VaultResult<NamedKey> {
        self.name_locks.with_lock(name, || -> VaultResult<NamedKey> {
            if self.find_key(name)?.is_some() {
                return Err(VaultError::DuplicateKeyName(name.to_string()));
            }

            let key = NamedKey {
                id: Uuid::new_v4(),
                name: name.to_string(),
                created_at: Utc::now(),
                usage_count: 0,
                last_used_at: None,
                wrapped_key: wrap_key(raw, master)?,
            };
            self.save(&key)?;

            log::info!("stored key '{}' ({})", key.name, key.id);
            Ok(key)
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // LOOKUP
    // ═══════════════════════════════════════════════════════════════

    /// Unwrap a key. Bumps its usage counter on success.
    ///
    /// A missing key and a master key that fails to authenticate both report
    /// `KeyNotFound`.
    pub fn get_key(&self, lookup: KeyLookup<'_>, master: &MasterKey) -> VaultResult<RawKey> {
        let not_found = || VaultError::KeyNotFound(lookup.to_string());

        let id = match lookup {
            KeyLookup::Id(id) => id,
            KeyLookup::Name(name) => self.find_key(name)?.ok_or_else(not_found)?.id,
        };

        let id_str = id.to_string();
        self.id_locks.with_lock(&id_str, || -> VaultResult<RawKey> {
            let mut key = self.load(&id_str)?.ok_or_else(not_found)?;
            let raw = match unwrap_key(&key.wrapped_key, master) {
                Ok(raw) => raw,
                Err(KeyVaultError::AuthenticationFailed) => {
                    log::warn!("key {} did not authenticate under the current master key", id);
                    return Err(not_found());
                }
                Err(e) => return Err(e.into()),
            };

            key.usage_count += 1;
            key.last_used_at = Some(Utc::now());
            self.save(&key)?;

            log::debug!("unwrapped key '{}' (uses: {})", key.name, key.usage_count);
            Ok(raw)
        })
    }

    /// Unwrap `name` and run `f` with it while the name's lock is held.
    /// `delete_key` waits on the same lock, so usages recorded by `f` are
    /// visible to its in-use check.
    pub fn with_key_for_import<T>(
        &self,
        name: &str,
        master: &MasterKey,
        f: impl FnOnce(&RawKey) -> VaultResult<T>,
    ) -> VaultResult<T> {
        self.name_locks.with_lock(name, || -> VaultResult<T> {
            let raw = self.get_key(KeyLookup::Name(name), master)?;
            f(&raw)
        })
    }

    /// Metadata by name; no key material, no usage bump
    pub fn find_key(&self, name: &str) -> VaultResult<Option<NamedKey>> {
        Ok(self.all()?.into_iter().find(|k| k.name == name))
    }

    /// Metadata by id; no key material, no usage bump
    pub fn key_info(&self, id: Uuid) -> VaultResult<Option<NamedKey>> {
        self.load(&id.to_string())
    }

    /// Newest first
    pub fn list_keys(&self) -> VaultResult<Vec<NamedKey>> {
        let mut keys = self.all()?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    /// Any one well-formed wrapped key, for PIN verification
    pub fn sample_wrapped_key(&self) -> VaultResult<Option<Vec<u8>>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|k| k.wrapped_key.len() == WRAPPED_KEY_LEN)
            .map(|k| k.wrapped_key))
    }

    // ═══════════════════════════════════════════════════════════════
    // DELETE
    // ═══════════════════════════════════════════════════════════════

    /// Delete a key. Refused while imported files still reference its name.
    pub fn delete_key(&self, id: Uuid) -> VaultResult<()> {
        let id_str = id.to_string();
        let not_found = || VaultError::KeyNotFound(id_str.clone());

        let name = self.load(&id_str)?.ok_or_else(not_found)?.name;

        self.name_locks.with_lock(&name, || -> VaultResult<()> {
            self.id_locks.with_lock(&id_str, || -> VaultResult<()> {
                let in_use = self.usage.usage_count(&name)?;
                if in_use > 0 {
                    return Err(VaultError::KeyInUse(in_use));
                }

                if !self.store.delete(namespaces::KEYS, &id_str)? {
                    return Err(not_found());
                }
                Ok(())
            })
        })?;

        log::info!("deleted key '{}' ({})", name, id);
        Ok(())
    }
}
