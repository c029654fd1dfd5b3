//! Secret store: the access-controlled vault holding the PIN salt and the
//! optional biometric-gated blob.
//!
//! The store is injected, never reached through a global. Writers are
//! serialized by one lock per store and every write is a single upsert, so a
//! reader can never observe an account in a "deleted, not yet re-added"
//! state.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{generate_salt, SALT_LEN};
use crate::error::{KeyVaultError, Result};

/// Well-known account names
pub mod accounts {
    /// The 32-byte PIN salt
    pub const PIN_SALT: &str = "pin-salt";
    /// Secret released by the platform after a biometric prompt
    pub const BIOMETRIC_SECRET: &str = "biometric-secret";
}

/// Trait for secret storage - abstracts over the platform credential vault.
pub trait SecretStore: Send + Sync {
    /// Read an account's value.
    fn get(&self, account: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Insert or replace in one step.
    fn upsert(&self, account: &str, value: &[u8]) -> Result<()>;

    /// Insert only when the account is absent. Returns `false` if it existed.
    fn insert_if_absent(&self, account: &str, value: &[u8]) -> Result<bool>;

    /// Delete an account. Missing accounts are not an error.
    fn delete(&self, account: &str) -> Result<()>;

    /// True when reads are gated by the platform (user presence, hardware
    /// keystore). Only such a store may hold [`accounts::BIOMETRIC_SECRET`].
    fn is_access_controlled(&self) -> bool {
        false
    }
}

/// Create the installation's PIN salt. Refuses to replace an existing one:
/// losing the salt makes every wrapped key unrecoverable.
pub fn create_pin_salt(store: &dyn SecretStore) -> Result<[u8; SALT_LEN]> {
    let salt = generate_salt()?;
    if !store.insert_if_absent(accounts::PIN_SALT, &salt)? {
        return Err(KeyVaultError::SaltAlreadyExists);
    }
    tracing::info!("created PIN salt");
    Ok(salt)
}

/// Load the PIN salt, if setup has happened.
pub fn load_pin_salt(store: &dyn SecretStore) -> Result<Option<[u8; SALT_LEN]>> {
    match store.get(accounts::PIN_SALT)? {
        None => Ok(None),
        Some(bytes) => {
            let salt: [u8; SALT_LEN] = bytes.as_slice().try_into().map_err(|_| {
                KeyVaultError::StorageFailure(format!(
                    "stored salt has {} bytes, expected {}",
                    bytes.len(),
                    SALT_LEN
                ))
            })?;
            Ok(Some(salt))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// In-memory store (tests, ephemeral sessions)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
    access_controlled: bool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for a platform keystore that gates reads behind a prompt
    pub fn access_controlled() -> Self {
        Self {
            access_controlled: true,
            ..Self::default()
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, account: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.entries.lock().get(account).cloned())
    }

    fn upsert(&self, account: &str, value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .insert(account.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn insert_if_absent(&self, account: &str, value: &[u8]) -> Result<bool> {
        let mut entries = self.entries.lock();
        if entries.contains_key(account) {
            return Ok(false);
        }
        entries.insert(account.to_string(), Zeroizing::new(value.to_vec()));
        Ok(true)
    }

    fn delete(&self, account: &str) -> Result<()> {
        self.entries.lock().remove(account);
        Ok(())
    }

    fn is_access_controlled(&self) -> bool {
        self.access_controlled
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// File-backed store (one file per account, owner-only permissions)
//
// Anyone who can read the directory can read the files, so the biometric
// secret (the master key itself) is never accepted here.
// ═══════════════════════════════════════════════════════════════════════════

pub struct FileSecretStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn account_path(&self, account: &str) -> Result<PathBuf> {
        let valid = !account.is_empty()
            && account
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(KeyVaultError::StorageFailure(format!(
                "invalid account name: {:?}",
                account
            )));
        }
        Ok(self.root.join(format!("{}.secret", account)))
    }

    fn writable_path(&self, account: &str) -> Result<PathBuf> {
        if account == accounts::BIOMETRIC_SECRET {
            return Err(KeyVaultError::StorageFailure(
                "file secret store cannot hold the biometric secret".into(),
            ));
        }
        self.account_path(account)
    }

    /// Write to a uniquely named temp file, fsync, then rename over the target.
    fn write_atomic(&self, path: &Path, value: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)?;

        let tmp_name = format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("secret"),
            Uuid::new_v4().simple()
        );
        let tmp_path = self.root.join(tmp_name);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path)?;
        let written = file.write_all(value).and_then(|_| file.sync_all());
        drop(file);

        if let Err(e) = written.and_then(|_| fs::rename(&tmp_path, path)) {
            // best-effort: the target still holds its previous value
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, account: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let path = self.account_path(account)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn upsert(&self, account: &str, value: &[u8]) -> Result<()> {
        let path = self.writable_path(account)?;
        let _guard = self.write_lock.lock();
        self.write_atomic(&path, value)?;
        tracing::debug!(account, "stored secret");
        Ok(())
    }

    fn insert_if_absent(&self, account: &str, value: &[u8]) -> Result<bool> {
        let path = self.writable_path(account)?;
        let _guard = self.write_lock.lock();
        if path.exists() {
            return Ok(false);
        }
        self.write_atomic(&path, value)?;
        tracing::debug!(account, "stored new secret");
        Ok(true)
    }

    fn delete(&self, account: &str) -> Result<()> {
        let path = self.account_path(account)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(account, "deleted secret");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
