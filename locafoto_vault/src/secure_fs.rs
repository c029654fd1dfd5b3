//! Locafoto Vault - Record Storage
//!
//! Namespaced byte records with atomic replace. `SecureFs` keeps one file per
//! record under the vault root; `MemoryStore` backs tests and throwaway vaults.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// Record namespaces used by the vault
pub mod namespaces {
    pub const KEYS: &str = "keys";
    pub const USAGE: &str = "usage";
    pub const PAYLOADS: &str = "payloads";
}

const RECORD_EXT: &str = "rec";

/// Persistent record storage
pub trait RecordStore: Send + Sync {
    /// Insert or replace a record. Readers see the old or the new value, never a mix.
    fn put(&self, namespace: &str, id: &str, data: &[u8]) -> VaultResult<()>;

    fn get(&self, namespace: &str, id: &str) -> VaultResult<Option<Vec<u8>>>;

    /// Remove a record. Returns `false` if it did not exist.
    fn delete(&self, namespace: &str, id: &str) -> VaultResult<bool>;

    /// All record ids in a namespace, sorted.
    fn list(&self, namespace: &str) -> VaultResult<Vec<String>>;
}

fn check_component(kind: &str, value: &str) -> VaultResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VaultError::StorageFailure(format!(
            "invalid record {}: {:?}",
            kind, value
        )))
    }
}

/// Secure Filesystem Handler
pub struct SecureFs {
    /// Root directory
    root: PathBuf,
}

impl SecureFs {
    /// Create new SecureFs with root directory
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, namespace: &str, id: &str) -> VaultResult<PathBuf> {
        check_component("namespace", namespace)?;
        check_component("id", id)?;
        Ok(self
            .root
            .join(namespace)
            .join(format!("{}.{}", id, RECORD_EXT)))
    }

    /// Write through a uniquely named temp file, then rename over the target
    fn write_atomic(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| VaultError::StorageFailure("record path has no parent".into()))?;
        fs::create_dir_all(parent)?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4().simple()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp_path)?;
        let written = file.write_all(data).and_then(|_| file.sync_all());
        drop(file);

        if let Err(e) = written.and_then(|_| fs::rename(&temp_path, path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Overwrite with zeros before unlinking (best effort)
    fn scrub(path: &Path) {
        let Ok(metadata) = fs::metadata(path) else {
            return;
        };
        let size = metadata.len() as usize;
        if size == 0 {
            return;
        }
        if let Ok(mut file) = OpenOptions::new().write(true).open(path) {
            let zeros = vec![0u8; size.min(1024 * 1024)]; // Max 1MB chunks
            let mut remaining = size;
            while remaining > 0 {
                let to_write = remaining.min(zeros.len());
                if file.write_all(&zeros[..to_write]).is_err() {
                    break;
                }
                remaining -= to_write;
            }
            let _ = file.sync_all();
        }
    }
}

impl RecordStore for SecureFs {
    fn put(&self, namespace: &str, id: &str, data: &[u8]) -> VaultResult<()> {
        let path = self.record_path(namespace, id)?;
        self.write_atomic(&path, data)?;
        log::trace!("wrote record {}/{} ({} bytes)", namespace, id, data.len());
        Ok(())
    }

    fn get(&self, namespace: &str, id: &str) -> VaultResult<Option<Vec<u8>>> {
        let path = self.record_path(namespace, id)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, namespace: &str, id: &str) -> VaultResult<bool> {
        let path = self.record_path(namespace, id)?;
        if !path.exists() {
            return Ok(false);
        }
        Self::scrub(&path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, namespace: &str) -> VaultResult<Vec<String>> {
        check_component("namespace", namespace)?;
        let dir = self.root.join(namespace);
        let mut ids = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    ids.push(stem.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, namespace: &str, id: &str, data: &[u8]) -> VaultResult<()> {
        check_component("namespace", namespace)?;
        check_component("id", id)?;
        self.records
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(id.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, id: &str) -> VaultResult<Option<Vec<u8>>> {
        Ok(self
            .records
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(id))
            .cloned())
    }

    fn delete(&self, namespace: &str, id: &str) -> VaultResult<bool> {
        Ok(self
            .records
            .write()
            .get_mut(namespace)
            .map(|ns| ns.remove(id).is_some())
            .unwrap_or(false))
    }

    fn list(&self, namespace: &str) -> VaultResult<Vec<String>> {
        Ok(self
            .records
            .read()
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}
