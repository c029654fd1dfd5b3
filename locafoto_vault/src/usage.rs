//! Locafoto Vault - Key Usage Ledger
//!
//! Binds each imported payload to the name of the key that opens it. The
//! registry consults it before deleting a key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::secure_fs::{namespaces, RecordStore};

/// One payload -> key name binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub payload_id: Uuid,
    pub key_name: String,
    pub original_filename: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub file_size: u64,
}

pub struct UsageTracker {
    store: Arc<dyn RecordStore>,
    write_lock: Mutex<()>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Record that `payload_id` was imported under `key_name`
    pub fn record_import(
        &self,
        payload_id: Uuid,
        key_name: &str,
        original_filename: Option<&str>,
        file_size: u64,
    ) -> VaultResult<UsageRecord> {
        if key_name.is_empty() {
            return Err(VaultError::InvalidKeyName("empty".into()));
        }

        let record = UsageRecord {
            id: Uuid::new_v4(),
            payload_id,
            key_name: key_name.to_string(),
            original_filename: original_filename.map(str::to_string),
            imported_at: Utc::now(),
            file_size,
        };

        let _guard = self.write_lock.lock();
        self.store.put(
            namespaces::USAGE,
            &record.id.to_string(),
            &serde_json::to_vec(&record)?,
        )?;

        log::debug!("recorded usage of key '{}' by payload {}", key_name, payload_id);
        Ok(record)
    }

    fn all(&self) -> VaultResult<Vec<UsageRecord>> {
        let mut records = Vec::new();
        for id in self.store.list(namespaces::USAGE)? {
            if let Some(bytes) = self.store.get(namespaces::USAGE, &id)? {
                let record: UsageRecord = serde_json::from_slice(&bytes).map_err(|e| {
                    VaultError::StorageFailure(format!("usage record {}: {}", id, e))
                })?;
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn usage_count(&self, key_name: &str) -> VaultResult<usize> {
        Ok(self.usages_for(key_name)?.len())
    }

    /// Records for a key name, oldest first
    pub fn usages_for(&self, key_name: &str) -> VaultResult<Vec<UsageRecord>> {
        let mut records: Vec<_> = self
            .all()?
            .into_iter()
            .filter(|r| r.key_name == key_name)
            .collect();
        records.sort_by_key(|r| r.imported_at);
        Ok(records)
    }

    /// Remove every record for a payload. Returns how many were removed.
    pub fn delete_usage(&self, payload_id: Uuid) -> VaultResult<usize> {
        self.delete_where(|r| r.payload_id == payload_id)
    }

    /// Remove every record for a key name. Returns how many were removed.
    pub fn delete_all_usages_for(&self, key_name: &str) -> VaultResult<usize> {
        self.delete_where(|r| r.key_name == key_name)
    }

    fn delete_where(&self, matches: impl Fn(&UsageRecord) -> bool) -> VaultResult<usize> {
        let _guard = self.write_lock.lock();
        let mut removed = 0;
        for record in self.all()?.iter().filter(|r| matches(r)) {
            if self.store.delete(namespaces::USAGE, &record.id.to_string())? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
