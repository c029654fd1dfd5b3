//! Locafoto Vault - Main Vault Implementation
//!
//! Ties the PIN session, key registry, usage ledger and payload store to one
//! vault directory:
//!
//! ```text
//! <root>/config.json    VaultConfig (no secrets)
//! <root>/secrets/       PIN salt, biometric secret
//! <root>/keys/          wrapped named keys
//! <root>/usage/         payload -> key name ledger
//! <root>/payloads/      encrypted photos
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use locafoto_keyvault::{FileSecretStore, KdfParams, MasterKey, SecretStore};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::biometrics::{self, LockoutConfig, PinAttempts};
use crate::envelope::{self, LfsContainer, LfsOptions};
use crate::error::{VaultError, VaultResult};
use crate::photo_crypto::{self, EncryptedPayload, KeySource, PayloadStore, PhotoMetadata};
use crate::registry::{KeyLookup, KeyRegistry, NamedKey};
use crate::secure_fs::{RecordStore, SecureFs};
use crate::session::Session;
use crate::usage::{UsageRecord, UsageTracker};

pub const CONFIG_FILE: &str = "config.json";
const SECRETS_DIR: &str = "secrets";

/// Vault state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    Unlocked,
}

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault name
    pub name: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Version
    pub version: String,
    /// PIN derivation parameters
    pub kdf: KdfParams,
    /// Accept `.lfs` containers with no ciphertext
    pub allow_empty_payload: bool,
    /// Failed PIN lockout
    pub lockout: LockoutConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "Locafoto".into(),
            created_at: Utc::now(),
            version: crate::VERSION.into(),
            kdf: KdfParams::default(),
            allow_empty_payload: false,
            lockout: LockoutConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn load(root: &Path) -> VaultResult<Self> {
        let path = root.join(CONFIG_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::VaultNotFound(root.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let config: VaultConfig = serde_json::from_slice(&data)?;
        config.kdf.validate()?;
        Ok(config)
    }

    fn save(&self, root: &Path) -> VaultResult<()> {
        fs::write(root.join(CONFIG_FILE), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn lfs_options(&self) -> LfsOptions {
        LfsOptions {
            allow_empty_payload: self.allow_empty_payload,
        }
    }
}

/// Main Vault
pub struct LocafotoVault {
    root: PathBuf,
    config: VaultConfig,
    secrets: Arc<dyn SecretStore>,
    registry: KeyRegistry,
    usage: Arc<UsageTracker>,
    payloads: PayloadStore,
    session: RwLock<Option<Session>>,
    attempts: Mutex<PinAttempts>,
}

impl LocafotoVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new vault at the given path and set up its PIN
    pub fn create<P: AsRef<Path>>(path: P, pin: &str, config: VaultConfig) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();
        let secrets = Arc::new(FileSecretStore::new(&root.join(SECRETS_DIR)));
        Self::create_with(root, pin, config, secrets)
    }

    /// Create with an injected secret store
    pub fn create_with<P: AsRef<Path>>(
        path: P,
        pin: &str,
        config: VaultConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();
        if root.join(CONFIG_FILE).exists() {
            return Err(VaultError::VaultAlreadyExists(root.display().to_string()));
        }
        config.kdf.validate()?;

        fs::create_dir_all(&root)?;
        let session = Session::setup(secrets.as_ref(), pin, config.kdf)?;
        config.save(&root)?;

        let vault = Self::assemble(root, config, secrets);
        *vault.session.write() = Some(session);

        log::info!("created vault at {}", vault.root.display());
        Ok(vault)
    }

    /// Open an existing vault. It starts locked.
    pub fn open<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();
        let secrets = Arc::new(FileSecretStore::new(&root.join(SECRETS_DIR)));
        Self::open_with(root, secrets)
    }

    /// Open with an injected secret store
    pub fn open_with<P: AsRef<Path>>(path: P, secrets: Arc<dyn SecretStore>) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();
        let config = VaultConfig::load(&root)?;
        Ok(Self::assemble(root, config, secrets))
    }

    fn assemble(root: PathBuf, config: VaultConfig, secrets: Arc<dyn SecretStore>) -> Self {
        let records: Arc<dyn RecordStore> = Arc::new(SecureFs::new(&root));
        let usage = Arc::new(UsageTracker::new(Arc::clone(&records)));
        let registry = KeyRegistry::new(Arc::clone(&records), Arc::clone(&usage));
        let attempts = PinAttempts::new(config.lockout);

        Self {
            root,
            config,
            secrets,
            registry,
            usage,
            payloads: PayloadStore::new(records),
            session: RwLock::new(None),
            attempts: Mutex::new(attempts),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UNLOCK / LOCK
    // ═══════════════════════════════════════════════════════════════════════

    /// Unlock vault with PIN
    pub fn unlock(&self, pin: &str) -> VaultResult<()> {
        let mut attempts = self.attempts.lock();
        attempts.check()?;

        match Session::unlock(self.secrets.as_ref(), &self.registry, pin, self.config.kdf) {
            Ok(session) => {
                attempts.record_success();
                *self.session.write() = Some(session);
                log::info!("vault unlocked");
                Ok(())
            }
            Err(VaultError::InvalidPin) => Err(attempts.record_failure()),
            Err(e) => Err(e),
        }
    }

    /// Unlock with the secret the platform released after a biometric prompt
    pub fn unlock_biometric(&self) -> VaultResult<()> {
        self.attempts.lock().check()?;
        let master = biometrics::load_biometric_secret(self.secrets.as_ref())?
            .ok_or(VaultError::BiometricFailed)?;
        let session = Session::from_released_key(&self.registry, master)?;
        *self.session.write() = Some(session);
        log::info!("vault unlocked (biometric)");
        Ok(())
    }

    pub fn enable_biometric_unlock(&self) -> VaultResult<()> {
        self.with_master(|master| biometrics::store_biometric_secret(self.secrets.as_ref(), master))
    }

    pub fn disable_biometric_unlock(&self) -> VaultResult<()> {
        biometrics::clear_biometric_secret(self.secrets.as_ref())
    }

    /// Check a PIN without changing the vault state
    pub fn verify_pin(&self, pin: &str) -> VaultResult<bool> {
        Session::verify_pin(self.secrets.as_ref(), &self.registry, pin, self.config.kdf)
    }

    /// Lock vault (drops the master key)
    pub fn lock(&self) {
        *self.session.write() = None;
        log::info!("vault locked");
    }

    pub fn state(&self) -> VaultState {
        if self.session.read().is_some() {
            VaultState::Unlocked
        } else {
            VaultState::Locked
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == VaultState::Unlocked
    }

    fn with_master<T>(&self, f: impl FnOnce(&MasterKey) -> VaultResult<T>) -> VaultResult<T> {
        let session = self.session.read();
        let session = session.as_ref().ok_or(VaultError::VaultLocked)?;
        f(session.master())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // KEYS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn create_key(&self, name: &str) -> VaultResult<NamedKey> {
        self.with_master(|master| self.registry.create_key(name, master))
    }

    pub fn import_key(&self, name: &str, raw: &[u8]) -> VaultResult<NamedKey> {
        self.with_master(|master| self.registry.import_key(name, raw, master))
    }

    pub fn import_key_hex(&self, name: &str, hex_key: &str) -> VaultResult<NamedKey> {
        self.with_master(|master| self.registry.import_key_hex(name, hex_key, master))
    }

    pub fn import_shared_key(&self, data: &[u8]) -> VaultResult<NamedKey> {
        self.with_master(|master| self.registry.import_shared_key(data, master))
    }

    pub fn export_shared_key(&self, name: &str) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.with_master(|master| self.registry.export_shared_key(name, master))
    }

    pub fn list_keys(&self) -> VaultResult<Vec<NamedKey>> {
        self.registry.list_keys()
    }

    pub fn find_key(&self, name: &str) -> VaultResult<Option<NamedKey>> {
        self.registry.find_key(name)
    }

    pub fn delete_key(&self, name: &str) -> VaultResult<()> {
        let key = self
            .registry
            .find_key(name)?
            .ok_or_else(|| VaultError::KeyNotFound(name.to_string()))?;
        self.registry.delete_key(key.id)
    }

    pub fn usages_for(&self, key_name: &str) -> VaultResult<Vec<UsageRecord>> {
        self.usage.usages_for(key_name)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SHARED FILES (.lfs)
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt bytes under a named key into `.lfs` bytes
    pub fn seal_shared(&self, key_name: &str, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let key = self.with_master(|master| self.registry.get_key(KeyLookup::Name(key_name), master))?;
        LfsContainer::seal(key_name, plaintext, &key)?.to_bytes_with(self.config.lfs_options())
    }

    /// Decrypt `.lfs` bytes. Returns the key name and the plaintext.
    pub fn open_shared(&self, data: &[u8]) -> VaultResult<(String, Zeroizing<Vec<u8>>)> {
        let container = envelope::decode_lfs_with(data, self.config.lfs_options())?;
        let key = self.with_master(|master| {
            self.registry
                .get_key(KeyLookup::Name(&container.key_name), master)
        })?;
        let plaintext = container.open(&key)?;
        Ok((container.key_name, plaintext))
    }

    /// Import a received `.lfs`: authenticate it under the named key, store
    /// the ciphertext unchanged, and record the usage.
    pub fn import_shared_file(
        &self,
        data: &[u8],
        original_filename: Option<&str>,
        thumbnail: Option<&[u8]>,
    ) -> VaultResult<EncryptedPayload> {
        let container = envelope::decode_lfs_with(data, self.config.lfs_options())?;
        let key_name = container.key_name.clone();

        let payload = self.with_master(|master| {
            let thumb_key = photo_crypto::thumbnail_key(master)?;

            self.registry.with_key_for_import(&key_name, master, |key| {
                let plaintext = container.open(key)?;
                let mut payload = EncryptedPayload::from_lfs(
                    container,
                    PhotoMetadata::new(detect_format(&plaintext)),
                );
                if let Some(thumb) = thumbnail {
                    payload =
                        payload.with_thumbnail(photo_crypto::seal_thumbnail(thumb, &thumb_key)?);
                }

                self.payloads.insert(&payload)?;
                if let Err(e) = self.usage.record_import(
                    payload.id,
                    &key_name,
                    original_filename,
                    data.len() as u64,
                ) {
                    let _ = self.payloads.delete(payload.id);
                    return Err(e);
                }
                Ok(payload)
            })
        })?;

        log::info!("imported shared file under key '{}' as {}", key_name, payload.id);
        Ok(payload)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PHOTOS
    // ═══════════════════════════════════════════════════════════════════════

    /// Store a local capture under a fresh content key
    pub fn import_photo(
        &self,
        plaintext: &[u8],
        meta: Option<PhotoMetadata>,
        thumbnail: Option<&[u8]>,
    ) -> VaultResult<EncryptedPayload> {
        let meta = meta.unwrap_or_else(|| PhotoMetadata::new(detect_format(plaintext)));

        let payload = self.with_master(|master| {
            let payload = photo_crypto::seal_with_master(plaintext, master, meta)?;
            match thumbnail {
                Some(thumb) => {
                    let thumb_key = photo_crypto::thumbnail_key(master)?;
                    Ok(payload.with_thumbnail(photo_crypto::seal_thumbnail(thumb, &thumb_key)?))
                }
                None => Ok(payload),
            }
        })?;

        self.payloads.insert(&payload)?;
        log::info!("imported photo {} ({} bytes)", payload.id, payload.original_size);
        Ok(payload)
    }

    /// Get decrypted photo by ID
    pub fn get_photo(&self, id: Uuid) -> VaultResult<Zeroizing<Vec<u8>>> {
        let payload = self.payload(id)?;
        self.with_master(|master| match payload.key_name.as_deref() {
            Some(name) => {
                let key = self.registry.get_key(KeyLookup::Name(name), master)?;
                photo_crypto::open_payload(&payload, KeySource::Named(&key))
            }
            None => photo_crypto::open_payload(&payload, KeySource::Master(master)),
        })
    }

    /// Get decrypted thumbnail by ID
    pub fn get_thumbnail(&self, id: Uuid) -> VaultResult<Option<Zeroizing<Vec<u8>>>> {
        let payload = self.payload(id)?;
        let Some(thumb) = payload.thumbnail.as_ref() else {
            return Ok(None);
        };
        self.with_master(|master| {
            let thumb_key = photo_crypto::thumbnail_key(master)?;
            photo_crypto::open_thumbnail(thumb, &thumb_key).map(Some)
        })
    }

    /// `.lfs` bytes for a photo stored under a named key
    pub fn export_photo(&self, id: Uuid) -> VaultResult<Vec<u8>> {
        self.payload(id)?.to_lfs(self.config.lfs_options())
    }

    pub fn list_photos(&self) -> VaultResult<Vec<Uuid>> {
        self.payloads.list_ids()
    }

    /// Delete a photo and its usage records. Returns how many usage records
    /// were removed.
    ///
    /// Usage records go first. If removing the payload then fails, the key is
    /// already released and calling again removes the payload.
    pub fn delete_photo(&self, id: Uuid) -> VaultResult<usize> {
        let removed_usages = self.usage.delete_usage(id)?;
        let removed_payload = self.payloads.delete(id)?;
        if !removed_payload && removed_usages == 0 {
            return Err(VaultError::PhotoNotFound(id.to_string()));
        }
        log::info!("deleted photo {} ({} usage records)", id, removed_usages);
        Ok(removed_usages)
    }

    fn payload(&self, id: Uuid) -> VaultResult<EncryptedPayload> {
        self.payloads
            .get(id)?
            .ok_or_else(|| VaultError::PhotoNotFound(id.to_string()))
    }
}

/// Detect the container format from magic bytes
pub fn detect_format(data: &[u8]) -> &'static str {
    if data.len() < 8 {
        return "unknown";
    }

    match &data[0..8] {
        [0xFF, 0xD8, 0xFF, ..] => "jpeg",
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] => "png",
        [0x47, 0x49, 0x46, 0x38, ..] => "gif",
        [0x52, 0x49, 0x46, 0x46, ..] if data.len() >= 12 && &data[8..12] == b"WEBP" => "webp",
        _ if data.len() >= 12 && &data[4..8] == b"ftyp" => match &data[8..12] {
            b"heic" | b"heix" => "heic",
            b"mif1" => "heif",
            b"qt  " => "mov",
            _ => "mp4",
        },
        _ => "unknown",
    }
}
