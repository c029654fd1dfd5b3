//! Photo envelope encryption for Locafoto
//!
//! A payload is sealed one of two ways:
//! - under a named key (`key_name` set): the ciphertext can leave the device
//!   as an `.lfs` container unchanged
//! - under a fresh per-photo content key that is itself wrapped by the master
//!   key (`wrapped_content_key` set): camera captures that are never shared
//!
//! Thumbnails are separate sealed blobs with their own nonce and tag, always
//! under the HKDF thumbnail key of the master key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use locafoto_keyvault::crypto::{self, derive_thumbnail_key, NONCE_LEN, TAG_LEN};
use locafoto_keyvault::{MasterKey, RawKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::envelope::{self, LfsContainer, LfsOptions};
use crate::error::{VaultError, VaultResult};
use crate::registry::validate_key_name;
use crate::secure_fs::{namespaces, RecordStore};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Caller-supplied description of a photo or video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    /// Container format, e.g. "jpeg", "heic", "mov"
    pub format: String,
    pub capture_date: DateTime<Utc>,
    pub dimensions: Option<Dimensions>,
    pub location: Option<GeoLocation>,
}

impl PhotoMetadata {
    pub fn new(format: &str) -> Self {
        Self {
            format: format.to_string(),
            capture_date: Utc::now(),
            dimensions: None,
            location: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sealed records
// ---------------------------------------------------------------------------

/// Independently sealed thumbnail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedThumbnail {
    #[serde(with = "crate::b64::bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::b64::array")]
    pub nonce: [u8; NONCE_LEN],
    #[serde(with = "crate::b64::array")]
    pub tag: [u8; TAG_LEN],
}

/// Immutable encrypted photo record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub id: Uuid,
    #[serde(with = "crate::b64::bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::b64::array")]
    pub nonce: [u8; NONCE_LEN],
    #[serde(with = "crate::b64::array")]
    pub tag: [u8; TAG_LEN],
    #[serde(default, with = "crate::b64::option")]
    pub wrapped_content_key: Option<Vec<u8>>,
    pub key_name: Option<String>,
    pub original_size: u64,
    pub format: String,
    pub capture_date: DateTime<Utc>,
    pub dimensions: Option<Dimensions>,
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub thumbnail: Option<SealedThumbnail>,
}

/// Key used to open a payload
#[derive(Debug, Clone, Copy)]
pub enum KeySource<'a> {
    /// The unwrapped named key the payload references
    Named(&'a RawKey),
    /// The session master key, for payloads with a wrapped content key
    Master(&'a MasterKey),
}

impl EncryptedPayload {
    fn from_parts(
        sealed: locafoto_keyvault::SealedBox,
        original_size: u64,
        key_name: Option<String>,
        wrapped_content_key: Option<Vec<u8>>,
        meta: PhotoMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            tag: sealed.tag,
            wrapped_content_key,
            key_name,
            original_size,
            format: meta.format,
            capture_date: meta.capture_date,
            dimensions: meta.dimensions,
            location: meta.location,
            thumbnail: None,
        }
    }

    /// Adopt an imported `.lfs` container as-is. The ciphertext is not
    /// re-encrypted; callers authenticate it before storing.
    pub fn from_lfs(container: LfsContainer, meta: PhotoMetadata) -> Self {
        let original_size = container.ciphertext.len() as u64;
        Self::from_parts(
            locafoto_keyvault::SealedBox {
                ciphertext: container.ciphertext,
                nonce: container.nonce,
                tag: container.tag,
            },
            original_size,
            Some(container.key_name),
            None,
            meta,
        )
    }

    /// Shareable `.lfs` bytes. Only payloads sealed under a named key qualify.
    pub fn to_lfs(&self, options: LfsOptions) -> VaultResult<Vec<u8>> {
        let key_name = self.key_name.as_deref().ok_or_else(|| {
            VaultError::InvalidFormat("payload is sealed under the master key".into())
        })?;
        envelope::encode_lfs_with(key_name, &self.ciphertext, &self.nonce, &self.tag, options)
    }

    pub fn with_thumbnail(mut self, thumbnail: SealedThumbnail) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }
}

// ---------------------------------------------------------------------------
// Seal / open
// ---------------------------------------------------------------------------

/// Seal under a named key
pub fn seal_with_named_key(
    plaintext: &[u8],
    key_name: &str,
    key: &RawKey,
    meta: PhotoMetadata,
) -> VaultResult<EncryptedPayload> {
    validate_key_name(key_name)?;
    let sealed = crypto::seal(plaintext, key)?;
    Ok(EncryptedPayload::from_parts(
        sealed,
        plaintext.len() as u64,
        Some(key_name.to_string()),
        None,
        meta,
    ))
}

/// Seal under a fresh content key wrapped by the master key
pub fn seal_with_master(
    plaintext: &[u8],
    master: &MasterKey,
    meta: PhotoMetadata,
) -> VaultResult<EncryptedPayload> {
    let content_key = RawKey::generate()?;
    let sealed = crypto::seal(plaintext, &content_key)?;
    let wrapped = crypto::wrap_key(&content_key, master)?;
    Ok(EncryptedPayload::from_parts(
        sealed,
        plaintext.len() as u64,
        None,
        Some(wrapped),
        meta,
    ))
}

pub fn open_payload(payload: &EncryptedPayload, key: KeySource<'_>) -> VaultResult<Zeroizing<Vec<u8>>> {
    match (key, &payload.wrapped_content_key) {
        (KeySource::Named(raw), None) => {
            Ok(crypto::open(&payload.ciphertext, raw, &payload.nonce, &payload.tag)?)
        }
        (KeySource::Master(master), Some(wrapped)) => {
            let content_key = crypto::unwrap_key(wrapped, master)?;
            Ok(crypto::open(
                &payload.ciphertext,
                &content_key,
                &payload.nonce,
                &payload.tag,
            )?)
        }
        (KeySource::Named(_), Some(_)) => Err(VaultError::InvalidFormat(
            "payload is sealed under the master key".into(),
        )),
        (KeySource::Master(_), None) => Err(VaultError::InvalidFormat(
            "payload is sealed under a named key".into(),
        )),
    }
}

pub fn seal_thumbnail(thumbnail: &[u8], thumb_key: &RawKey) -> VaultResult<SealedThumbnail> {
    let sealed = crypto::seal(thumbnail, thumb_key)?;
    Ok(SealedThumbnail {
        ciphertext: sealed.ciphertext,
        nonce: sealed.nonce,
        tag: sealed.tag,
    })
}

pub fn open_thumbnail(thumbnail: &SealedThumbnail, thumb_key: &RawKey) -> VaultResult<Zeroizing<Vec<u8>>> {
    Ok(crypto::open(
        &thumbnail.ciphertext,
        thumb_key,
        &thumbnail.nonce,
        &thumbnail.tag,
    )?)
}

/// Thumbnail key for every import path
pub fn thumbnail_key(master: &MasterKey) -> VaultResult<RawKey> {
    Ok(derive_thumbnail_key(master)?)
}

// ---------------------------------------------------------------------------
// PayloadStore
// ---------------------------------------------------------------------------

/// Persists payload records. Records are write-once.
pub struct PayloadStore {
    store: Arc<dyn RecordStore>,
}

impl PayloadStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn insert(&self, payload: &EncryptedPayload) -> VaultResult<()> {
        let id = payload.id.to_string();
        if self.store.get(namespaces::PAYLOADS, &id)?.is_some() {
            return Err(VaultError::StorageFailure(format!(
                "payload {} already exists",
                id
            )));
        }
        self.store
            .put(namespaces::PAYLOADS, &id, &serde_json::to_vec(payload)?)?;
        log::debug!("stored payload {} ({} bytes)", id, payload.ciphertext.len());
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> VaultResult<Option<EncryptedPayload>> {
        let id = id.to_string();
        let Some(bytes) = self.store.get(namespaces::PAYLOADS, &id)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| VaultError::StorageFailure(format!("payload record {}: {}", id, e)))
    }

    pub fn delete(&self, id: Uuid) -> VaultResult<bool> {
        self.store.delete(namespaces::PAYLOADS, &id.to_string())
    }

    pub fn list_ids(&self) -> VaultResult<Vec<Uuid>> {
        self.store
            .list(namespaces::PAYLOADS)?
            .iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map_err(|e| VaultError::StorageFailure(format!("payload id {}: {}", id, e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_fs::{MemoryStore, SecureFs};
    use tempfile::tempdir;

    fn test_keys() -> (MasterKey, RawKey) {
        (MasterKey::from_bytes([0x42u8; 32]), RawKey::from_bytes([0x43u8; 32]))
    }

    #[test]
    fn test_named_key_roundtrip() {
        let (_, key) = test_keys();
        let photo = b"FAKE JPEG DATA 1234567890";

        let payload = seal_with_named_key(photo, "vault", &key, PhotoMetadata::new("jpeg")).unwrap();
        assert_eq!(payload.key_name.as_deref(), Some("vault"));
        assert!(payload.wrapped_content_key.is_none());
        assert_eq!(payload.original_size, photo.len() as u64);

        let opened = open_payload(&payload, KeySource::Named(&key)).unwrap();
        assert_eq!(opened.as_slice(), photo);
    }

    #[test]
    fn test_master_roundtrip() {
        let (master, _) = test_keys();
        let photo = vec![7u8; 4096];

        let payload = seal_with_master(&photo, &master, PhotoMetadata::new("heic")).unwrap();
        assert!(payload.key_name.is_none());
        assert_eq!(payload.wrapped_content_key.as_ref().map(Vec::len), Some(60));

        let opened = open_payload(&payload, KeySource::Master(&master)).unwrap();
        assert_eq!(opened.as_slice(), photo.as_slice());
    }

    #[test]
    fn test_wrong_key_source_is_format_error() {
        let (master, key) = test_keys();
        let named = seal_with_named_key(b"x", "vault", &key, PhotoMetadata::new("jpeg")).unwrap();
        let camera = seal_with_master(b"x", &master, PhotoMetadata::new("jpeg")).unwrap();

        assert!(matches!(
            open_payload(&named, KeySource::Master(&master)),
            Err(VaultError::InvalidFormat(_))
        ));
        assert!(matches!(
            open_payload(&camera, KeySource::Named(&key)),
            Err(VaultError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_tampered_data_fails() {
        let (master, key) = test_keys();
        let mut payload = seal_with_named_key(b"Secret photo", "vault", &key, PhotoMetadata::new("jpeg")).unwrap();
        payload.ciphertext[5] ^= 0xFF;
        assert!(matches!(
            open_payload(&payload, KeySource::Named(&key)),
            Err(VaultError::AuthenticationFailed)
        ));

        let other = MasterKey::from_bytes([0x44u8; 32]);
        let camera = seal_with_master(b"Secret photo", &master, PhotoMetadata::new("jpeg")).unwrap();
        assert!(matches!(
            open_payload(&camera, KeySource::Master(&other)),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_thumbnail_is_independent() {
        let (master, key) = test_keys();
        let thumb_key = thumbnail_key(&master).unwrap();
        assert_ne!(thumb_key.expose(), master.expose());

        let thumb = seal_thumbnail(b"tiny preview", &thumb_key).unwrap();
        let payload = seal_with_named_key(b"full resolution", "vault", &key, PhotoMetadata::new("jpeg"))
            .unwrap()
            .with_thumbnail(thumb.clone());

        assert_ne!(thumb.nonce, payload.nonce);
        assert_ne!(thumb.tag, payload.tag);
        assert_eq!(
            open_thumbnail(&thumb, &thumb_key).unwrap().as_slice(),
            b"tiny preview"
        );

        let mut broken = thumb;
        broken.tag[0] ^= 1;
        assert!(open_thumbnail(&broken, &thumb_key).is_err());
        assert!(open_payload(&payload, KeySource::Named(&key)).is_ok());
    }

    #[test]
    fn test_lfs_interop() {
        let (_, key) = test_keys();
        let container = LfsContainer::seal("vault", &[0x11u8; 1000], &key).unwrap();
        let bytes = container.to_bytes().unwrap();

        let payload = EncryptedPayload::from_lfs(envelope::decode_lfs(&bytes).unwrap(), PhotoMetadata::new("jpeg"));
        assert_eq!(payload.original_size, 1000);
        assert_eq!(payload.to_lfs(LfsOptions::default()).unwrap(), bytes);
        assert_eq!(
            open_payload(&payload, KeySource::Named(&key)).unwrap().as_slice(),
            &[0x11u8; 1000][..]
        );
    }

    #[test]
    fn test_master_payload_not_shareable() {
        let (master, _) = test_keys();
        let payload = seal_with_master(b"x", &master, PhotoMetadata::new("jpeg")).unwrap();
        assert!(matches!(
            payload.to_lfs(LfsOptions::default()),
            Err(VaultError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_payload_store() {
        let dir = tempdir().unwrap();
        let store = PayloadStore::new(Arc::new(SecureFs::new(dir.path())));
        let (master, _) = test_keys();

        let mut meta = PhotoMetadata::new("jpeg");
        meta.dimensions = Some(Dimensions { width: 4032, height: 3024 });
        meta.location = Some(GeoLocation { latitude: 52.5, longitude: 13.25 });
        let payload = seal_with_master(b"photo", &master, meta).unwrap();

        store.insert(&payload).unwrap();
        assert!(store.insert(&payload).is_err());

        let loaded = store.get(payload.id).unwrap().unwrap();
        assert_eq!(loaded, payload);
        assert_eq!(store.list_ids().unwrap(), vec![payload.id]);

        assert!(store.delete(payload.id).unwrap());
        assert!(store.get(payload.id).unwrap().is_none());
    }

    #[test]
    fn test_payload_store_memory() {
        let store = PayloadStore::new(Arc::new(MemoryStore::new()));
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
        assert!(store.list_ids().unwrap().is_empty());
    }
}
