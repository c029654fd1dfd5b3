//! AES-256-GCM sealing and key wrapping
//!
//! Ciphertext, nonce and tag are kept apart (detached tag) because the
//! `.lfs` container and the payload records store them as separate fields.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use zeroize::{Zeroize, Zeroizing};

use super::keys::{generate_nonce, KeyBytes, RawKey, KEY_LEN, NONCE_LEN, TAG_LEN, WRAPPED_KEY_LEN};
use crate::error::{KeyVaultError, Result};

/// Output of a seal: ciphertext (same length as the plaintext), nonce and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

impl SealedBox {
    /// Serialize as `nonce || ciphertext || tag`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse `nonce || ciphertext || tag`
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce, rest) = data.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        Some(Self {
            ciphertext: ciphertext.to_vec(),
            nonce: nonce.try_into().ok()?,
            tag: tag.try_into().ok()?,
        })
    }
}

fn cipher_for<K: KeyBytes + ?Sized>(key: &K) -> Aes256Gcm {
    Aes256Gcm::new(key.key_bytes().into())
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal<K: KeyBytes + ?Sized>(plaintext: &[u8], key: &K) -> Result<SealedBox> {
    let nonce = generate_nonce()?;
    seal_with_nonce(plaintext, key, &nonce)
}

/// Seal with a caller-chosen nonce.
///
/// IV passthrough exists only for the legacy pairing where a thumbnail is
/// sealed under the nonce of its full-resolution photo. Reusing a nonce under
/// one key across distinct plaintexts leaks their XOR and lets the tag be
/// forged, so the returned tag must be stored and checked for this blob on
/// its own; it says nothing about any other ciphertext.
pub fn seal_with_nonce<K: KeyBytes + ?Sized>(
    plaintext: &[u8],
    key: &K,
    nonce: &[u8; NONCE_LEN],
) -> Result<SealedBox> {
    let cipher = cipher_for(key);
    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer) {
        Ok(tag) => tag,
        Err(e) => {
            buffer.zeroize();
            return Err(KeyVaultError::EncryptionFailed(e.to_string()));
        }
    };

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedBox {
        ciphertext: buffer,
        nonce: *nonce,
        tag: tag_bytes,
    })
}

/// Open a sealed ciphertext. Every failure is `AuthenticationFailed`.
pub fn open<K: KeyBytes + ?Sized>(
    ciphertext: &[u8],
    key: &K,
    nonce: &[u8],
    tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(KeyVaultError::AuthenticationFailed);
    }

    let cipher = cipher_for(key);
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer[..],
            Tag::from_slice(tag),
        )
        .map_err(|_| KeyVaultError::AuthenticationFailed)?;

    Ok(buffer)
}

/// Open a [`SealedBox`].
pub fn open_box<K: KeyBytes + ?Sized>(sealed: &SealedBox, key: &K) -> Result<Zeroizing<Vec<u8>>> {
    open(&sealed.ciphertext, key, &sealed.nonce, &sealed.tag)
}

/// Wrap a raw key under a key-encrypting key: `nonce(12) || ct(32) || tag(16)`.
pub fn wrap_key<K: KeyBytes + ?Sized>(raw: &RawKey, kek: &K) -> Result<Vec<u8>> {
    Ok(seal(raw.expose(), kek)?.to_bytes())
}

/// Unwrap a key produced by [`wrap_key`].
pub fn unwrap_key<K: KeyBytes + ?Sized>(wrapped: &[u8], kek: &K) -> Result<RawKey> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(KeyVaultError::InvalidEncryptedKey(format!(
            "expected {} bytes, got {}",
            WRAPPED_KEY_LEN,
            wrapped.len()
        )));
    }

    let nonce = &wrapped[..NONCE_LEN];
    let ciphertext = &wrapped[NONCE_LEN..NONCE_LEN + KEY_LEN];
    let tag = &wrapped[NONCE_LEN + KEY_LEN..];

    let plaintext = open(ciphertext, kek, nonce, tag)?;
    RawKey::from_slice(&plaintext)
}
