//! Locafoto Vault - Shared File Containers
//!
//! `.lfs` layout (byte exact):
//!
//! ```text
//! [0..128)      key name, UTF-8, zero padded
//! [128..N)      ciphertext
//! [N..N+12)     nonce
//! [N+12..N+28)  GCM tag
//! ```
//!
//! `.lfkey` is pretty-printed JSON: `{ "name": ..., "keyData": base64(32 bytes) }`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use locafoto_keyvault::crypto::{self, KEY_LEN, NONCE_LEN, TAG_LEN};
use locafoto_keyvault::{RawKey, SealedBox};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{VaultError, VaultResult};

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Key name header size
pub const HEADER_LEN: usize = 128;

/// Smallest structurally valid container (empty ciphertext)
pub const MIN_LFS_LEN: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

/// File extensions
pub const LFS_EXTENSION: &str = "lfs";
pub const LFKEY_EXTENSION: &str = "lfkey";

/// Codec options
#[derive(Debug, Clone, Copy, Default)]
pub struct LfsOptions {
    /// Accept containers whose ciphertext is empty
    pub allow_empty_payload: bool,
}

/// A decoded `.lfs` container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsContainer {
    pub key_name: String,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

fn is_padding(b: u8) -> bool {
    b == 0 || b.is_ascii_control() || b.is_ascii_whitespace()
}

fn check_header_name(name: &str) -> VaultResult<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(VaultError::InvalidKeyName("empty".into()));
    }
    if bytes.len() > HEADER_LEN {
        return Err(VaultError::InvalidKeyName(format!(
            "{} bytes (max {})",
            bytes.len(),
            HEADER_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(VaultError::InvalidKeyName(
            "contains control characters".into(),
        ));
    }
    if bytes.last().copied().is_some_and(is_padding) {
        return Err(VaultError::InvalidKeyName(
            "trailing whitespace would not survive the header".into(),
        ));
    }
    Ok(())
}

/// Serialize a container with default options
pub fn encode_lfs(
    key_name: &str,
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
) -> VaultResult<Vec<u8>> {
    encode_lfs_with(key_name, ciphertext, nonce, tag, LfsOptions::default())
}

pub fn encode_lfs_with(
    key_name: &str,
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
    options: LfsOptions,
) -> VaultResult<Vec<u8>> {
    check_header_name(key_name)?;
    if ciphertext.is_empty() && !options.allow_empty_payload {
        return Err(VaultError::InvalidFormat("empty payload".into()));
    }

    let mut out = Vec::with_capacity(MIN_LFS_LEN + ciphertext.len());
    out.extend_from_slice(key_name.as_bytes());
    out.resize(HEADER_LEN, 0);
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(nonce);
    out.extend_from_slice(tag);
    Ok(out)
}

/// Parse a container with default options
pub fn decode_lfs(data: &[u8]) -> VaultResult<LfsContainer> {
    decode_lfs_with(data, LfsOptions::default())
}

pub fn decode_lfs_with(data: &[u8], options: LfsOptions) -> VaultResult<LfsContainer> {
    if data.len() < MIN_LFS_LEN {
        return Err(VaultError::TooShort {
            len: data.len(),
            min: MIN_LFS_LEN,
        });
    }

    let (header, rest) = data.split_at(HEADER_LEN);
    let (ciphertext, trailer) = rest.split_at(rest.len() - NONCE_LEN - TAG_LEN);
    let (nonce, tag) = trailer.split_at(NONCE_LEN);

    let end = header
        .iter()
        .rposition(|&b| !is_padding(b))
        .map_or(0, |i| i + 1);
    let key_name = std::str::from_utf8(&header[..end])
        .map_err(|_| VaultError::InvalidKeyName("header is not valid UTF-8".into()))?;
    if key_name.is_empty() {
        return Err(VaultError::InvalidKeyName("header is empty".into()));
    }
    if key_name.chars().any(char::is_control) {
        return Err(VaultError::InvalidKeyName(
            "header contains control characters".into(),
        ));
    }

    if ciphertext.is_empty() && !options.allow_empty_payload {
        return Err(VaultError::InvalidFormat("empty payload".into()));
    }

    let mut container = LfsContainer {
        key_name: key_name.to_string(),
        ciphertext: ciphertext.to_vec(),
        nonce: [0u8; NONCE_LEN],
        tag: [0u8; TAG_LEN],
    };
    container.nonce.copy_from_slice(nonce);
    container.tag.copy_from_slice(tag);
    Ok(container)
}

impl LfsContainer {
    /// Encrypt `plaintext` under `key` into a container naming `key_name`
    pub fn seal(key_name: &str, plaintext: &[u8], key: &RawKey) -> VaultResult<Self> {
        check_header_name(key_name)?;
        let sealed = crypto::seal(plaintext, key)?;
        Ok(Self {
            key_name: key_name.to_string(),
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            tag: sealed.tag,
        })
    }

    /// Authenticate and decrypt
    pub fn open(&self, key: &RawKey) -> VaultResult<Zeroizing<Vec<u8>>> {
        Ok(crypto::open(&self.ciphertext, key, &self.nonce, &self.tag)?)
    }

    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        self.to_bytes_with(LfsOptions::default())
    }

    pub fn to_bytes_with(&self, options: LfsOptions) -> VaultResult<Vec<u8>> {
        encode_lfs_with(&self.key_name, &self.ciphertext, &self.nonce, &self.tag, options)
    }

    pub fn sealed_box(&self) -> SealedBox {
        SealedBox {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce,
            tag: self.tag,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SHARED KEY FILE (.lfkey)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedKeyFile {
    name: String,
    key_data: String,
}

/// A decoded `.lfkey`
#[derive(Debug, Clone)]
pub struct SharedKey {
    pub name: String,
    pub key: RawKey,
}

pub fn encode_shared_key(name: &str, key: &RawKey) -> VaultResult<Zeroizing<Vec<u8>>> {
    check_header_name(name)?;
    let mut file = SharedKeyFile {
        name: name.to_string(),
        key_data: STANDARD.encode(key.expose()),
    };
    let json = serde_json::to_vec_pretty(&file);
    file.key_data.zeroize();
    Ok(Zeroizing::new(json?))
}

pub fn decode_shared_key(data: &[u8]) -> VaultResult<SharedKey> {
    let mut file: SharedKeyFile = serde_json::from_slice(data)
        .map_err(|e| VaultError::InvalidFormat(format!("not a shared key file: {}", e)))?;

    let decoded = STANDARD.decode(file.key_data.trim()).map(Zeroizing::new);
    file.key_data.zeroize();
    let raw = decoded
        .map_err(|e| VaultError::InvalidFormat(format!("keyData is not base64: {}", e)))?;

    if raw.len() != KEY_LEN {
        return Err(VaultError::InvalidKeyData {
            expected: KEY_LEN,
            actual: raw.len(),
        });
    }
    check_header_name(&file.name)?;

    Ok(SharedKey {
        key: RawKey::from_slice(&raw)?,
        name: file.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NONCE: [u8; NONCE_LEN] = [7u8; NONCE_LEN];
    const TAG: [u8; TAG_LEN] = [9u8; TAG_LEN];

    /// Mixed-width UTF-8 names of 1..=128 bytes without trailing padding
    fn key_name() -> impl Strategy<Value = String> {
        let alphabet = vec!['a', 'Z', '7', '-', '_', ' ', 'é', 'ß', 'Ж', '日', '本', '😀'];
        proptest::collection::vec(proptest::sample::select(alphabet), 1..=128)
            .prop_map(|chars| {
                let mut name = String::new();
                for c in chars {
                    if name.len() + c.len_utf8() > HEADER_LEN {
                        break;
                    }
                    name.push(c);
                }
                name.trim_end().to_string()
            })
            .prop_filter("name must not be blank", |name| !name.is_empty())
    }

    #[test]
    fn test_layout() {
        let encoded = encode_lfs("vault", &[0xAB; 1000], &NONCE, &TAG).unwrap();
        assert_eq!(encoded.len(), 1156);
        assert_eq!(&encoded[..5], b"vault");
        assert!(encoded[5..HEADER_LEN].iter().all(|&b| b == 0));
        assert_eq!(&encoded[HEADER_LEN..HEADER_LEN + 1000], &[0xAB; 1000][..]);
        assert_eq!(&encoded[1128..1140], &NONCE);
        assert_eq!(&encoded[1140..], &TAG);
    }

    #[test]
    fn test_decode_roundtrip() {
        let encoded = encode_lfs("Trip 2024 ✈", b"ciphertext", &NONCE, &TAG).unwrap();
        let decoded = decode_lfs(&encoded).unwrap();
        assert_eq!(decoded.key_name, "Trip 2024 ✈");
        assert_eq!(decoded.ciphertext, b"ciphertext");
        assert_eq!(decoded.nonce, NONCE);
        assert_eq!(decoded.tag, TAG);
    }

    #[test]
    fn test_name_of_exactly_128_bytes() {
        let name = "n".repeat(HEADER_LEN);
        let encoded = encode_lfs(&name, b"x", &NONCE, &TAG).unwrap();
        assert_eq!(decode_lfs(&encoded).unwrap().key_name, name);
    }

    #[test]
    fn test_encode_rejects_bad_names() {
        for name in ["", "trailing ", "tab\tname"] {
            assert!(matches!(
                encode_lfs(name, b"x", &NONCE, &TAG),
                Err(VaultError::InvalidKeyName(_))
            ));
        }
        let long = "n".repeat(HEADER_LEN + 1);
        assert!(matches!(
            encode_lfs(&long, b"x", &NONCE, &TAG),
            Err(VaultError::InvalidKeyName(_))
        ));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            decode_lfs(&[0u8; 155]),
            Err(VaultError::TooShort { len: 155, min: 156 })
        ));
        assert!(matches!(decode_lfs(&[]), Err(VaultError::TooShort { .. })));
    }

    #[test]
    fn test_all_zero_header_rejected() {
        let mut data = vec![0u8; HEADER_LEN];
        data.extend_from_slice(&[1u8; 40]);
        assert!(matches!(
            decode_lfs(&data),
            Err(VaultError::InvalidKeyName(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_header_rejected() {
        let mut data = vec![0xFFu8, 0xFE];
        data.resize(HEADER_LEN, 0);
        data.extend_from_slice(&[1u8; 40]);
        assert!(matches!(
            decode_lfs(&data),
            Err(VaultError::InvalidKeyName(_))
        ));
    }

    #[test]
    fn test_header_padding_trimmed() {
        let mut data = b"vault \n\r".to_vec();
        data.resize(HEADER_LEN, 0);
        data.extend_from_slice(&[1u8; 40]);
        assert_eq!(decode_lfs(&data).unwrap().key_name, "vault");
    }

    #[test]
    fn test_empty_payload_policy() {
        let mut data = b"vault".to_vec();
        data.resize(MIN_LFS_LEN, 0);
        assert!(matches!(
            decode_lfs(&data),
            Err(VaultError::InvalidFormat(_))
        ));

        let lenient = LfsOptions {
            allow_empty_payload: true,
        };
        let decoded = decode_lfs_with(&data, lenient).unwrap();
        assert!(decoded.ciphertext.is_empty());
        assert!(encode_lfs("vault", &[], &NONCE, &TAG).is_err());
        assert_eq!(
            encode_lfs_with("vault", &[], &NONCE, &TAG, lenient).unwrap().len(),
            MIN_LFS_LEN
        );
    }

    #[test]
    fn test_seal_open_through_bytes() {
        let key = RawKey::generate().unwrap();
        let photo = vec![0x42u8; 1000];

        let bytes = LfsContainer::seal("vault", &photo, &key)
            .unwrap()
            .to_bytes()
            .unwrap();
        assert_eq!(bytes.len(), 1156);

        let container = decode_lfs(&bytes).unwrap();
        assert_eq!(container.key_name, "vault");
        assert_eq!(container.open(&key).unwrap().as_slice(), photo.as_slice());
    }

    #[test]
    fn test_tampered_container_fails() {
        let key = RawKey::generate().unwrap();
        let mut bytes = LfsContainer::seal("vault", b"photo", &key)
            .unwrap()
            .to_bytes()
            .unwrap();
        bytes[HEADER_LEN] ^= 0x01;

        let container = decode_lfs(&bytes).unwrap();
        assert!(matches!(
            container.open(&key),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_shared_key_roundtrip() {
        let key = RawKey::generate().unwrap();
        let json = encode_shared_key("vault", &key).unwrap();
        let text = std::str::from_utf8(&json).unwrap();
        assert!(text.contains("\"keyData\""));
        assert!(text.contains("\n  \"name\": \"vault\""));

        let shared = decode_shared_key(&json).unwrap();
        assert_eq!(shared.name, "vault");
        assert_eq!(shared.key.expose(), key.expose());
    }

    #[test]
    fn test_shared_key_from_foreign_writer() {
        let json = format!(
            r#"{{"name": "family", "keyData": "{}"}}"#,
            STANDARD.encode([5u8; KEY_LEN])
        );
        let shared = decode_shared_key(json.as_bytes()).unwrap();
        assert_eq!(shared.name, "family");
        assert_eq!(shared.key.expose(), &[5u8; KEY_LEN]);
    }

    #[test]
    fn test_shared_key_rejects_bad_input() {
        assert!(matches!(
            decode_shared_key(b"not json"),
            Err(VaultError::InvalidFormat(_))
        ));

        let short = format!(
            r#"{{"name": "x", "keyData": "{}"}}"#,
            STANDARD.encode([1u8; 16])
        );
        assert!(matches!(
            decode_shared_key(short.as_bytes()),
            Err(VaultError::InvalidKeyData { expected: 32, actual: 16 })
        ));

        let unnamed = format!(
            r#"{{"name": "", "keyData": "{}"}}"#,
            STANDARD.encode([1u8; KEY_LEN])
        );
        assert!(matches!(
            decode_shared_key(unnamed.as_bytes()),
            Err(VaultError::InvalidKeyName(_))
        ));

        assert!(matches!(
            decode_shared_key(br#"{"name": "x", "keyData": "%%%"}"#),
            Err(VaultError::InvalidFormat(_))
        ));
    }

    proptest! {
        #[test]
        fn lfs_roundtrip(
            name in key_name(),
            ciphertext in proptest::collection::vec(any::<u8>(), 1..=8192),
            nonce in any::<[u8; NONCE_LEN]>(),
            tag in any::<[u8; TAG_LEN]>(),
        ) {
            let encoded = encode_lfs(&name, &ciphertext, &nonce, &tag).unwrap();
            prop_assert_eq!(encoded.len(), MIN_LFS_LEN + ciphertext.len());

            let decoded = decode_lfs(&encoded).unwrap();
            prop_assert_eq!(decoded.key_name, name);
            prop_assert_eq!(decoded.ciphertext, ciphertext);
            prop_assert_eq!(decoded.nonce, nonce);
            prop_assert_eq!(decoded.tag, tag);
        }

        #[test]
        fn sealed_container_opens_after_transport(
            name in key_name(),
            plaintext in proptest::collection::vec(any::<u8>(), 1..=2048),
            key in any::<[u8; KEY_LEN]>(),
        ) {
            let key = RawKey::from_bytes(key);
            let bytes = LfsContainer::seal(&name, &plaintext, &key).unwrap().to_bytes().unwrap();

            let received = decode_lfs(&bytes).unwrap();
            prop_assert_eq!(&received.key_name, &name);
            let opened = received.open(&key).unwrap();
            prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
        }

        #[test]
        fn flipped_body_bit_fails_authentication(
            plaintext in proptest::collection::vec(any::<u8>(), 1..=512),
            key in any::<[u8; KEY_LEN]>(),
            index in any::<proptest::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = RawKey::from_bytes(key);
            let mut bytes = LfsContainer::seal("vault", &plaintext, &key).unwrap().to_bytes().unwrap();

            // ciphertext, nonce or tag
            let at = HEADER_LEN + index.index(bytes.len() - HEADER_LEN);
            bytes[at] ^= 1 << bit;

            let received = decode_lfs(&bytes).unwrap();
            prop_assert!(matches!(
                received.open(&key),
                Err(VaultError::AuthenticationFailed)
            ));
        }
    }
}
