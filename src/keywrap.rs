//! Envelope encryption: a random data key (DEK) encrypts the payload and is
//! itself wrapped under a key-encryption key (KEK).
//!
//! Re-protecting data under a new KEK only re-wraps the small envelope; the
//! payload ciphertext is left untouched.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::aead::{open, seal};
use crate::crypto::{DerivedKey, KEY_LEN, generate_key};
use crate::error::{Error, Result};

/// Per-installation payload key. Zeroized on drop.
pub struct DataKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl DataKey {
    pub fn generate() -> Result<Self> {
        Ok(Self {
            bytes: generate_key()?,
        })
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Key-encryption key: device-bound or derived from a password.
pub struct Kek {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl Kek {
    pub fn generate() -> Result<Self> {
        Ok(Self {
            bytes: generate_key()?,
        })
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl From<DerivedKey> for Kek {
    fn from(key: DerivedKey) -> Self {
        Kek::from_bytes(*key.as_bytes())
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

/// A data key wrapped under a KEK with AES-256-GCM.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyEnvelope {
    /// base64 IV
    pub iv: String,
    /// base64 ciphertext + tag of the data key
    pub wrapped_key: String,
}

/// Bulk data sealed under a 256-bit key with AES-256-GCM.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SealedPayload {
    pub iv: String,
    pub ciphertext: String,
}

impl SealedPayload {
    pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Self> {
        let (ciphertext, iv) = seal(key, plaintext)?;
        Ok(Self {
            iv: base64_encode(&iv),
            ciphertext: base64_encode(&ciphertext),
        })
    }

    pub fn open(&self, key: &[u8; KEY_LEN]) -> Result<Zeroizing<Vec<u8>>> {
        let iv = base64_decode(&self.iv)?;
        let ciphertext = base64_decode(&self.ciphertext)?;
        open(key, &iv, &ciphertext)
    }
}

/// Wraps and unwraps data keys.
pub struct KeyWrapManager;

impl KeyWrapManager {
    pub fn wrap(data_key: &DataKey, kek: &Kek) -> Result<KeyEnvelope> {
        let (wrapped, iv) = seal(kek.as_bytes(), data_key.as_bytes())?;
        Ok(KeyEnvelope {
            iv: base64_encode(&iv),
            wrapped_key: base64_encode(&wrapped),
        })
    }

    pub fn unwrap(envelope: &KeyEnvelope, kek: &Kek) -> Result<DataKey> {
        let iv = base64_decode(&envelope.iv)?;
        let wrapped = base64_decode(&envelope.wrapped_key)?;
        let plaintext = open(kek.as_bytes(), &iv, &wrapped)?;

        let bytes: [u8; KEY_LEN] = plaintext[..]
            .try_into()
            .map_err(|_| Error::Authentication)?;
        Ok(DataKey::from_bytes(bytes))
    }

    /// Moves an envelope from one KEK to another without touching the payload.
    pub fn rewrap(envelope: &KeyEnvelope, old: &Kek, new: &Kek) -> Result<KeyEnvelope> {
        let data_key = Self::unwrap(envelope, old)?;
        Self::wrap(&data_key, new)
    }
}

fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    STANDARD.decode(s).map_err(|_| Error::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let kek = Kek::generate().unwrap();
        let dek = DataKey::generate().unwrap();

        let envelope = KeyWrapManager::wrap(&dek, &kek).unwrap();
        let unwrapped = KeyWrapManager::unwrap(&envelope, &kek).unwrap();

        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn unwrap_with_wrong_kek_fails() {
        let dek = DataKey::generate().unwrap();
        let envelope = KeyWrapManager::wrap(&dek, &Kek::from_bytes([1u8; KEY_LEN])).unwrap();

        let result = KeyWrapManager::unwrap(&envelope, &Kek::from_bytes([2u8; KEY_LEN]));
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn rewrap_keeps_payload_readable() {
        let old = Kek::generate().unwrap();
        let new = Kek::generate().unwrap();
        let dek = DataKey::generate().unwrap();

        let payload = SealedPayload::seal(dek.as_bytes(), b"settings").unwrap();
        let envelope = KeyWrapManager::wrap(&dek, &old).unwrap();
        let moved = KeyWrapManager::rewrap(&envelope, &old, &new).unwrap();

        assert!(KeyWrapManager::unwrap(&moved, &old).is_err());
        let dek2 = KeyWrapManager::unwrap(&moved, &new).unwrap();
        assert_eq!(&payload.open(dek2.as_bytes()).unwrap()[..], b"settings");
    }

    #[test]
    fn envelope_serializes_with_camel_case_fields() {
        let envelope = KeyWrapManager::wrap(
            &DataKey::generate().unwrap(),
            &Kek::generate().unwrap(),
        )
        .unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert!(json.get("iv").is_some());
        assert!(json.get("wrappedKey").is_some());
    }

    #[test]
    fn corrupted_base64_is_an_authentication_failure() {
        let payload = SealedPayload {
            iv: "***".to_string(),
            ciphertext: "AAAA".to_string(),
        };
        assert!(matches!(
            payload.open(&[0u8; KEY_LEN]),
            Err(Error::Authentication)
        ));
    }
}
