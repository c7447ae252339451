//! Device-bound key-encryption key.
//!
//! The KEK is generated on first use and kept in a small key-value store
//! separate from the settings record, under a fixed identifier. It never
//! leaves the device: exports made with it can only be restored here.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::KEY_LEN;
use crate::keywrap::Kek;
use crate::storage::Storage;

/// Identifier of the device KEK inside the key store.
pub const DEVICE_KEY_ID: &str = "sealbox.device-kek";

/// Durable key-value store for raw key bytes.
pub trait DeviceKeyStore {
    fn get(&self, id: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;
    fn put(&mut self, id: &str, value: &[u8]) -> Result<()>;
}

/// Key store persisted as a JSON object of base64 values, written atomically
/// with owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    storage: Storage,
}

impl FileKeyStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match self.storage.load_if_exists()? {
            Some(data) => serde_json::from_slice(&data).context("device key store is corrupted"),
            None => Ok(BTreeMap::new()),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let data = Zeroizing::new(serde_json::to_vec_pretty(map)?);
        self.storage.save(&data)
    }
}

impl DeviceKeyStore for FileKeyStore {
    fn get(&self, id: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let map = self.read_map()?;
        map.get(id)
            .map(|encoded| {
                STANDARD
                    .decode(encoded)
                    .map(Zeroizing::new)
                    .context("device key store entry is not valid base64")
            })
            .transpose()
    }

    fn put(&mut self, id: &str, value: &[u8]) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(id.to_string(), STANDARD.encode(value));
        self.write_map(&map)
    }
}

/// Volatile key store, for tests and embedders with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: BTreeMap<String, Zeroizing<Vec<u8>>>,
}

impl DeviceKeyStore for MemoryKeyStore {
    fn get(&self, id: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.entries.get(id).cloned())
    }

    fn put(&mut self, id: &str, value: &[u8]) -> Result<()> {
        self.entries
            .insert(id.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }
}

/// Hands out the device KEK, creating it on first use.
#[derive(Debug)]
pub struct DeviceKeyProvider<S: DeviceKeyStore> {
    store: S,
}

impl<S: DeviceKeyStore> DeviceKeyProvider<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the stored KEK, if one was generated already.
    pub fn get(&self) -> Result<Option<Kek>> {
        let Some(bytes) = self.store.get(DEVICE_KEY_ID)? else {
            return Ok(None);
        };
        let bytes: [u8; KEY_LEN] = match bytes[..].try_into() {
            Ok(bytes) => bytes,
            Err(_) => bail!("device key has wrong length"),
        };
        Ok(Some(Kek::from_bytes(bytes)))
    }

    pub fn get_or_create(&mut self) -> Result<Kek> {
        if let Some(kek) = self.get()? {
            return Ok(kek);
        }

        let kek = Kek::generate()?;
        self.store
            .put(DEVICE_KEY_ID, kek.as_bytes())
            .context("failed to persist device key")?;
        info!("generated device key");
        Ok(kek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn key_is_created_once() {
        let mut provider = DeviceKeyProvider::new(MemoryKeyStore::default());
        assert!(provider.get().unwrap().is_none());

        let first = provider.get_or_create().unwrap();
        let second = provider.get_or_create().unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.json");

        let created = DeviceKeyProvider::new(FileKeyStore::new(Storage::new(path.clone())))
            .get_or_create()
            .unwrap();
        let reopened = DeviceKeyProvider::new(FileKeyStore::new(Storage::new(path)))
            .get()
            .unwrap()
            .unwrap();

        assert_eq!(created.as_bytes(), reopened.as_bytes());
    }

    #[test]
    fn separate_stores_get_separate_keys() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let store = |dir: &std::path::Path| FileKeyStore::new(Storage::new(dir.join("device.json")));
        let mut first = DeviceKeyProvider::new(store(a.path()));
        let mut second = DeviceKeyProvider::new(store(b.path()));

        assert!(first.get().unwrap().is_none());
        let one = first.get_or_create().unwrap();
        let two = second.get_or_create().unwrap();
        assert_ne!(one.as_bytes(), two.as_bytes());
    }

    #[test]
    fn file_store_keeps_unrelated_entries() {
        let dir = tempdir().unwrap();
        let mut store = FileKeyStore::new(Storage::new(dir.path().join("device.json")));
        store.put("other", b"value").unwrap();
        store.put(DEVICE_KEY_ID, &[7u8; KEY_LEN]).unwrap();

        assert_eq!(&store.get("other").unwrap().unwrap()[..], b"value");
        assert_eq!(&store.get(DEVICE_KEY_ID).unwrap().unwrap()[..], &[7u8; KEY_LEN]);
    }

    #[test]
    fn wrong_length_key_is_rejected() {
        let mut store = MemoryKeyStore::default();
        store.put(DEVICE_KEY_ID, &[1u8; 5]).unwrap();

        assert!(DeviceKeyProvider::new(store).get().is_err());
    }
}
