//! Single-slot cache for the session key.

use tracing::debug;

use crate::crypto::{CostTier, DerivedKey, KdfConfig, derive_key};
use crate::error::Result;

struct CacheEntry {
    salt: Vec<u8>,
    tier: CostTier,
    key: DerivedKey,
}

/// Holds at most one derived key, bound to the `(salt, tier)` it was derived
/// with. Not meant for concurrent writers; one per session.
pub struct SessionKeyManager {
    kdf: KdfConfig,
    slot: Option<CacheEntry>,
}

impl SessionKeyManager {
    pub fn new(kdf: KdfConfig) -> Self {
        Self { kdf, slot: None }
    }

    pub fn kdf(&self) -> &KdfConfig {
        &self.kdf
    }

    /// Always derives, replacing whatever the slot held. On failure the slot
    /// is left empty.
    pub fn derive_and_cache(
        &mut self,
        passphrase: &[u8],
        salt: &[u8],
        tier: CostTier,
    ) -> Result<&DerivedKey> {
        self.slot = None;
        let key = derive_key(passphrase, salt, tier, &self.kdf)?;
        debug!(%tier, "cached session key");

        let entry = self.slot.insert(CacheEntry {
            salt: salt.to_vec(),
            tier,
            key,
        });
        Ok(&entry.key)
    }

    /// Caches a key derived elsewhere, e.g. once a re-encryption under it
    /// has been persisted.
    pub fn store(&mut self, salt: &[u8], tier: CostTier, key: DerivedKey) {
        self.slot = Some(CacheEntry {
            salt: salt.to_vec(),
            tier,
            key,
        });
    }

    /// Returns the cached key only for an exact `(salt, tier)` match.
    pub fn get(&self, salt: &[u8], tier: CostTier) -> Option<&DerivedKey> {
        self.slot
            .as_ref()
            .filter(|entry| entry.salt == salt && entry.tier == tier)
            .map(|entry| &entry.key)
    }

    pub fn is_cached(&self) -> bool {
        self.slot.is_some()
    }

    /// Drops the cached key; its bytes are wiped on drop.
    pub fn clear(&mut self) {
        if self.slot.take().is_some() {
            debug!("cleared session key");
        }
    }
}

impl std::fmt::Debug for SessionKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyManager")
            .field("cached", &self.is_cached())
            .finish()
    }
}
