use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::crypto::{Algorithm, CostTier, SaltLength};
use crate::error::{Error, Result};
use crate::service::ServiceConfig;
use crate::stream::check_chunk_size;

pub const DEFAULT_SLOT_COUNT: usize = 10;

/// Application settings kept inside the encrypted settings record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    slots: Vec<Slot>,
    #[serde(default)]
    options: Options,
    created: String,
}

/// A named stored value, e.g. a saved passphrase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    name: String,
    value: String,
    updated: Option<String>,
}

/// Preferences applied to new encryptions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub algorithm: Algorithm,
    pub tier: CostTier,
    pub salt_length: SaltLength,
    pub chunk_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        let config = ServiceConfig::default();
        Self {
            algorithm: config.algorithm,
            tier: config.tier,
            salt_length: config.salt_length,
            chunk_size: config.chunk_size,
        }
    }
}

impl Options {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            algorithm: self.algorithm,
            tier: self.tier,
            salt_length: self.salt_length,
            chunk_size: self.chunk_size,
        }
    }
}

impl Slot {
    fn empty(index: usize) -> Self {
        Self {
            name: format!("Slot {}", index + 1),
            value: String::new(),
            updated: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn updated(&self) -> Option<&str> {
        self.updated.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::with_slots(DEFAULT_SLOT_COUNT)
    }
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(count: usize) -> Self {
        Self {
            slots: (0..count).map(Slot::empty).collect(),
            options: Options::default(),
            created: Local::now().to_string(),
        }
    }

    pub fn slot(&self, index: usize) -> Result<&Slot> {
        self.slots.get(index).ok_or(Error::SlotNotFound(index))
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn set_slot_value(&mut self, index: usize, value: &str) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or(Error::SlotNotFound(index))?;
        slot.value = value.to_string();
        slot.updated = Some(Local::now().to_string());
        Ok(())
    }

    pub fn set_slot_name(&mut self, index: usize, name: &str) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or(Error::SlotNotFound(index))?;
        slot.name = name.to_string();
        Ok(())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Fails with [`Error::InvalidChunkSize`] for a chunk size no stream accepts.
    pub fn set_options(&mut self, options: Options) -> Result<()> {
        check_chunk_size(options.chunk_size)?;
        self.options = options;
        Ok(())
    }

    pub fn created(&self) -> &str {
        &self.created
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
