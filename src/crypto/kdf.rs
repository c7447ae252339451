use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use argon2::{Algorithm as Argon2Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use super::KEY_LEN;
use crate::error::{Error, Result};

/// Named derivation cost buckets.
///
/// Only `Low`, `Middle` and `High` can be recorded in a container header.
/// `NoPassword` exercises the derivation path without a perceptible delay and
/// is used for the password-less settings vault only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CostTier {
    NoPassword,
    Low,
    Middle,
    High,
}

impl CostTier {
    /// Two-bit class stored in the header info byte.
    pub fn header_class(self) -> Option<u8> {
        match self {
            CostTier::Low => Some(0b00),
            CostTier::Middle => Some(0b01),
            CostTier::High => Some(0b10),
            CostTier::NoPassword => None,
        }
    }

    pub fn from_header_class(class: u8) -> Option<Self> {
        match class {
            0b00 => Some(CostTier::Low),
            0b01 => Some(CostTier::Middle),
            0b10 => Some(CostTier::High),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CostTier::NoPassword => "no-password",
            CostTier::Low => "low",
            CostTier::Middle => "middle",
            CostTier::High => "high",
        }
    }
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CostTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(CostTier::Low),
            "middle" => Ok(CostTier::Middle),
            "high" => Ok(CostTier::High),
            other => Err(format!("unknown cost tier '{other}' (expected low, middle or high)")),
        }
    }
}

/// System-wide Argon2id settings.
///
/// Memory and parallelism are constants for the whole installation; each
/// [`CostTier`] maps to a fixed time factor. Encrypting and decrypting sides
/// must agree on this configuration, since the header only records the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfConfig {
    mem_cost_kib: u32,
    parallelism: u32,
    no_password_time: u32,
    low_time: u32,
    middle_time: u32,
    high_time: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024, // 64 MiB
            parallelism: 1,
            no_password_time: 1,
            low_time: 3,
            middle_time: 6,
            high_time: 12,
        }
    }
}

impl KdfConfig {
    /// Creates a configuration with custom memory and parallelism and the
    /// default per-tier time factors.
    pub fn new(mem_cost_kib: u32, parallelism: u32) -> Result<Self> {
        let config = Self {
            mem_cost_kib,
            parallelism,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Overrides the time factor of each tier, in `[no-password, low, middle, high]` order.
    pub fn with_time_costs(mut self, times: [u32; 4]) -> Result<Self> {
        [
            self.no_password_time,
            self.low_time,
            self.middle_time,
            self.high_time,
        ] = times;
        self.validate()?;
        Ok(self)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn time_cost(&self, tier: CostTier) -> u32 {
        match tier {
            CostTier::NoPassword => self.no_password_time,
            CostTier::Low => self.low_time,
            CostTier::Middle => self.middle_time,
            CostTier::High => self.high_time,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidKdfParams(msg.to_string()));

        if self.parallelism < 1 {
            return invalid("argon2 parallelism must be >= 1");
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            return invalid("argon2 memory cost must be at least 8 * parallelism");
        }
        let times = [
            self.no_password_time,
            self.low_time,
            self.middle_time,
            self.high_time,
        ];
        if times.contains(&0) {
            return invalid("argon2 time cost must be >= 1");
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            mem_cost_kib: 256,
            parallelism: 1,
            no_password_time: 1,
            low_time: 1,
            middle_time: 2,
            high_time: 3,
        }
    }
}

/// Key material produced by [`derive_key`]. Never serialized.
pub struct DerivedKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives a 256-bit key from a passphrase with Argon2id.
///
/// Deterministic for a given `(passphrase, salt, tier, config)`. On failure no
/// key bytes escape; the scratch buffer is wiped on drop.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    tier: CostTier,
    config: &KdfConfig,
) -> Result<DerivedKey> {
    config.validate()?;

    let params = Params::new(
        config.mem_cost_kib,
        config.time_cost(tier),
        config.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| Error::InvalidKdfParams(e.to_string()))?;

    let argon2 = Argon2::new(Argon2Algorithm::Argon2id, Version::V0x13, params);

    let started = Instant::now();
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase, salt, &mut key[..])
        .map_err(|e| Error::Derivation(e.to_string()))?;

    debug!(tier = %tier, elapsed_ms = started.elapsed().as_millis() as u64, "derived key");

    Ok(DerivedKey { bytes: key })
}
