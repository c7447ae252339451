//! Container header codec.
//!
//! ```text
//! byte 0      algorithm id
//! byte 1      info: bits 7-5 version | bits 4-3 reserved (0) | bit 2 salt class | bits 1-0 cost class
//! byte 2..    salt (12 or 16 bytes)
//! ```

use serde::{Deserialize, Serialize};

use super::cipher::Algorithm;
use super::kdf::CostTier;
use super::{LONG_SALT_LEN, SHORT_SALT_LEN};
use crate::error::{Error, Result};

pub const VERSION_V0: u8 = 0;

/// Length of the fixed part (algorithm id + info byte).
pub const PREFIX_LEN: usize = 2;

const VERSION_SHIFT: u8 = 5;
const SALT_CLASS_BIT: u8 = 0b0000_0100;
const RESERVED_MASK: u8 = 0b0001_1000;
const COST_MASK: u8 = 0b0000_0011;

/// Salt-length class recorded in the info byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaltLength {
    Short,
    Long,
}

impl SaltLength {
    pub fn len(self) -> usize {
        match self {
            SaltLength::Short => SHORT_SALT_LEN,
            SaltLength::Long => LONG_SALT_LEN,
        }
    }

    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            SHORT_SALT_LEN => Some(SaltLength::Short),
            LONG_SALT_LEN => Some(SaltLength::Long),
            _ => None,
        }
    }
}

impl std::str::FromStr for SaltLength {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "short" | "12" => Ok(SaltLength::Short),
            "long" | "16" => Ok(SaltLength::Long),
            other => Err(format!("unknown salt length '{other}' (expected short or long)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    algorithm: Algorithm,
    version: u8,
    tier: CostTier,
    salt: Vec<u8>,
}

impl Header {
    /// Builds a version 0 header. The salt must be 12 or 16 bytes and the tier
    /// one of the named header tiers.
    pub fn new(algorithm: Algorithm, tier: CostTier, salt: Vec<u8>) -> Result<Self> {
        if SaltLength::from_len(salt.len()).is_none() {
            return Err(Error::header("salt length has no header class"));
        }
        if tier.header_class().is_none() {
            return Err(Error::header("cost tier has no header class"));
        }
        Ok(Self {
            algorithm,
            version: VERSION_V0,
            tier,
            salt,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn tier(&self) -> CostTier {
        self.tier
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn salt_length(&self) -> SaltLength {
        // checked in `new` and `from_bytes`
        SaltLength::from_len(self.salt.len()).unwrap_or(SaltLength::Long)
    }

    /// Encoded size: two fixed bytes plus the salt.
    pub fn len(&self) -> usize {
        PREFIX_LEN + self.salt.len()
    }

    pub fn info_byte(&self) -> u8 {
        let salt_class = match self.salt_length() {
            SaltLength::Short => 0,
            SaltLength::Long => SALT_CLASS_BIT,
        };
        let cost_class = self.tier.header_class().unwrap_or(0);
        (self.version << VERSION_SHIFT) | salt_class | cost_class
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        buf.push(self.algorithm.id());
        buf.push(self.info_byte());
        buf.extend_from_slice(&self.salt);
        buf
    }

    /// Validates the two fixed bytes and returns the total header length they
    /// announce, without needing the salt.
    pub fn encoded_len(prefix: &[u8]) -> Result<usize> {
        let (_, _, salt_length) = parse_prefix(prefix)?;
        Ok(PREFIX_LEN + salt_length.len())
    }

    /// Parses a header from the start of `data`, returning it with the offset
    /// where the body begins.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let (algorithm, tier, salt_length) = parse_prefix(data)?;

        let end = PREFIX_LEN + salt_length.len();
        if data.len() < end {
            return Err(Error::header("truncated salt"));
        }

        Ok((
            Header {
                algorithm,
                version: VERSION_V0,
                tier,
                salt: data[PREFIX_LEN..end].to_vec(),
            },
            end,
        ))
    }
}

fn parse_prefix(data: &[u8]) -> Result<(Algorithm, CostTier, SaltLength)> {
    if data.len() < PREFIX_LEN {
        return Err(Error::header("truncated header"));
    }

    let algorithm =
        Algorithm::from_id(data[0]).ok_or_else(|| Error::header("unknown algorithm id"))?;

    let info = data[1];
    let version = info >> VERSION_SHIFT;
    if version != VERSION_V0 {
        return Err(Error::header("unsupported version"));
    }
    if info & RESERVED_MASK != 0 {
        return Err(Error::header("reserved bits set"));
    }

    let tier = CostTier::from_header_class(info & COST_MASK)
        .ok_or_else(|| Error::header("unknown cost class"))?;

    let salt_length = if info & SALT_CLASS_BIT == 0 {
        SaltLength::Short
    } else {
        SaltLength::Long
    };

    Ok((algorithm, tier, salt_length))
}
