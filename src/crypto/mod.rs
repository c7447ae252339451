//! Cryptographic building blocks.
//!
//! Provides password hardening, the chunk cipher suites, the container header
//! codec and small AEAD helpers used for key wrapping.

pub mod aead;
pub mod cipher;
pub mod header;
pub mod kdf;

pub use aead::{generate_key, generate_salt, secure_random};
pub use cipher::{Algorithm, ChunkCipher, Cipher};
pub use header::{Header, SaltLength};
pub use kdf::{CostTier, DerivedKey, KdfConfig, derive_key};

/// Length of every symmetric key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the per-chunk nonce and of envelope IVs (12 bytes).
pub const NONCE_LEN: usize = 12;
/// Length of an AEAD authentication tag (16 bytes).
pub const TAG_LEN: usize = 16;
/// Short salt class (12 bytes).
pub const SHORT_SALT_LEN: usize = 12;
/// Long salt class (16 bytes).
pub const LONG_SALT_LEN: usize = 16;
