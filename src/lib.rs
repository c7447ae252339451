//! Passphrase-based text and file encryption with a self-describing
//! container format, plus an encrypted settings record guarded by an
//! optional master password.

pub mod config;
pub mod crypto;
pub mod device;
mod error;
pub mod keywrap;
pub mod payload;
pub mod service;
pub mod session;
pub mod storage;
pub mod stream;

use std::path::PathBuf;

use anyhow::{Context, Result as AnyResult};
use directories::ProjectDirs;

pub use crate::config::{ConfigManager, ConfigState, ConfigStatus, ExportBundle};
pub use crate::crypto::{Algorithm, CostTier, Header, KdfConfig, SaltLength};
pub use crate::error::{Error, Result};
pub use crate::service::{EncryptionService, ServiceConfig};
pub use crate::storage::Storage;
pub use crate::stream::StreamSummary;

/// Platform data directory holding the settings record and device keys.
pub fn default_home() -> AnyResult<PathBuf> {
    let project_dirs =
        ProjectDirs::from("", "", "sealbox").context("could not determine platform directories")?;

    Ok(project_dirs.data_dir().to_path_buf())
}
