use thiserror::Error;

/// Failures surfaced by the encryption core.
///
/// Wrong passphrases and tampered ciphertext both map to
/// [`Error::Authentication`]; header problems all render as
/// "unrecognized format" and keep their reason for `Debug` output only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized format")]
    HeaderDecode { reason: &'static str },

    #[error("invalid password or corrupted data")]
    Authentication,

    #[error("session is locked; master password required")]
    SessionLocked,

    #[error("no master password is set")]
    NoMasterPassword,

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),

    #[error("encryption failed")]
    Encryption,

    #[error("OS random generator unavailable")]
    Random,

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("slot {0} not found")]
    SlotNotFound(usize),

    #[error("unsupported data version: {0}")]
    UnsupportedDataVersion(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn header(reason: &'static str) -> Self {
        Error::HeaderDecode { reason }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
