//! Text and file encryption on top of the container format.
//!
//! Text container: `base64(header || nonce || ciphertext)`.
//! File container: `header || frame*`, see [`crate::stream`].

use std::io::{ErrorKind, Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::header::PREFIX_LEN;
use crate::crypto::{Algorithm, ChunkCipher, Cipher, CostTier, Header, KdfConfig, SaltLength};
use crate::error::{Error, Result};
use crate::stream::{self, DEFAULT_CHUNK_SIZE, StreamSummary};

/// Choices applied to new encryptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub algorithm: Algorithm,
    pub tier: CostTier,
    pub salt_length: SaltLength,
    pub chunk_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            tier: CostTier::Middle,
            salt_length: SaltLength::Long,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncryptionService {
    kdf: KdfConfig,
    config: ServiceConfig,
}

impl EncryptionService {
    pub fn new(kdf: KdfConfig, config: ServiceConfig) -> Self {
        Self { kdf, config }
    }

    pub fn kdf(&self) -> &KdfConfig {
        &self.kdf
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn encode_header(algorithm: Algorithm, salt: &[u8], tier: CostTier) -> Result<Vec<u8>> {
        Ok(Header::new(algorithm, tier, salt.to_vec())?.to_bytes())
    }

    pub fn decode_header(data: &[u8]) -> Result<Header> {
        Header::from_bytes(data).map(|(header, _)| header)
    }

    /// Encrypts a short string into a base64 container.
    pub fn encrypt_text(&self, plaintext: &str, passphrase: &[u8]) -> Result<String> {
        let (cipher, header) = self.fresh_cipher(passphrase)?;

        let block = cipher.encrypt_chunk(plaintext.as_bytes())?;
        let mut container = header.to_bytes();
        container.extend_from_slice(&block);

        Ok(STANDARD.encode(container))
    }

    pub fn decrypt_text(&self, text: &str, passphrase: &[u8]) -> Result<Zeroizing<String>> {
        let container = STANDARD
            .decode(text.trim())
            .map_err(|_| Error::header("invalid base64"))?;
        let (header, offset) = Header::from_bytes(&container)?;
        let cipher = self.cipher_for(&header, passphrase)?;

        let plaintext = cipher.decrypt_chunk(&container[offset..])?;
        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| Error::Authentication)
    }

    /// Streams `source` into `sink` as a file container.
    pub fn encrypt_file<R: Read, W: Write>(
        &self,
        source: R,
        sink: W,
        passphrase: &[u8],
    ) -> Result<StreamSummary> {
        let (cipher, header) = self.fresh_cipher(passphrase)?;
        stream::encrypt_stream(&cipher, Some(&header), source, sink, self.config.chunk_size)
    }

    /// Streams a file container from `source` into `sink`.
    ///
    /// Plaintext is written as frames authenticate; on error the sink holds a
    /// partial result that the caller must discard.
    pub fn decrypt_file<R: Read, W: Write>(
        &self,
        mut source: R,
        sink: W,
        passphrase: &[u8],
    ) -> Result<StreamSummary> {
        let header = Self::read_header(&mut source)?;
        let cipher = self.cipher_for(&header, passphrase)?;
        stream::decrypt_stream(&cipher, source, sink)
    }

    /// Reads exactly one header from the front of `source`.
    pub fn read_header<R: Read>(source: &mut R) -> Result<Header> {
        let mut prefix = [0u8; PREFIX_LEN];
        read_exact_or_truncated(source, &mut prefix)?;
        let len = Header::encoded_len(&prefix)?;

        let mut buf = vec![0u8; len];
        buf[..PREFIX_LEN].copy_from_slice(&prefix);
        read_exact_or_truncated(source, &mut buf[PREFIX_LEN..])?;

        Self::decode_header(&buf)
    }

    /// Heuristic: is `text` a base64 text container with a known header?
    pub fn is_encrypted(text: &str) -> bool {
        let Ok(container) = STANDARD.decode(text.trim()) else {
            return false;
        };
        match Header::from_bytes(&container) {
            Ok((header, offset)) => container.len() - offset >= header.algorithm().overhead(),
            Err(_) => false,
        }
    }

    /// Heuristic: do the first bytes of a file look like a container header?
    pub fn is_encrypted_file(prefix: &[u8]) -> bool {
        match prefix {
            [] => false,
            [id] => Algorithm::from_id(*id).is_some(),
            _ => Header::encoded_len(prefix).is_ok(),
        }
    }

    fn fresh_cipher(&self, passphrase: &[u8]) -> Result<(Cipher, Header)> {
        let ServiceConfig {
            algorithm,
            tier,
            salt_length,
            ..
        } = self.config;
        let (cipher, salt) = algorithm.initialize(passphrase, salt_length, tier, None, &self.kdf)?;
        debug!(%algorithm, %tier, "initialized cipher for encryption");
        Ok((cipher, Header::new(algorithm, tier, salt)?))
    }

    fn cipher_for(&self, header: &Header, passphrase: &[u8]) -> Result<Cipher> {
        let (cipher, _) = header.algorithm().initialize(
            passphrase,
            header.salt_length(),
            header.tier(),
            Some(header.salt()),
            &self.kdf,
        )?;
        Ok(cipher)
    }
}

fn read_exact_or_truncated<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<()> {
    source.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => Error::header("truncated header"),
        _ => Error::Io(e),
    })
}
