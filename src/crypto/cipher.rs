//! Chunk cipher suites.
//!
//! Every chunk is encrypted independently under a fresh random 96-bit nonce
//! which is prepended to the output:
//!
//! ```text
//! [12 bytes: nonce][ciphertext][16 bytes: tag, authenticated suites only]
//! ```
//!
//! The set of suites is closed. Each one carries its own header id, so a
//! legacy container can never be decoded as an authenticated one.

use std::fmt;
use std::str::FromStr;

use aes::Aes256;
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::aead::{Aead, KeyInit};
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::aead::{generate_nonce, generate_salt};
use super::header::SaltLength;
use super::kdf::{CostTier, DerivedKey, KdfConfig, derive_key};
use super::{KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{Error, Result};

type Aes256Ctr = ctr::Ctr32BE<Aes256>;

/// Identifies a cipher suite. The discriminant is the header algorithm id.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// AES-256-GCM, the default.
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305 (IETF, 96-bit nonce).
    ChaCha20Poly1305,
    /// Legacy unauthenticated AES-256-CTR.
    AesCtr,
    /// Legacy XOR keystream. Demonstration only.
    Xor,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Aes256Gcm,
        Algorithm::ChaCha20Poly1305,
        Algorithm::AesCtr,
        Algorithm::Xor,
    ];

    pub fn id(self) -> u8 {
        match self {
            Algorithm::Aes256Gcm => 0x01,
            Algorithm::ChaCha20Poly1305 => 0x02,
            Algorithm::AesCtr => 0x7E,
            Algorithm::Xor => 0x7F,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            Algorithm::AesCtr => "aes-256-ctr",
            Algorithm::Xor => "xor",
        }
    }

    /// Legacy suites have no integrity protection: a wrong key or tampered
    /// chunk decrypts to garbage instead of failing.
    pub fn is_legacy(self) -> bool {
        matches!(self, Algorithm::AesCtr | Algorithm::Xor)
    }

    /// Per-chunk overhead: nonce plus tag when authenticated.
    pub fn overhead(self) -> usize {
        if self.is_legacy() {
            NONCE_LEN
        } else {
            NONCE_LEN + TAG_LEN
        }
    }

    /// Derives the working key from `passphrase` and returns a ready cipher
    /// together with the salt used.
    ///
    /// With `salt: None` a fresh salt of `salt_length` is generated (encrypt
    /// path); a known salt is taken as-is (decrypt path).
    pub fn initialize(
        self,
        passphrase: &[u8],
        salt_length: SaltLength,
        tier: CostTier,
        salt: Option<&[u8]>,
        kdf: &KdfConfig,
    ) -> Result<(Cipher, Vec<u8>)> {
        let salt = match salt {
            Some(salt) if salt.len() == salt_length.len() => salt.to_vec(),
            Some(_) => {
                return Err(Error::InvalidKdfParams(
                    "salt does not match its length class".to_string(),
                ));
            }
            None => generate_salt(salt_length.len())?,
        };

        let key = derive_key(passphrase, &salt, tier, kdf)?;
        Ok((Cipher::new(self, &key), salt))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| format!("unknown algorithm '{s}'"))
    }
}

/// Encrypts and decrypts self-contained chunks.
pub trait ChunkCipher {
    /// Returns `[nonce][ciphertext]` for one chunk.
    fn encrypt_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverses [`ChunkCipher::encrypt_chunk`]. Authenticated suites fail
    /// with [`Error::Authentication`] and never return partial plaintext.
    fn decrypt_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>>;
}

/// An initialized cipher suite.
pub enum Cipher {
    Aes256Gcm(AesGcmChunks),
    ChaCha20Poly1305(ChaChaChunks),
    AesCtr(AesCtrChunks),
    Xor(XorChunks),
}

impl Cipher {
    pub fn new(algorithm: Algorithm, key: &DerivedKey) -> Self {
        let bytes = key.as_bytes();
        match algorithm {
            Algorithm::Aes256Gcm => Cipher::Aes256Gcm(AesGcmChunks {
                cipher: Aes256Gcm::new(bytes.into()),
            }),
            Algorithm::ChaCha20Poly1305 => Cipher::ChaCha20Poly1305(ChaChaChunks {
                cipher: ChaCha20Poly1305::new(bytes.into()),
            }),
            Algorithm::AesCtr => Cipher::AesCtr(AesCtrChunks {
                key: Zeroizing::new(*bytes),
            }),
            Algorithm::Xor => Cipher::Xor(XorChunks {
                key: Zeroizing::new(*bytes),
            }),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Cipher::Aes256Gcm(_) => Algorithm::Aes256Gcm,
            Cipher::ChaCha20Poly1305(_) => Algorithm::ChaCha20Poly1305,
            Cipher::AesCtr(_) => Algorithm::AesCtr,
            Cipher::Xor(_) => Algorithm::Xor,
        }
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl ChunkCipher for Cipher {
    fn encrypt_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            Cipher::Aes256Gcm(c) => c.encrypt_chunk(plaintext),
            Cipher::ChaCha20Poly1305(c) => c.encrypt_chunk(plaintext),
            Cipher::AesCtr(c) => c.encrypt_chunk(plaintext),
            Cipher::Xor(c) => c.encrypt_chunk(plaintext),
        }
    }

    fn decrypt_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        match self {
            Cipher::Aes256Gcm(c) => c.decrypt_chunk(chunk),
            Cipher::ChaCha20Poly1305(c) => c.decrypt_chunk(chunk),
            Cipher::AesCtr(c) => c.decrypt_chunk(chunk),
            Cipher::Xor(c) => c.decrypt_chunk(chunk),
        }
    }
}

fn aead_encrypt<A: Aead>(cipher: &A, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = generate_nonce()?;
    let ciphertext = cipher
        .encrypt(nonce.as_slice().into(), plaintext)
        .map_err(|_| Error::Encryption)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn aead_decrypt<A: Aead>(cipher: &A, chunk: &[u8]) -> Result<Vec<u8>> {
    if chunk.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::Authentication);
    }
    let (nonce, ciphertext) = chunk.split_at(NONCE_LEN);
    cipher
        .decrypt(nonce.into(), ciphertext)
        .map_err(|_| Error::Authentication)
}

pub struct AesGcmChunks {
    cipher: Aes256Gcm,
}

impl ChunkCipher for AesGcmChunks {
    fn encrypt_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        aead_encrypt(&self.cipher, plaintext)
    }

    fn decrypt_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        aead_decrypt(&self.cipher, chunk)
    }
}

pub struct ChaChaChunks {
    cipher: ChaCha20Poly1305,
}

impl ChunkCipher for ChaChaChunks {
    fn encrypt_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        aead_encrypt(&self.cipher, plaintext)
    }

    fn decrypt_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        aead_decrypt(&self.cipher, chunk)
    }
}

pub struct AesCtrChunks {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl AesCtrChunks {
    fn apply(&self, nonce: &[u8], data: &mut [u8]) {
        // nonce || 32-bit block counter
        let mut iv = [0u8; 16];
        iv[..NONCE_LEN].copy_from_slice(nonce);
        let key: &[u8; KEY_LEN] = &self.key;
        let mut ctr = Aes256Ctr::new(key.into(), &iv.into());
        ctr.apply_keystream(data);
    }
}

impl ChunkCipher for AesCtrChunks {
    fn encrypt_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = generate_nonce()?;
        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(plaintext);
        self.apply(&nonce, &mut out[NONCE_LEN..]);
        Ok(out)
    }

    fn decrypt_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        if chunk.len() < NONCE_LEN {
            return Err(Error::Authentication);
        }
        let (nonce, ciphertext) = chunk.split_at(NONCE_LEN);
        let mut out = ciphertext.to_vec();
        self.apply(nonce, &mut out);
        Ok(out)
    }
}

pub struct XorChunks {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl XorChunks {
    fn apply(&self, nonce: &[u8], data: &mut [u8]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.key[i % KEY_LEN] ^ nonce[i % NONCE_LEN];
        }
    }
}

impl ChunkCipher for XorChunks {
    fn encrypt_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = generate_nonce()?;
        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(plaintext);
        self.apply(&nonce, &mut out[NONCE_LEN..]);
        Ok(out)
    }

    fn decrypt_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        if chunk.len() < NONCE_LEN {
            return Err(Error::Authentication);
        }
        let (nonce, ciphertext) = chunk.split_at(NONCE_LEN);
        let mut out = ciphertext.to_vec();
        self.apply(nonce, &mut out);
        Ok(out)
    }
}
