//! Chunked streaming transforms.
//!
//! Stream body format:
//! ```text
//! repeated: [4 bytes: chunk length, big-endian][chunk: nonce || ciphertext]
//! ```
//!
//! Both transforms are pull-based: feed bytes with `push`, drain complete
//! frames (or plaintext chunks) with `next_*` until it yields `None`, and call
//! `finish` once the source is exhausted. Input may be split anywhere.

use std::io::{ErrorKind, Read, Write};

use tracing::{debug, warn};

use crate::crypto::{ChunkCipher, Header, NONCE_LEN, TAG_LEN};
use crate::error::{Error, Result};

/// Default plaintext bytes per frame (512 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;
/// Largest accepted plaintext chunk (64 MiB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;
/// Size of the frame length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;
/// Largest length prefix an intact stream can carry.
pub const MAX_FRAME_LEN: usize = MAX_CHUNK_SIZE + NONCE_LEN + TAG_LEN;

const READ_BUF_LEN: usize = 64 * 1024;

pub(crate) fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(Error::InvalidChunkSize(chunk_size));
    }
    Ok(())
}

/// Splits plaintext into fixed-size chunks and emits length-prefixed frames.
pub struct EncryptTransform<'c, C: ChunkCipher + ?Sized> {
    cipher: &'c C,
    chunk_size: usize,
    pending: Vec<u8>,
    frames: u64,
}

impl<'c, C: ChunkCipher + ?Sized> EncryptTransform<'c, C> {
    pub fn new(cipher: &'c C, chunk_size: usize) -> Result<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            cipher,
            chunk_size,
            pending: Vec::new(),
            frames: 0,
        })
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Emits one frame if a full chunk is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pending.len() < self.chunk_size {
            return Ok(None);
        }
        let chunk: Vec<u8> = self.pending.drain(..self.chunk_size).collect();
        self.seal(&chunk).map(Some)
    }

    /// Drains every remaining full chunk, then encrypts the short remainder
    /// as a last frame. Nothing is emitted for an empty remainder.
    pub fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            frames.push(self.seal(&rest)?);
        }
        Ok(frames)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn seal(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = self.cipher.encrypt_chunk(chunk)?;
        let len = u32::try_from(ciphertext.len()).map_err(|_| Error::Encryption)?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + ciphertext.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&ciphertext);
        self.frames += 1;
        Ok(frame)
    }
}

/// Reassembles length-prefixed frames and decrypts them in order.
pub struct DecryptTransform<'c, C: ChunkCipher + ?Sized> {
    cipher: &'c C,
    pending: Vec<u8>,
    frames: u64,
    dropped: usize,
}

impl<'c, C: ChunkCipher + ?Sized> DecryptTransform<'c, C> {
    pub fn new(cipher: &'c C) -> Self {
        Self {
            cipher,
            pending: Vec::new(),
            frames: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Decrypts one frame if it is fully buffered; otherwise waits for more input.
    ///
    /// A length prefix above [`MAX_FRAME_LEN`] fails with
    /// [`Error::Authentication`] right away instead of waiting for the frame.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(prefix) = self.pending.first_chunk::<LENGTH_PREFIX_LEN>() else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(*prefix) as usize;
        if len > MAX_FRAME_LEN {
            warn!(len, "frame length exceeds maximum");
            return Err(Error::Authentication);
        }
        let end = LENGTH_PREFIX_LEN + len;
        if self.pending.len() < end {
            return Ok(None);
        }

        let plaintext = self
            .cipher
            .decrypt_chunk(&self.pending[LENGTH_PREFIX_LEN..end])?;
        self.pending.drain(..end);
        self.frames += 1;
        Ok(Some(plaintext))
    }

    /// Drains the remaining complete frames. Trailing bytes that cannot form
    /// a frame are discarded without error; see [`DecryptTransform::dropped_bytes`].
    pub fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            chunks.push(chunk);
        }
        if !self.pending.is_empty() {
            self.dropped += self.pending.len();
            warn!(
                dropped_bytes = self.pending.len(),
                "discarding incomplete trailing frame"
            );
            self.pending.clear();
        }
        Ok(chunks)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes discarded by [`DecryptTransform::finish`].
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }
}

/// Counters reported by the stream drivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub dropped_bytes: usize,
}

fn read_some<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match source.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Writes `header` (if any) followed by the frame sequence for `source`.
///
/// Frames are produced strictly in source order. If this fails part-way the
/// sink holds an incomplete container and must be discarded by the caller.
pub fn encrypt_stream<C, R, W>(
    cipher: &C,
    header: Option<&Header>,
    mut source: R,
    mut sink: W,
    chunk_size: usize,
) -> Result<StreamSummary>
where
    C: ChunkCipher + ?Sized,
    R: Read,
    W: Write,
{
    let mut transform = EncryptTransform::new(cipher, chunk_size)?;
    let mut summary = StreamSummary::default();

    if let Some(header) = header {
        let bytes = header.to_bytes();
        sink.write_all(&bytes)?;
        summary.bytes_out += bytes.len() as u64;
    }

    let mut buf = vec![0u8; READ_BUF_LEN];
    loop {
        let n = read_some(&mut source, &mut buf)?;
        if n == 0 {
            break;
        }
        summary.bytes_in += n as u64;
        transform.push(&buf[..n]);
        while let Some(frame) = transform.next_frame()? {
            sink.write_all(&frame)?;
            summary.bytes_out += frame.len() as u64;
        }
    }

    for frame in transform.finish()? {
        sink.write_all(&frame)?;
        summary.bytes_out += frame.len() as u64;
    }
    sink.flush()?;

    summary.frames = transform.frames();
    debug!(frames = summary.frames, bytes_in = summary.bytes_in, "encrypted stream");
    Ok(summary)
}

/// Decrypts a frame sequence (header already consumed) into `sink`.
pub fn decrypt_stream<C, R, W>(cipher: &C, mut source: R, mut sink: W) -> Result<StreamSummary>
where
    C: ChunkCipher + ?Sized,
    R: Read,
    W: Write,
{
    let mut transform = DecryptTransform::new(cipher);
    let mut summary = StreamSummary::default();

    let mut buf = vec![0u8; READ_BUF_LEN];
    loop {
        let n = read_some(&mut source, &mut buf)?;
        if n == 0 {
            break;
        }
        summary.bytes_in += n as u64;
        transform.push(&buf[..n]);
        while let Some(chunk) = transform.next_chunk()? {
            sink.write_all(&chunk)?;
            summary.bytes_out += chunk.len() as u64;
        }
    }

    for chunk in transform.finish()? {
        sink.write_all(&chunk)?;
        summary.bytes_out += chunk.len() as u64;
    }
    sink.flush()?;

    summary.frames = transform.frames();
    summary.dropped_bytes = transform.dropped_bytes();
    debug!(frames = summary.frames, bytes_out = summary.bytes_out, "decrypted stream");
    Ok(summary)
}

/// Encrypts an in-memory buffer into a container blob.
pub fn encrypt_to_vec<C: ChunkCipher + ?Sized>(
    cipher: &C,
    header: Option<&Header>,
    data: &[u8],
    chunk_size: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encrypt_stream(cipher, header, data, &mut out, chunk_size)?;
    Ok(out)
}

/// Decrypts a frame sequence held in memory. On failure no plaintext is returned.
pub fn decrypt_to_vec<C: ChunkCipher + ?Sized>(cipher: &C, frames: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decrypt_stream(cipher, frames, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Algorithm, Cipher, DerivedKey, KEY_LEN};
    use proptest::prelude::*;

    const CHUNK: usize = 64;

    fn cipher() -> Cipher {
        Cipher::new(Algorithm::Aes256Gcm, &DerivedKey::from_bytes([9u8; KEY_LEN]))
    }

    fn frame_lengths(mut body: &[u8]) -> Vec<usize> {
        let mut lens = Vec::new();
        while !body.is_empty() {
            let len = u32::from_be_bytes(body[..4].try_into().unwrap()) as usize;
            lens.push(len);
            body = &body[4 + len..];
        }
        lens
    }

    #[test]
    fn chunk_boundaries_roundtrip() {
        let c = cipher();
        for (size, expected_frames) in [(1, 1), (CHUNK - 1, 1), (CHUNK, 1), (CHUNK + 1, 2), (3 * CHUNK, 3)] {
            let data: Vec<u8> = (0..size).map(|i| i as u8).collect();
            let body = encrypt_to_vec(&c, None, &data, CHUNK).unwrap();

            assert_eq!(frame_lengths(&body).len(), expected_frames, "size {size}");
            assert_eq!(decrypt_to_vec(&c, &body).unwrap(), data, "size {size}");
        }
    }

    #[test]
    fn frame_length_covers_nonce_and_tag() {
        let c = cipher();
        let body = encrypt_to_vec(&c, None, &[0u8; CHUNK], CHUNK).unwrap();
        assert_eq!(frame_lengths(&body), vec![NONCE_LEN + CHUNK + TAG_LEN]);
    }

    #[test]
    fn empty_input_produces_no_frames() {
        let c = cipher();
        let body = encrypt_to_vec(&c, None, &[], CHUNK).unwrap();
        assert!(body.is_empty());
        assert!(decrypt_to_vec(&c, &body).unwrap().is_empty());
    }

    #[test]
    fn exact_chunk_is_not_encrypted_twice() {
        let c = cipher();
        let mut transform = EncryptTransform::new(&c, CHUNK).unwrap();
        transform.push(&[1u8; CHUNK]);
        assert!(transform.next_frame().unwrap().is_some());
        assert!(transform.next_frame().unwrap().is_none());
        assert!(transform.finish().unwrap().is_empty());
        assert_eq!(transform.frames(), 1);
    }

    #[test]
    fn encrypt_waits_for_full_chunk() {
        let c = cipher();
        let mut transform = EncryptTransform::new(&c, CHUNK).unwrap();
        transform.push(&[1u8; CHUNK - 1]);
        assert!(transform.next_frame().unwrap().is_none());
        transform.push(&[1u8; 2]);
        assert!(transform.next_frame().unwrap().is_some());
        assert_eq!(transform.finish().unwrap().len(), 1);
    }

    #[test]
    fn decrypt_waits_for_complete_frame() {
        let c = cipher();
        let body = encrypt_to_vec(&c, None, b"partial frame", CHUNK).unwrap();

        let mut transform = DecryptTransform::new(&c);
        transform.push(&body[..3]);
        assert!(transform.next_chunk().unwrap().is_none());
        transform.push(&body[3..body.len() - 1]);
        assert!(transform.next_chunk().unwrap().is_none());
        transform.push(&body[body.len() - 1..]);
        assert_eq!(transform.next_chunk().unwrap().unwrap(), b"partial frame");
    }

    #[test]
    fn truncated_tail_is_dropped_on_finish() {
        let c = cipher();
        let data = vec![5u8; CHUNK * 2];
        let body = encrypt_to_vec(&c, None, &data, CHUNK).unwrap();
        let cut = body.len() - 10;

        let mut transform = DecryptTransform::new(&c);
        transform.push(&body[..cut]);
        let mut out = Vec::new();
        while let Some(chunk) = transform.next_chunk().unwrap() {
            out.extend(chunk);
        }
        for chunk in transform.finish().unwrap() {
            out.extend(chunk);
        }

        assert_eq!(out, vec![5u8; CHUNK]);
        assert_eq!(transform.dropped_bytes(), cut - (LENGTH_PREFIX_LEN + NONCE_LEN + CHUNK + TAG_LEN));
    }

    #[test]
    fn tampered_frame_fails() {
        let c = cipher();
        let mut body = encrypt_to_vec(&c, None, b"do not touch", CHUNK).unwrap();
        let last = body.len() - 1;
        body[last] ^= 0x80;
        assert!(matches!(decrypt_to_vec(&c, &body), Err(Error::Authentication)));
    }

    #[test]
    fn oversized_length_prefix_fails_without_buffering() {
        let c = cipher();
        let body = encrypt_to_vec(&c, None, &[7u8; CHUNK * 3], CHUNK).unwrap();
        let frame_len = LENGTH_PREFIX_LEN + NONCE_LEN + CHUNK + TAG_LEN;
        assert_eq!(body.len(), 3 * frame_len);

        let mut tampered = body.clone();
        tampered[2 * frame_len] ^= 0x80;
        assert!(matches!(
            decrypt_to_vec(&c, &tampered),
            Err(Error::Authentication)
        ));

        let mut transform = DecryptTransform::new(&c);
        transform.push(&tampered[2 * frame_len..2 * frame_len + LENGTH_PREFIX_LEN]);
        assert!(matches!(transform.next_chunk(), Err(Error::Authentication)));
    }

    #[test]
    fn header_is_written_first() {
        let c = cipher();
        let header = Header::new(
            Algorithm::Aes256Gcm,
            crate::crypto::CostTier::Low,
            vec![3u8; 12],
        )
        .unwrap();
        let out = encrypt_to_vec(&c, Some(&header), b"abc", CHUNK).unwrap();
        assert_eq!(&out[..header.len()], &header.to_bytes()[..]);
        assert_eq!(decrypt_to_vec(&c, &out[header.len()..]).unwrap(), b"abc");
    }

    #[test]
    fn invalid_chunk_size_is_rejected() {
        let c = cipher();
        assert!(EncryptTransform::new(&c, 0).is_err());
        assert!(EncryptTransform::new(&c, MAX_CHUNK_SIZE + 1).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn arbitrary_split_points_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..400),
            cuts in proptest::collection::vec(1usize..50, 1..20),
        ) {
            let c = cipher();

            let mut enc = EncryptTransform::new(&c, 37).unwrap();
            let mut body = Vec::new();
            let mut rest = &data[..];
            for cut in cuts.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let (head, tail) = rest.split_at((*cut).min(rest.len()));
                enc.push(head);
                while let Some(frame) = enc.next_frame().unwrap() {
                    body.extend(frame);
                }
                rest = tail;
            }
            for frame in enc.finish().unwrap() {
                body.extend(frame);
            }

            let mut dec = DecryptTransform::new(&c);
            let mut out = Vec::new();
            let mut rest = &body[..];
            for cut in cuts.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let (head, tail) = rest.split_at((*cut).min(rest.len()));
                dec.push(head);
                while let Some(chunk) = dec.next_chunk().unwrap() {
                    out.extend(chunk);
                }
                rest = tail;
            }
            for chunk in dec.finish().unwrap() {
                out.extend(chunk);
            }

            prop_assert_eq!(out, data);
            prop_assert_eq!(dec.dropped_bytes(), 0);
        }
    }
}
