//! Random access decryption for media playback.
//!
//! The fixed chunk geometry of the blob stream puts chunk `i` at
//! `HEADER_LEN + i * FULL_FRAME_LEN`, so a seek only ever decrypts the
//! one chunk the target position falls into. Plaintext length is
//! computed from the ciphertext length alone, without walking the
//! frames.

use std::io::{self, Read, Seek, SeekFrom};

use chacha20poly1305::{XChaCha20Poly1305, aead::Aead};

use crate::crypto::stream::{
    BlobHeader, CHUNK_OVERHEAD, CHUNK_SIZE, FULL_FRAME_LEN, HEADER_LEN, chunk_nonce, cipher_for,
};
use crate::crypto::{NONCE_PREFIX_LEN, TAG_LEN, keys::VaultKey};
use crate::error::{VaultError, VaultResult};

/// Decrypting reader with `Seek` over the plaintext byte range.
///
/// Positions and lengths are all in the plaintext domain; the frame
/// arithmetic stays internal. Chunks are authenticated individually,
/// so a tampered chunk surfaces as an I/O error on the read that
/// touches it.
pub struct SeekableDecryptingSource<R> {
    inner: R,
    cipher: XChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    plaintext_len: u64,
    pos: u64,
    chunk: Vec<u8>,
    loaded_chunk: Option<u64>,
}

impl<R: Read + Seek> SeekableDecryptingSource<R> {
    /// Opens the source, verifying the header's key check.
    ///
    /// Fails with [`VaultError::WrongKey`] when the blob was not
    /// encrypted under `key`, and with [`VaultError::Corrupted`] when
    /// the ciphertext length does not fit the chunk geometry.
    pub fn new(mut inner: R, key: &VaultKey) -> VaultResult<Self> {
        let total = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        let header = BlobHeader::read_from(&mut inner, key)?;
        let plaintext_len = plaintext_len(total)?;

        Ok(Self {
            inner,
            cipher: cipher_for(key),
            nonce_prefix: *header.nonce_prefix(),
            plaintext_len,
            pos: 0,
            chunk: Vec::new(),
            loaded_chunk: None,
        })
    }

    /// Total plaintext length of the blob.
    pub fn len(&self) -> u64 {
        self.plaintext_len
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext_len == 0
    }

    fn load_chunk(&mut self, index: u64) -> io::Result<()> {
        if self.loaded_chunk == Some(index) {
            return Ok(());
        }

        self.inner.seek(SeekFrom::Start(
            HEADER_LEN as u64 + index * FULL_FRAME_LEN as u64,
        ))?;

        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf)?;
        let ct_len = u32::from_le_bytes(len_buf) as usize;
        if ct_len < TAG_LEN || ct_len > CHUNK_SIZE + TAG_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid chunk frame length",
            ));
        }

        let mut ct = vec![0u8; ct_len];
        self.inner.read_exact(&mut ct)?;

        self.chunk = self
            .cipher
            .decrypt(&chunk_nonce(&self.nonce_prefix, index), ct.as_slice())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk decryption failed"))?;
        self.loaded_chunk = Some(index);
        Ok(())
    }
}

impl<R: Read + Seek> Read for SeekableDecryptingSource<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.plaintext_len || out.is_empty() {
            return Ok(0);
        }

        let index = self.pos / CHUNK_SIZE as u64;
        self.load_chunk(index)?;

        let offset = (self.pos % CHUNK_SIZE as u64) as usize;
        if offset >= self.chunk.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "blob shorter than its geometry claims",
            ));
        }

        let n = out.len().min(self.chunk.len() - offset);
        out[..n].copy_from_slice(&self.chunk[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SeekableDecryptingSource<R> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let base = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.plaintext_len as i128 + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        self.apply_seek(base)
    }
}

impl<R> SeekableDecryptingSource<R> {
    fn apply_seek(&mut self, target: i128) -> io::Result<u64> {
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of media",
            ));
        }
        // Seeking past the end is allowed; reads there return 0.
        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// Derives the plaintext length from the on-disk blob length.
fn plaintext_len(blob_len: u64) -> VaultResult<u64> {
    let body = blob_len
        .checked_sub(HEADER_LEN as u64)
        .ok_or_else(|| VaultError::Corrupted("blob too short for header".into()))?;

    let full = body / FULL_FRAME_LEN as u64;
    let rem = body % FULL_FRAME_LEN as u64;
    if rem == 0 {
        return Ok(full * CHUNK_SIZE as u64);
    }
    if rem <= CHUNK_OVERHEAD as u64 {
        return Err(VaultError::Corrupted(
            "trailing frame too short for its overhead".into(),
        ));
    }
    Ok(full * CHUNK_SIZE as u64 + (rem - CHUNK_OVERHEAD as u64))
}
