//! Chunked streaming blob cipher.
//!
//! Every encrypted blob, whether inside the vault or inside a backup
//! archive, uses the same layout:
//!
//! ```text
//! MAGIC (4) | VERSION (1) | NONCE_PREFIX (16) | KEY_CHECK (16)
//! CT_LEN (4, LE) | CT (CT_LEN)      <- repeated per chunk
//! ```
//!
//! Plaintext is sealed in fixed 64 KiB chunks with XChaCha20-Poly1305.
//! The chunk nonce is the blob's random prefix followed by the chunk
//! counter, so every chunk except the last has a fixed ciphertext size
//! and chunk *i* starts at `HEADER_LEN + i * FULL_FRAME_LEN`. That fixed
//! geometry is what allows random access decryption.
//!
//! KEY_CHECK is the tag of an empty message sealed under a reserved
//! counter. Verifying it at open time turns a wrong key into a
//! recoverable error before any payload bytes are touched.

use std::io::{Read, Write};

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use super::{NONCE_LEN, NONCE_PREFIX_LEN, TAG_LEN, keys::VaultKey, secure_random};
use crate::error::{VaultError, VaultResult};

/// Magic bytes identifying an encrypted pixlock blob.
pub const MAGIC: &[u8; 4] = b"PXLK";
/// Current blob stream version.
pub const STREAM_VERSION: u8 = 1;
/// Plaintext bytes per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Header length: magic + version + nonce prefix + key check tag.
pub const HEADER_LEN: usize = 4 + 1 + NONCE_PREFIX_LEN + TAG_LEN;
/// Length-prefix plus tag overhead added to each chunk's plaintext.
pub const CHUNK_OVERHEAD: usize = 4 + TAG_LEN;
/// On-disk size of a frame holding a full chunk.
pub const FULL_FRAME_LEN: usize = CHUNK_SIZE + CHUNK_OVERHEAD;

// Chunk counters start at zero; this counter is reserved for the key check.
const KEY_CHECK_COUNTER: u64 = u64::MAX;

pub(crate) fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u64) -> XNonce {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&counter.to_le_bytes());
    XNonce::from(nonce)
}

pub(crate) fn cipher_for(key: &VaultKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Parsed blob stream header.
pub struct BlobHeader {
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
}

impl BlobHeader {
    /// Creates a fresh header with a random nonce prefix.
    pub fn generate() -> VaultResult<Self> {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        secure_random(&mut nonce_prefix)?;
        Ok(Self { nonce_prefix })
    }

    pub fn nonce_prefix(&self) -> &[u8; NONCE_PREFIX_LEN] {
        &self.nonce_prefix
    }

    /// Serializes the header, sealing the key check under `key`.
    pub fn to_bytes(&self, key: &VaultKey) -> VaultResult<Vec<u8>> {
        let check = cipher_for(key)
            .encrypt(
                &chunk_nonce(&self.nonce_prefix, KEY_CHECK_COUNTER),
                &b""[..],
            )
            .map_err(|_| VaultError::Crypto("key check sealing failed".into()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(MAGIC);
        buf.push(STREAM_VERSION);
        buf.extend_from_slice(&self.nonce_prefix);
        buf.extend_from_slice(&check);
        Ok(buf)
    }

    /// Reads and validates a header, verifying the key check under `key`.
    ///
    /// A failed key check means the blob was not encrypted under `key`
    /// and yields [`VaultError::WrongKey`], which batch engines treat as
    /// recoverable.
    pub fn read_from<R: Read>(input: &mut R, key: &VaultKey) -> VaultResult<Self> {
        let mut buf = [0u8; HEADER_LEN];
        input
            .read_exact(&mut buf)
            .map_err(|_| VaultError::Corrupted("blob too short for header".into()))?;

        if &buf[..4] != MAGIC {
            return Err(VaultError::Corrupted("invalid blob magic".into()));
        }
        let version = buf[4];
        if version != STREAM_VERSION {
            return Err(VaultError::Corrupted(format!(
                "unsupported blob stream version: {version}"
            )));
        }

        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        nonce_prefix.copy_from_slice(&buf[5..5 + NONCE_PREFIX_LEN]);
        let check = &buf[5 + NONCE_PREFIX_LEN..];

        cipher_for(key)
            .decrypt(&chunk_nonce(&nonce_prefix, KEY_CHECK_COUNTER), check)
            .map_err(|_| VaultError::WrongKey)?;

        Ok(Self { nonce_prefix })
    }
}

/// Write side of the blob stream: buffers plaintext into chunks and
/// seals each full chunk as it fills. Call [`EncryptingWriter::finish`]
/// to seal the trailing partial chunk; dropping without it truncates
/// the blob.
pub struct EncryptingWriter<W: Write> {
    inner: W,
    cipher: XChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    counter: u64,
    buf: Vec<u8>,
}

impl<W: Write> EncryptingWriter<W> {
    /// Creates the writer and emits the blob header.
    pub fn new(mut inner: W, key: &VaultKey) -> VaultResult<Self> {
        let header = BlobHeader::generate()?;
        inner.write_all(&header.to_bytes(key)?)?;

        Ok(Self {
            inner,
            cipher: cipher_for(key),
            nonce_prefix: *header.nonce_prefix(),
            counter: 0,
            buf: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    fn seal_chunk(&mut self) -> std::io::Result<()> {
        let ct = self
            .cipher
            .encrypt(
                &chunk_nonce(&self.nonce_prefix, self.counter),
                self.buf.as_slice(),
            )
            .map_err(|_| std::io::Error::other("chunk sealing failed"))?;
        self.counter += 1;
        self.buf.clear();

        self.inner.write_all(&(ct.len() as u32).to_le_bytes())?;
        self.inner.write_all(&ct)
    }

    /// Seals the trailing partial chunk and returns the inner writer.
    pub fn finish(mut self) -> VaultResult<W> {
        if !self.buf.is_empty() {
            self.seal_chunk()?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = CHUNK_SIZE - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.buf.len() == CHUNK_SIZE {
                self.seal_chunk()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Partial chunks stay buffered until finish(); flushing mid-stream
        // would break the fixed chunk geometry.
        self.inner.flush()
    }
}

/// Read side of the blob stream: validates the header at construction
/// and decrypts chunk frames on demand.
pub struct DecryptingReader<R: Read> {
    inner: R,
    cipher: XChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    counter: u64,
    chunk: Vec<u8>,
    offset: usize,
    eof: bool,
}

impl<R: Read> DecryptingReader<R> {
    /// Wraps `inner`, reading and verifying the blob header.
    ///
    /// Fails with [`VaultError::WrongKey`] when the blob was not
    /// encrypted under `key`.
    pub fn new(mut inner: R, key: &VaultKey) -> VaultResult<Self> {
        let header = BlobHeader::read_from(&mut inner, key)?;

        Ok(Self {
            inner,
            cipher: cipher_for(key),
            nonce_prefix: *header.nonce_prefix(),
            counter: 0,
            chunk: Vec::new(),
            offset: 0,
            eof: false,
        })
    }

    fn next_chunk(&mut self) -> std::io::Result<bool> {
        let mut len_buf = [0u8; 4];

        // A clean EOF is only valid on a frame boundary.
        match self.inner.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let ct_len = u32::from_le_bytes(len_buf) as usize;
        if ct_len < TAG_LEN || ct_len > CHUNK_SIZE + TAG_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid chunk frame length",
            ));
        }

        let mut ct = vec![0u8; ct_len];
        self.inner.read_exact(&mut ct)?;

        self.chunk = self
            .cipher
            .decrypt(&chunk_nonce(&self.nonce_prefix, self.counter), ct.as_slice())
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "chunk decryption failed")
            })?;
        self.counter += 1;
        self.offset = 0;
        Ok(true)
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.offset < self.chunk.len() {
                let n = out.len().min(self.chunk.len() - self.offset);
                out[..n].copy_from_slice(&self.chunk[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            if self.eof || !self.next_chunk()? {
                return Ok(0);
            }
        }
    }
}
