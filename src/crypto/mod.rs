//! Cryptographic primitives for the vault.
//!
//! Provides key derivation, the chunked streaming blob cipher, and the
//! key manager with its cached bulk session.

pub mod kdf;
pub mod keys;
pub mod stream;

pub use kdf::{KdfParams, derive_key};
pub use keys::{CipherSession, KeyManager, VaultKey};
pub use stream::{BlobHeader, DecryptingReader, EncryptingWriter};

/// Length of the key derivation salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the per-blob random nonce prefix (16 bytes).
pub const NONCE_PREFIX_LEN: usize = 16;
/// Length of an XChaCha20-Poly1305 nonce (24 bytes).
pub const NONCE_LEN: usize = 24;
/// Length of the Poly1305 authentication tag (16 bytes).
pub const TAG_LEN: usize = 16;

use crate::error::{VaultError, VaultResult};

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> VaultResult<()> {
    getrandom::fill(buf).map_err(|_| VaultError::Crypto("OS random generator unavailable".into()))
}

/// Generate a key derivation salt
pub fn generate_salt() -> VaultResult<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}
