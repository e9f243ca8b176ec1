//! Key manager: derivation, the unlocked vault key, and the cached
//! bulk-operation session.

use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};

use zeroize::Zeroizing;

use super::kdf::{KdfParams, derive_key};
use super::stream::{DecryptingReader, EncryptingWriter};
use super::{KEY_LEN, SALT_LEN};
use crate::error::{VaultError, VaultResult};

/// A derived symmetric vault key.
#[derive(Clone)]
pub struct VaultKey(Zeroizing<[u8; KEY_LEN]>);

impl VaultKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

struct SessionState {
    password: Zeroizing<String>,
    key: VaultKey,
}

/// Derives and holds vault keys.
///
/// Two key slots exist: the *current* key (set while the vault is
/// unlocked, used for all encryption) and an optional *cached session*
/// key for bulk operations, which lets `open_decrypt_stream` skip the
/// per-call Argon2 derivation while a restore or re-encryption loops
/// over many entries.
pub struct KeyManager {
    salt: Option<[u8; SALT_LEN]>,
    kdf: KdfParams,
    current: Mutex<Option<VaultKey>>,
    session: Mutex<Option<SessionState>>,
}

impl KeyManager {
    pub fn new(salt: Option<[u8; SALT_LEN]>, kdf: KdfParams) -> Self {
        Self {
            salt,
            kdf,
            current: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    fn lock<'a, T>(slot: &'a Mutex<T>) -> MutexGuard<'a, T> {
        slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Derives the key for `password` from the persisted salt.
    ///
    /// Fails with [`VaultError::InvalidCredentials`] when no salt is
    /// configured yet (first-use state).
    pub fn derive_key(&self, password: &str) -> VaultResult<VaultKey> {
        let salt = self.salt.as_ref().ok_or(VaultError::InvalidCredentials)?;
        Ok(VaultKey::from_bytes(derive_key(password, salt, self.kdf)?))
    }

    /// Unlocks: derives and installs the current key.
    pub fn initialize(&self, password: &str) -> VaultResult<()> {
        let key = self.derive_key(password)?;
        *Self::lock(&self.current) = Some(key);
        Ok(())
    }

    /// Locks: discards the current key.
    pub fn reset(&self) {
        *Self::lock(&self.current) = None;
    }

    pub fn is_unlocked(&self) -> bool {
        Self::lock(&self.current).is_some()
    }

    /// Returns the current (unlocked) key.
    pub fn current_key(&self) -> VaultResult<VaultKey> {
        Self::lock(&self.current)
            .clone()
            .ok_or(VaultError::LockedVault)
    }

    /// Begins a cached key session for a bulk operation.
    ///
    /// The returned guard releases the session on drop, so the cache
    /// cannot outlive the operation even on error paths. Only one
    /// session may be active at a time; a second attempt fails with
    /// [`VaultError::SessionActive`] instead of silently replacing the
    /// cached key under a running loop.
    pub fn begin_cached_session(&self, password: &str) -> VaultResult<CipherSession<'_>> {
        let key = self.derive_key(password)?;
        self.install_session(password, key)
    }

    /// Begins a cached session around an externally derived key, e.g.
    /// one derived from a backup archive's own salt.
    pub fn begin_session_with_key(
        &self,
        password: &str,
        key: VaultKey,
    ) -> VaultResult<CipherSession<'_>> {
        self.install_session(password, key)
    }

    fn install_session(&self, password: &str, key: VaultKey) -> VaultResult<CipherSession<'_>> {
        let mut slot = Self::lock(&self.session);
        if slot.is_some() {
            return Err(VaultError::SessionActive);
        }
        *slot = Some(SessionState {
            password: Zeroizing::new(password.to_owned()),
            key,
        });
        Ok(CipherSession { manager: self })
    }

    /// Resolves the key for `password`: the cached session key when a
    /// session for the same password is active, a fresh derivation
    /// otherwise.
    pub fn resolve_key(&self, password: &str) -> VaultResult<VaultKey> {
        if let Some(session) = Self::lock(&self.session).as_ref() {
            if session.password.as_str() == password {
                return Ok(session.key.clone());
            }
        }
        self.derive_key(password)
    }

    /// Wraps `input` with decryption under the key resolved for
    /// `password`.
    ///
    /// A blob that is not validly encrypted under the resolved key is a
    /// recoverable [`VaultError::WrongKey`], not a panic; batch engines
    /// use that signal to count the entry as unreadable and move on.
    pub fn open_decrypt_stream<R: Read>(
        &self,
        input: R,
        password: &str,
    ) -> VaultResult<DecryptingReader<R>> {
        let key = self.resolve_key(password)?;
        DecryptingReader::new(input, &key)
    }

    /// Wraps `output` with encryption under the current unlocked key.
    pub fn open_encrypt_stream<W: Write>(&self, output: W) -> VaultResult<EncryptingWriter<W>> {
        let key = self.current_key()?;
        EncryptingWriter::new(output, &key)
    }
}

/// Scoped handle for an active cached key session.
///
/// Dropping the handle ends the session; there is no way to leave the
/// cache enabled by forgetting a cleanup call.
pub struct CipherSession<'a> {
    manager: &'a KeyManager,
}

impl Drop for CipherSession<'_> {
    fn drop(&mut self) {
        *KeyManager::lock(&self.manager.session) = None;
    }
}
