//! Persisted credential material and opaque vault flags.
//!
//! One JSON file holds the key derivation salt, the PHC password
//! verifier, and the flags the engines read and write as plain
//! key/value state (migration-in-progress, last recovery attempt).
//! The same PHC hashing produces the verification token embedded in
//! backup manifests.

use std::path::PathBuf;

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};

use crate::crypto::{KdfParams, SALT_LEN, generate_salt};
use crate::error::{VaultError, VaultResult};
use crate::fsutil;

/// Hashes a password into a PHC verifier string.
pub fn hash_password(password: &str) -> VaultResult<String> {
    let mut salt = [0u8; SALT_LEN];
    crate::crypto::secure_random(&mut salt)?;
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| VaultError::Crypto(format!("salt encoding failed: {e}")))?;

    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| VaultError::Crypto(format!("password hashing failed: {e}")))?
        .to_string())
}

/// Checks a candidate password against a PHC verifier string.
pub fn verify_token(token: &str, password: &str) -> VaultResult<()> {
    let parsed = PasswordHash::new(token)
        .map_err(|e| VaultError::Corrupted(format!("malformed password verifier: {e}")))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| VaultError::WrongPassword)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialDoc {
    salt: Option<Vec<u8>>,
    verifier: Option<String>,
    #[serde(default)]
    kdf: KdfParams,
    #[serde(default)]
    migration_in_progress: bool,
    #[serde(default)]
    last_recovery_attempt: Option<i64>,
}

/// File-backed credential store.
pub struct CredentialStore {
    path: PathBuf,
    doc: CredentialDoc,
}

impl CredentialStore {
    pub fn open<P: Into<PathBuf>>(path: P) -> VaultResult<Self> {
        let path = path.into();
        let doc = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            CredentialDoc::default()
        };
        Ok(Self { path, doc })
    }

    pub fn is_initialized(&self) -> bool {
        self.doc.salt.is_some() && self.doc.verifier.is_some()
    }

    /// The key derivation salt, fixed at vault creation.
    pub fn salt(&self) -> Option<[u8; SALT_LEN]> {
        self.doc
            .salt
            .as_deref()
            .and_then(|s| s.try_into().ok())
    }

    /// The stored PHC verifier of the current password. Also serves as
    /// the verification token written into backup manifests.
    pub fn verifier(&self) -> Option<&str> {
        self.doc.verifier.as_deref()
    }

    /// Persists `password` as the current password, creating the salt
    /// on first use.
    pub fn store_password(&mut self, password: &str) -> VaultResult<()> {
        if self.doc.salt.is_none() {
            self.doc.salt = Some(generate_salt()?.to_vec());
        }
        self.doc.verifier = Some(hash_password(password)?);
        self.save()
    }

    /// Verifies a candidate password against the stored verifier.
    pub fn verify(&self, password: &str) -> VaultResult<()> {
        let token = self
            .doc
            .verifier
            .as_deref()
            .ok_or(VaultError::InvalidCredentials)?;
        verify_token(token, password)
    }

    /// Key derivation parameters fixed at vault creation.
    pub fn kdf(&self) -> KdfParams {
        self.doc.kdf
    }

    pub fn set_kdf(&mut self, kdf: KdfParams) -> VaultResult<()> {
        self.doc.kdf = kdf;
        self.save()
    }

    pub fn migration_in_progress(&self) -> bool {
        self.doc.migration_in_progress
    }

    pub fn set_migration_in_progress(&mut self, value: bool) -> VaultResult<()> {
        self.doc.migration_in_progress = value;
        self.save()
    }

    pub fn last_recovery_attempt(&self) -> Option<i64> {
        self.doc.last_recovery_attempt
    }

    pub fn set_last_recovery_attempt(&mut self, epoch_millis: i64) -> VaultResult<()> {
        self.doc.last_recovery_attempt = Some(epoch_millis);
        self.save()
    }

    fn save(&self) -> VaultResult<()> {
        fsutil::atomic_write(&self.path, &serde_json::to_vec_pretty(&self.doc)?)
    }
}
