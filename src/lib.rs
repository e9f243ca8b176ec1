//! pixlock: an encrypted media vault with password-sealed backups.
//!
//! Every media object lives as individually encrypted blobs (content,
//! thumbnail, video preview) in a flat directory, keyed by a password
//! through Argon2id. Backups are tar containers carrying the raw
//! ciphertext plus a manifest; restore and key rotation run as
//! partial-failure-tolerant batches with progress and cancellation.

pub mod backup;
pub mod blob;
pub mod catalog;
pub mod credentials;
pub mod crypto;
pub mod error;
mod fsutil;
pub mod media_source;
pub mod progress;
pub mod reencrypt;
pub mod store;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use directories::ProjectDirs;
use uuid::Uuid;

pub use crate::backup::archive::BackupReport;
pub use crate::backup::restore::{RestoreEngine, RestoreReport};
pub use crate::blob::{BlobKind, BlobName};
pub use crate::catalog::{Album, AlbumPhotoRef, Catalog, MediaKind, MediaObject, PhotoRepository};
pub use crate::credentials::CredentialStore;
pub use crate::crypto::{KdfParams, KeyManager};
pub use crate::error::{VaultError, VaultResult};
pub use crate::media_source::SeekableDecryptingSource;
pub use crate::progress::{CancelToken, ProgressEvent, ProgressSink};
pub use crate::reencrypt::{ReencryptReport, ReencryptionEngine};
pub use crate::store::EncryptedBlobStore;

const CREDENTIALS_FILE: &str = "credentials.json";
const CATALOG_FILE: &str = "catalog.json";
const FILES_DIR: &str = "files";

/// An opened vault: unlocked key manager, blob store, catalog and
/// credentials rooted in one directory.
pub struct Vault {
    keys: KeyManager,
    store: EncryptedBlobStore,
    catalog: Catalog,
    credentials: CredentialStore,
}

impl Vault {
    /// Creates a new vault at `root` and unlocks it.
    pub fn init(root: &Path, password: &str) -> VaultResult<Self> {
        Self::init_with_kdf(root, password, KdfParams::default())
    }

    pub fn init_with_kdf(root: &Path, password: &str, kdf: KdfParams) -> VaultResult<Self> {
        let mut credentials = CredentialStore::open(root.join(CREDENTIALS_FILE))?;
        if credentials.is_initialized() {
            return Err(VaultError::AlreadyExists(root.display().to_string()));
        }

        fs::create_dir_all(root.join(FILES_DIR))?;
        credentials.set_kdf(kdf)?;
        credentials.store_password(password)?;

        Self::unlock(root, password, credentials)
    }

    /// Opens an existing vault, verifying `password` before deriving
    /// the key.
    pub fn open(root: &Path, password: &str) -> VaultResult<Self> {
        let credentials = CredentialStore::open(root.join(CREDENTIALS_FILE))?;
        if !credentials.is_initialized() {
            return Err(VaultError::NotFound(root.display().to_string()));
        }
        credentials.verify(password)?;

        if credentials.migration_in_progress() {
            log::warn!("a password change did not finish; some media may still be under the old password");
        }

        Self::unlock(root, password, credentials)
    }

    fn unlock(root: &Path, password: &str, credentials: CredentialStore) -> VaultResult<Self> {
        let keys = KeyManager::new(credentials.salt(), credentials.kdf());
        keys.initialize(password)?;

        Ok(Self {
            keys,
            store: EncryptedBlobStore::new(root.join(FILES_DIR)),
            catalog: Catalog::open(root.join(CATALOG_FILE))?,
            credentials,
        })
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn list(&self) -> VaultResult<Vec<MediaObject>> {
        self.catalog.find_all()
    }

    /// Encrypts a media file into the vault and records it in the
    /// catalog. Returns the new object's identifier.
    pub fn import(&mut self, source: &Path) -> VaultResult<String> {
        let kind = source
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaKind::from_extension)
            .ok_or_else(|| VaultError::UnknownMedia(source.display().to_string()))?;
        let display_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| VaultError::UnknownMedia(source.display().to_string()))?
            .to_owned();

        let identifier = Uuid::new_v4().to_string();
        let key = self.keys.current_key()?;
        let size_bytes = fs::metadata(source)?.len();

        let mut kinds = vec![BlobKind::Content, BlobKind::Thumbnail];
        if kind.is_video() {
            kinds.push(BlobKind::VideoPreview);
        }
        // Thumbnail and preview generation needs a media pipeline; until
        // then the full content stands in, so every object carries the
        // complete blob set that backup and rotation expect.
        for blob_kind in kinds {
            let mut reader = BufReader::new(File::open(source)?);
            let mut writer = self.store.open_for_write(&identifier, blob_kind, &key)?;
            std::io::copy(&mut reader, &mut writer)?;
            writer.finish()?;
        }

        self.catalog.insert(MediaObject {
            identifier: identifier.clone(),
            display_name,
            kind,
            size_bytes,
            imported_at: Utc::now().timestamp_millis(),
            captured_at: None,
        })?;
        Ok(identifier)
    }

    /// Decrypts an object's content into `dest`.
    pub fn export(&self, identifier: &str, dest: &Path) -> VaultResult<()> {
        self.require_known(identifier)?;
        let key = self.keys.current_key()?;
        let mut reader = self.store.open_for_read(identifier, BlobKind::Content, &key)?;
        let mut writer = BufWriter::new(File::create(dest)?);
        std::io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Decrypts an object's content to a writer.
    pub fn export_to<W: Write>(&self, identifier: &str, mut dest: W) -> VaultResult<()> {
        self.require_known(identifier)?;
        let key = self.keys.current_key()?;
        let mut reader = self.store.open_for_read(identifier, BlobKind::Content, &key)?;
        std::io::copy(&mut reader, &mut dest)?;
        Ok(())
    }

    /// Opens an object's content for random access, e.g. for playback.
    pub fn open_media(&self, identifier: &str) -> VaultResult<SeekableDecryptingSource<File>> {
        self.require_known(identifier)?;
        let key = self.keys.current_key()?;
        let file = self
            .store
            .open_raw(&BlobName::new(identifier, BlobKind::Content))?;
        SeekableDecryptingSource::new(file, &key)
    }

    /// Deletes an object's blobs and catalog record.
    pub fn delete(&mut self, identifier: &str) -> VaultResult<()> {
        let media = self
            .catalog
            .find(identifier)
            .ok_or_else(|| VaultError::UnknownMedia(identifier.to_owned()))?
            .clone();

        self.store.delete(identifier, BlobKind::Content)?;
        // Secondary blobs may be absent; the record goes regardless.
        let _ = self.store.delete(identifier, BlobKind::Thumbnail);
        if media.kind.is_video() {
            let _ = self.store.delete(identifier, BlobKind::VideoPreview);
        }
        self.catalog.delete(identifier)
    }

    /// Exports the whole vault into a backup archive at `dest`.
    pub fn backup(
        &self,
        dest: &Path,
        cancel: &CancelToken,
        progress: &ProgressSink,
    ) -> VaultResult<BackupReport> {
        backup::archive::write_backup(
            dest,
            &self.catalog.find_all()?,
            self.catalog.albums(),
            self.catalog.album_refs(),
            &self.credentials,
            &self.store,
            cancel,
            progress,
        )
    }

    /// Merges a backup archive into this vault.
    pub fn restore(
        &mut self,
        archive_path: &Path,
        password: &str,
        cancel: &CancelToken,
        progress: &ProgressSink,
    ) -> VaultResult<RestoreReport> {
        RestoreEngine::new(&self.keys, &self.store, &mut self.catalog).restore(
            archive_path,
            password,
            cancel,
            progress,
        )
    }

    /// Rotates the vault password, re-encrypting every stored blob.
    pub fn change_password(
        &mut self,
        old_password: &str,
        new_password: &str,
        cancel: &CancelToken,
        progress: &ProgressSink,
    ) -> VaultResult<ReencryptReport> {
        self.credentials.verify(old_password)?;
        ReencryptionEngine::new(&self.keys, &self.store, &self.catalog, &mut self.credentials)
            .rotate(old_password, new_password, cancel, progress)
    }

    fn require_known(&self, identifier: &str) -> VaultResult<()> {
        if self.catalog.find(identifier).is_none() {
            return Err(VaultError::UnknownMedia(identifier.to_owned()));
        }
        Ok(())
    }
}

/// The platform default vault directory.
pub fn default_vault_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "pixlock")
        .context("could not determine platform directories")?;
    Ok(dirs.data_dir().to_path_buf())
}
