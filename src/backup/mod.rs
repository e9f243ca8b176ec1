//! Backup format V4.
//!
//! A tar container with the following structure:
//!
//! ```text
//! backup.tar
//! ├─ meta.json            manifest (this module)
//! ├─ <id>.pxc             encrypted photo/video
//! ├─ <id>.pxc.tn          encrypted thumbnail
//! ├─ <id>.pxc.vp          encrypted video preview (video only)
//! └─ ...
//! ```
//!
//! The manifest carries a password verification token (checked before
//! any blob is touched), the logical photo/album structure, and
//! `backupVersion`, which must equal 4 for this codec.

pub mod archive;
pub mod restore;

use serde::{Deserialize, Serialize};

use crate::catalog::{Album, AlbumPhotoRef, MediaKind, MediaObject};
use crate::credentials;
use crate::crypto::keys::VaultKey;
use crate::crypto::{KdfParams, SALT_LEN, kdf};
use crate::error::{VaultError, VaultResult};

/// The only backup version this codec processes.
pub const BACKUP_VERSION: u32 = 4;
/// Container entry name of the manifest.
pub const META_ENTRY_NAME: &str = "meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    /// PHC verification token of the password the blobs were encrypted
    /// under.
    pub password: String,
    /// Key derivation salt of the source vault. Restore derives the
    /// archive key from this, not from the target vault's salt.
    pub salt: Vec<u8>,
    pub kdf: KdfParams,
    pub photos: Vec<PhotoBackup>,
    pub albums: Vec<AlbumBackup>,
    pub album_photo_refs: Vec<AlbumPhotoRefBackup>,
    /// Epoch millis of backup creation.
    pub created_at: i64,
    pub backup_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoBackup {
    pub identifier: String,
    pub display_name: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    pub captured_at: Option<i64>,
    /// Position in the vault's original insertion order, independent of
    /// the physical entry order in the container.
    pub original_sequence_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumBackup {
    pub identifier: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumPhotoRefBackup {
    pub album_identifier: String,
    pub photo_identifier: String,
}

impl BackupManifest {
    /// Rejects any manifest whose version this codec does not handle.
    pub fn ensure_supported_version(&self) -> VaultResult<()> {
        if self.backup_version != BACKUP_VERSION {
            return Err(VaultError::UnsupportedVersion(self.backup_version));
        }
        Ok(())
    }

    /// Checks the candidate restore password against the verification
    /// token, before any blob is streamed.
    pub fn verify_password(&self, candidate: &str) -> VaultResult<()> {
        credentials::verify_token(&self.password, candidate)
    }

    /// Derives the key the archive's blobs are sealed under, using the
    /// manifest's own salt and KDF parameters.
    pub fn archive_key(&self, password: &str) -> VaultResult<VaultKey> {
        let salt: [u8; SALT_LEN] = self
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::Corrupted("bad salt length in manifest".into()))?;
        Ok(VaultKey::from_bytes(kdf::derive_key(
            password, &salt, self.kdf,
        )?))
    }

    /// Whether `identifier` belongs to a photo declared in the manifest.
    pub fn declares(&self, identifier: &str) -> bool {
        self.photos.iter().any(|p| p.identifier == identifier)
    }

    /// Photos sorted by their original insertion order.
    pub fn photos_in_original_order(&self) -> Vec<&PhotoBackup> {
        let mut photos: Vec<&PhotoBackup> = self.photos.iter().collect();
        photos.sort_by_key(|p| p.original_sequence_index);
        photos
    }
}

impl PhotoBackup {
    pub fn from_media(media: &MediaObject, original_sequence_index: u32) -> Self {
        Self {
            identifier: media.identifier.clone(),
            display_name: media.display_name.clone(),
            kind: media.kind,
            size_bytes: media.size_bytes,
            captured_at: media.captured_at,
            original_sequence_index,
        }
    }

    /// Materializes the photo record, stamped with the restore time
    /// rather than the original import time.
    pub fn to_media_object(&self, imported_at: i64) -> MediaObject {
        MediaObject {
            identifier: self.identifier.clone(),
            display_name: self.display_name.clone(),
            kind: self.kind,
            size_bytes: self.size_bytes,
            imported_at,
            captured_at: self.captured_at,
        }
    }
}

impl AlbumBackup {
    pub fn from_album(album: &Album) -> Self {
        Self {
            identifier: album.identifier.clone(),
            name: album.name.clone(),
        }
    }

    pub fn to_album(&self) -> Album {
        Album {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
        }
    }
}

impl AlbumPhotoRefBackup {
    pub fn from_ref(link: &AlbumPhotoRef) -> Self {
        Self {
            album_identifier: link.album_identifier.clone(),
            photo_identifier: link.photo_identifier.clone(),
        }
    }

    pub fn to_ref(&self) -> AlbumPhotoRef {
        AlbumPhotoRef {
            album_identifier: self.album_identifier.clone(),
            photo_identifier: self.photo_identifier.clone(),
        }
    }
}
