//! Reading and writing the tar backup container.
//!
//! Blobs cross the container boundary as raw ciphertext; nothing here
//! decrypts. The manifest is always the first entry written, and reads
//! locate it in a dedicated pass before any blob entry is consumed.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::Path;

use chrono::Utc;
use tar::{Archive, Builder, Header};

use crate::backup::{
    AlbumBackup, AlbumPhotoRefBackup, BackupManifest, PhotoBackup, BACKUP_VERSION, META_ENTRY_NAME,
};
use crate::catalog::{Album, AlbumPhotoRef, MediaObject};
use crate::blob::{BlobKind, BlobName};
use crate::credentials::CredentialStore;
use crate::error::{VaultError, VaultResult};
use crate::progress::{CancelToken, ProgressEvent, ProgressSink};
use crate::store::EncryptedBlobStore;

/// Outcome of a backup export.
#[derive(Debug, Default)]
pub struct BackupReport {
    /// Blob entries written into the container.
    pub written: usize,
    /// Blobs a photo record pointed at that were not found on disk.
    pub missing: usize,
    pub cancelled: bool,
}

/// Exports the vault into a tar container at `archive_path`.
///
/// The manifest carries the stored password verifier, salt, and KDF
/// parameters, so restore can pre-check the password and re-derive the
/// archive key without the source vault. The photo slice's order
/// defines `originalSequenceIndex`.
pub fn write_backup(
    archive_path: &Path,
    photos: &[MediaObject],
    albums: &[Album],
    refs: &[AlbumPhotoRef],
    credentials: &CredentialStore,
    store: &EncryptedBlobStore,
    cancel: &CancelToken,
    progress: &ProgressSink,
) -> VaultResult<BackupReport> {
    let manifest = BackupManifest {
        password: credentials
            .verifier()
            .ok_or(VaultError::InvalidCredentials)?
            .to_owned(),
        salt: credentials
            .salt()
            .ok_or(VaultError::InvalidCredentials)?
            .to_vec(),
        kdf: credentials.kdf(),
        photos: photos
            .iter()
            .enumerate()
            .map(|(i, p)| PhotoBackup::from_media(p, i as u32))
            .collect(),
        albums: albums.iter().map(AlbumBackup::from_album).collect(),
        album_photo_refs: refs.iter().map(AlbumPhotoRefBackup::from_ref).collect(),
        created_at: Utc::now().timestamp_millis(),
        backup_version: BACKUP_VERSION,
    };

    let mut builder = Builder::new(BufWriter::new(File::create(archive_path)?));

    let meta = serde_json::to_vec_pretty(&manifest)?;
    append_entry(&mut builder, META_ENTRY_NAME, meta.len() as u64, &meta[..])?;

    let mut report = BackupReport::default();
    let total = photos.len();
    let mut done = 0;

    for photo in photos {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        for kind in blob_kinds_for(photo) {
            let name = BlobName::new(&photo.identifier, kind);
            match store.open_raw(&name) {
                Ok(file) => {
                    let len = file.metadata()?.len();
                    append_entry(&mut builder, &name.to_string(), len, file)?;
                    report.written += 1;
                }
                Err(e) => {
                    log::warn!("backup skips {name}: {e}");
                    report.missing += 1;
                }
            }
        }

        done += 1;
        progress.emit(ProgressEvent::Item { done, total });
    }

    let buffered = builder.into_inner()?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    progress.emit(ProgressEvent::Finished { done, total });
    Ok(report)
}

fn blob_kinds_for(photo: &MediaObject) -> Vec<BlobKind> {
    let mut kinds = vec![BlobKind::Content, BlobKind::Thumbnail];
    if photo.kind.is_video() {
        kinds.push(BlobKind::VideoPreview);
    }
    kinds
}

fn append_entry<W: io::Write, R: Read>(
    builder: &mut Builder<W>,
    name: &str,
    len: u64,
    data: R,
) -> VaultResult<()> {
    let mut header = Header::new_gnu();
    header.set_size(len);
    header.set_mode(0o644);
    header.set_mtime(0);
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

/// Reads only the manifest out of the container.
pub fn read_manifest(archive_path: &Path) -> VaultResult<BackupManifest> {
    let mut archive = open_entries(archive_path)?;
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.path()?.as_ref() == Path::new(META_ENTRY_NAME) {
            return Ok(serde_json::from_reader(entry)?);
        }
    }
    Err(VaultError::Corrupted(format!(
        "backup has no {META_ENTRY_NAME} entry"
    )))
}

/// Opens the container for a fresh front-to-back entry walk.
pub fn open_entries(archive_path: &Path) -> VaultResult<Archive<BufReader<File>>> {
    Ok(Archive::new(BufReader::new(File::open(archive_path)?)))
}

/// The entry's name as a plain string, for blob name parsing.
pub fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> VaultResult<String> {
    Ok(entry
        .path()?
        .to_str()
        .ok_or_else(|| VaultError::Corrupted("non-UTF-8 entry name in backup".into()))?
        .to_owned())
}
