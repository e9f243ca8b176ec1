//! Restoring a V4 backup into a live vault.
//!
//! Order of operations: manifest first (version gate, password
//! pre-check), then one streaming pass over the blob entries, then the
//! metadata inserts. A blob that fails to decrypt or write is counted
//! and logged, never fatal; entries that do not parse as blob names or
//! that no manifest photo declares are skipped. Metadata is only
//! written after the blob pass, so a wrong password or unsupported
//! version leaves the vault byte-identical.

use std::io;
use std::path::Path;

use chrono::Utc;

use crate::backup::{archive, BackupManifest, META_ENTRY_NAME};
use crate::blob::BlobName;
use crate::catalog::{AlbumRepository, PhotoRepository};
use crate::crypto::KeyManager;
use crate::error::VaultResult;
use crate::progress::{CancelToken, ProgressEvent, ProgressSink};
use crate::store::EncryptedBlobStore;

/// Outcome of a restore run.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Blob entries decrypted and written into the store.
    pub restored: usize,
    /// Blob entries that failed individually.
    pub errors: usize,
    /// Entries ignored: unparseable names or undeclared identifiers.
    pub skipped: usize,
    pub cancelled: bool,
}

/// Merges a backup archive into the vault.
///
/// Blobs are decrypted with the backup password and rewritten under the
/// vault's current key, so a backup taken under an old password
/// restores into a rotated vault cleanly.
pub struct RestoreEngine<'a, R> {
    keys: &'a KeyManager,
    store: &'a EncryptedBlobStore,
    repo: &'a mut R,
}

impl<'a, R: PhotoRepository + AlbumRepository> RestoreEngine<'a, R> {
    pub fn new(keys: &'a KeyManager, store: &'a EncryptedBlobStore, repo: &'a mut R) -> Self {
        Self { keys, store, repo }
    }

    pub fn restore(
        &mut self,
        archive_path: &Path,
        password: &str,
        cancel: &CancelToken,
        progress: &ProgressSink,
    ) -> VaultResult<RestoreReport> {
        let manifest = archive::read_manifest(archive_path)?;
        manifest.ensure_supported_version()?;
        manifest.verify_password(password)?;

        let mut report = RestoreReport::default();
        let total = expected_blob_count(&manifest);
        let mut done = 0;

        {
            // The archive key comes from the manifest's salt, so a
            // backup from another vault (or a pre-rotation one) opens.
            let archive_key = manifest.archive_key(password)?;
            let session = self.keys.begin_session_with_key(password, archive_key)?;

            let mut entries = archive::open_entries(archive_path)?;
            for entry in entries.entries()? {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }

                let mut entry = entry?;
                let name = archive::entry_name(&entry)?;
                if name == META_ENTRY_NAME {
                    continue;
                }

                let blob = match BlobName::parse(&name) {
                    Ok(blob) if manifest.declares(blob.identifier()) => blob,
                    _ => {
                        log::info!("skipping unrecognized backup entry {name}");
                        report.skipped += 1;
                        continue;
                    }
                };

                match self.copy_blob(&mut entry, &blob, password) {
                    Ok(()) => report.restored += 1,
                    Err(e) => {
                        log::error!("failed to restore {name}: {e}");
                        report.errors += 1;
                    }
                }
                done += 1;
                progress.emit(ProgressEvent::Item { done, total });
            }

            drop(session);
        }

        // Cancelled runs keep the blobs already written but insert no
        // metadata; those blobs stay orphaned until a later restore.
        if !report.cancelled {
            let now = Utc::now().timestamp_millis();
            for photo in manifest.photos_in_original_order() {
                self.repo.insert(photo.to_media_object(now))?;
            }
            for album in &manifest.albums {
                self.repo.create_album(album.to_album())?;
            }
            for link in &manifest.album_photo_refs {
                self.repo.link(link.to_ref())?;
            }
        }

        progress.emit(ProgressEvent::Finished { done, total });
        Ok(report)
    }

    fn copy_blob<S: io::Read>(
        &self,
        ciphertext: &mut S,
        blob: &BlobName,
        password: &str,
    ) -> VaultResult<()> {
        let mut reader = self.keys.open_decrypt_stream(ciphertext, password)?;
        let mut writer =
            self.store
                .open_for_write(blob.identifier(), blob.kind(), &self.keys.current_key()?)?;
        io::copy(&mut reader, &mut writer)?;
        writer.finish()?;
        Ok(())
    }
}

fn expected_blob_count(manifest: &BackupManifest) -> usize {
    manifest
        .photos
        .iter()
        .map(|p| if p.kind.is_video() { 3 } else { 2 })
        .sum()
}
