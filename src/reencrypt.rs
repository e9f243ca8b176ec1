//! Whole-vault key rotation.
//!
//! Credentials switch to the new password up front and the
//! migration-in-progress flag stays set for the whole run, so a crash
//! mid-rotation is detectable on the next open. Each blob is rewritten
//! through a temp file, so a failed item keeps its old ciphertext; the
//! run continues and reports the failed identifiers at the end.

use crate::blob::BlobKind;
use crate::catalog::PhotoRepository;
use crate::credentials::CredentialStore;
use crate::crypto::KeyManager;
use crate::error::VaultResult;
use crate::progress::{CancelToken, ProgressEvent, ProgressSink};
use crate::store::EncryptedBlobStore;

#[derive(Debug, Default)]
pub struct ReencryptReport {
    /// Media objects processed, including failed ones.
    pub processed: usize,
    pub total: usize,
    /// Identifiers with at least one blob still under the old key.
    pub failed: Vec<String>,
    pub cancelled: bool,
}

impl ReencryptReport {
    pub fn failures_occurred(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct ReencryptionEngine<'a, R> {
    keys: &'a KeyManager,
    store: &'a EncryptedBlobStore,
    repo: &'a R,
    credentials: &'a mut CredentialStore,
}

impl<'a, R: PhotoRepository> ReencryptionEngine<'a, R> {
    pub fn new(
        keys: &'a KeyManager,
        store: &'a EncryptedBlobStore,
        repo: &'a R,
        credentials: &'a mut CredentialStore,
    ) -> Self {
        Self {
            keys,
            store,
            repo,
            credentials,
        }
    }

    /// Rotates every stored blob from `old_password` to `new_password`.
    ///
    /// The caller must have verified `old_password` against the stored
    /// credentials beforehand.
    pub fn rotate(
        &mut self,
        old_password: &str,
        new_password: &str,
        cancel: &CancelToken,
        progress: &ProgressSink,
    ) -> VaultResult<ReencryptReport> {
        let items = self.repo.find_all()?;

        self.credentials.set_migration_in_progress(true)?;
        self.credentials.store_password(new_password)?;
        self.keys.initialize(new_password)?;

        let mut report = ReencryptReport {
            total: items.len(),
            ..Default::default()
        };

        {
            let session = self.keys.begin_cached_session(old_password)?;

            for media in &items {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }

                if !self.rotate_item(&media.identifier, media.kind.is_video(), old_password) {
                    report.failed.push(media.identifier.clone());
                }
                report.processed += 1;
                progress.emit(ProgressEvent::Item {
                    done: report.processed,
                    total: report.total,
                });
            }

            drop(session);
        }

        // The flag stays set on a cancelled run; the remaining blobs
        // are still under the old key.
        if !report.cancelled {
            self.credentials.set_migration_in_progress(false)?;
        }

        progress.emit(ProgressEvent::Finished {
            done: report.processed,
            total: report.total,
        });
        Ok(report)
    }

    fn rotate_item(&self, identifier: &str, is_video: bool, old_password: &str) -> bool {
        let mut ok = self
            .store
            .reencrypt_blob(identifier, BlobKind::Content, old_password, self.keys);
        ok &= self
            .store
            .reencrypt_blob(identifier, BlobKind::Thumbnail, old_password, self.keys);
        if is_video {
            ok &= self.store.reencrypt_blob(
                identifier,
                BlobKind::VideoPreview,
                old_password,
                self.keys,
            );
        }
        ok
    }
}
