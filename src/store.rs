//! Encrypted blob store: one directory of individually encrypted files,
//! addressed by `(identifier, kind)`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::blob::{BlobKind, BlobName};
use crate::crypto::stream::{DecryptingReader, EncryptingWriter};
use crate::crypto::{KeyManager, VaultKey};
use crate::error::VaultResult;
use crate::fsutil;

/// Maps blob names to encrypted files inside the vault and opens
/// encrypting/decrypting streams against them.
pub struct EncryptedBlobStore {
    root: PathBuf,
}

impl EncryptedBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Internal location of a blob.
    pub fn path_for(&self, name: &BlobName) -> PathBuf {
        self.root.join(name.to_string())
    }

    pub fn exists(&self, identifier: &str, kind: BlobKind) -> bool {
        self.path_for(&BlobName::new(identifier, kind)).exists()
    }

    /// Opens the raw ciphertext file, without decryption. Backup export
    /// copies blobs verbatim through this.
    pub fn open_raw(&self, name: &BlobName) -> VaultResult<File> {
        Ok(File::open(self.path_for(name))?)
    }

    /// Opens an encrypting sink for the blob under `key`.
    pub fn open_for_write(
        &self,
        identifier: &str,
        kind: BlobKind,
        key: &VaultKey,
    ) -> VaultResult<EncryptingWriter<BufWriter<File>>> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(&BlobName::new(identifier, kind));
        let file = File::create(path)?;
        EncryptingWriter::new(BufWriter::new(file), key)
    }

    /// Opens a decrypting source over the blob under `key`.
    pub fn open_for_read(
        &self,
        identifier: &str,
        kind: BlobKind,
        key: &VaultKey,
    ) -> VaultResult<DecryptingReader<BufReader<File>>> {
        let path = self.path_for(&BlobName::new(identifier, kind));
        let file = File::open(path)?;
        DecryptingReader::new(BufReader::new(file), key)
    }

    pub fn delete(&self, identifier: &str, kind: BlobKind) -> VaultResult<()> {
        fs::remove_file(self.path_for(&BlobName::new(identifier, kind)))?;
        Ok(())
    }

    /// Re-encrypts one blob from the old password's key to the key
    /// manager's current key.
    ///
    /// The new ciphertext goes to a temp file and only replaces the
    /// stored blob once fully written, so the original stays readable
    /// when the operation fails partway. Returns whether the blob was
    /// replaced; failures are logged, not raised, so batch callers can
    /// aggregate them.
    pub fn reencrypt_blob(
        &self,
        identifier: &str,
        kind: BlobKind,
        old_password: &str,
        keys: &KeyManager,
    ) -> bool {
        let name = BlobName::new(identifier, kind);
        let target = self.path_for(&name);

        let tmp = match fsutil::random_sibling_tmp(&target) {
            Ok(tmp) => tmp,
            Err(e) => {
                log::warn!("re-encrypt of {name} failed: {e}");
                return false;
            }
        };

        match self.reencrypt_into(&target, &tmp, old_password, keys) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("re-encrypt of {name} failed: {e}");
                let _ = fs::remove_file(&tmp);
                false
            }
        }
    }

    fn reencrypt_into(
        &self,
        target: &Path,
        tmp: &Path,
        old_password: &str,
        keys: &KeyManager,
    ) -> VaultResult<()> {
        let old_key = keys.resolve_key(old_password)?;
        let new_key = keys.current_key()?;

        let mut reader = DecryptingReader::new(BufReader::new(File::open(target)?), &old_key)?;
        let mut writer = EncryptingWriter::new(BufWriter::new(fsutil::create_tmp(tmp)?), &new_key)?;

        io::copy(&mut reader, &mut writer)?;

        let buffered = writer.finish()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        fsutil::atomic_replace(tmp, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    fn test_keys(salt: u8) -> KeyManager {
        KeyManager::new(Some([salt; 16]), KdfParams::new(8, 1, 1).unwrap())
    }

    fn write_blob(store: &EncryptedBlobStore, key: &VaultKey, id: &str, data: &[u8]) {
        let mut w = store.open_for_write(id, BlobKind::Content, key).unwrap();
        w.write_all(data).unwrap();
        w.finish().unwrap();
    }

    fn read_blob(store: &EncryptedBlobStore, key: &VaultKey, id: &str) -> VaultResult<Vec<u8>> {
        let mut r = store.open_for_read(id, BlobKind::Content, key)?;
        let mut out = Vec::new();
        r.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("files"));
        let keys = test_keys(1);
        keys.initialize("pw").unwrap();
        let key = keys.current_key().unwrap();

        write_blob(&store, &key, "abc", b"media bytes");
        assert_eq!(read_blob(&store, &key, "abc").unwrap(), b"media bytes");
        assert!(store.exists("abc", BlobKind::Content));
        assert!(!store.exists("abc", BlobKind::Thumbnail));
    }

    #[test]
    fn reencrypt_switches_keys() {
        let dir = tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("files"));
        let keys = test_keys(1);

        keys.initialize("old").unwrap();
        let old_key = keys.current_key().unwrap();
        write_blob(&store, &old_key, "abc", b"payload");

        // rotate: new password becomes current
        keys.initialize("new").unwrap();
        assert!(store.reencrypt_blob("abc", BlobKind::Content, "old", &keys));

        let new_key = keys.current_key().unwrap();
        assert_eq!(read_blob(&store, &new_key, "abc").unwrap(), b"payload");

        // the old key must no longer open the blob
        let old_key = keys.resolve_key("old").unwrap();
        assert!(read_blob(&store, &old_key, "abc").is_err());
    }

    #[test]
    fn reencrypt_with_wrong_old_password_keeps_original() {
        let dir = tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("files"));
        let keys = test_keys(1);

        keys.initialize("old").unwrap();
        let old_key = keys.current_key().unwrap();
        write_blob(&store, &old_key, "abc", b"payload");

        keys.initialize("new").unwrap();
        assert!(!store.reencrypt_blob("abc", BlobKind::Content, "bogus", &keys));

        // original untouched and still readable under the old key
        let old_key = keys.resolve_key("old").unwrap();
        assert_eq!(read_blob(&store, &old_key, "abc").unwrap(), b"payload");
    }

    #[test]
    fn reencrypt_missing_blob_reports_failure() {
        let dir = tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("files"));
        let keys = test_keys(1);
        keys.initialize("pw").unwrap();

        assert!(!store.reencrypt_blob("missing", BlobKind::Content, "pw", &keys));
    }
}
