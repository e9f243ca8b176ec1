//! End-to-end flows across backup, restore, and key rotation.

use std::fs;
use std::path::{Path, PathBuf};

use pixlock::{
    CancelToken, KdfParams, MediaKind, ProgressEvent, ProgressSink, Vault, VaultError,
};
use tempfile::tempdir;

fn fast_init(root: &Path, password: &str) -> Vault {
    Vault::init_with_kdf(root, password, KdfParams::new(8, 1, 1).unwrap()).unwrap()
}

fn source_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

#[test]
fn backup_taken_before_rotation_still_restores() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    let photo = source_file(dir.path(), "cat.jpg", b"jpeg bytes");

    let mut vault = fast_init(&root, "first");
    let id = vault.import(&photo).unwrap();

    let archive = dir.path().join("old.tar");
    vault
        .backup(&archive, &CancelToken::new(), &ProgressSink::disabled())
        .unwrap();

    let report = vault
        .change_password(
            "first",
            "second",
            &CancelToken::new(),
            &ProgressSink::disabled(),
        )
        .unwrap();
    assert!(!report.failures_occurred());
    vault.delete(&id).unwrap();
    drop(vault);

    // the backup is sealed with the old password; restoring it into the
    // rotated vault re-encrypts the blobs under the new key
    let mut vault = Vault::open(&root, "second").unwrap();
    let report = vault
        .restore(
            &archive,
            "first",
            &CancelToken::new(),
            &ProgressSink::disabled(),
        )
        .unwrap();
    assert_eq!(report.restored, 2);
    assert_eq!(report.errors, 0);

    let out = dir.path().join("out.jpg");
    vault.export(&id, &out).unwrap();
    assert_eq!(fs::read(&out).unwrap(), b"jpeg bytes");
}

#[test]
fn restore_preserves_original_ordering_across_vaults() {
    let dir = tempdir().unwrap();
    let mut vault = fast_init(&dir.path().join("a"), "pw");

    let mut ids = Vec::new();
    for name in ["one.jpg", "two.png", "three.gif"] {
        let path = source_file(dir.path(), name, name.as_bytes());
        ids.push(vault.import(&path).unwrap());
    }

    let archive = dir.path().join("backup.tar");
    vault
        .backup(&archive, &CancelToken::new(), &ProgressSink::disabled())
        .unwrap();

    let mut other = fast_init(&dir.path().join("b"), "pw2");
    other
        .restore(
            &archive,
            "pw",
            &CancelToken::new(),
            &ProgressSink::disabled(),
        )
        .unwrap();

    let restored_ids: Vec<String> = other
        .list()
        .unwrap()
        .into_iter()
        .map(|m| m.identifier)
        .collect();
    assert_eq!(restored_ids, ids);

    let kinds: Vec<MediaKind> = other.list().unwrap().into_iter().map(|m| m.kind).collect();
    assert_eq!(kinds, [MediaKind::Jpeg, MediaKind::Png, MediaKind::Gif]);
}

#[test]
fn failed_restore_password_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let photo = source_file(dir.path(), "cat.jpg", b"jpeg bytes");

    let mut vault = fast_init(&dir.path().join("a"), "pw");
    vault.import(&photo).unwrap();
    let archive = dir.path().join("backup.tar");
    vault
        .backup(&archive, &CancelToken::new(), &ProgressSink::disabled())
        .unwrap();

    let other_root = dir.path().join("b");
    let mut other = fast_init(&other_root, "pw2");
    let err = other
        .restore(
            &archive,
            "wrong",
            &CancelToken::new(),
            &ProgressSink::disabled(),
        )
        .unwrap_err();
    assert!(matches!(err, VaultError::WrongPassword));

    assert!(other.list().unwrap().is_empty());
    let blob_count = fs::read_dir(other_root.join("files")).unwrap().count();
    assert_eq!(blob_count, 0);
}

#[test]
fn stray_files_in_store_do_not_surface() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    let photo = source_file(dir.path(), "cat.jpg", b"jpeg bytes");

    let mut vault = fast_init(&root, "pw");
    vault.import(&photo).unwrap();

    // an orphaned ciphertext left by an interrupted run
    fs::write(root.join("files").join("deadbeef.pxc"), b"leftover").unwrap();

    assert_eq!(vault.list().unwrap().len(), 1);
    assert!(matches!(
        vault.export(
            "deadbeef",
            &dir.path().join("never.jpg")
        ),
        Err(VaultError::UnknownMedia(_))
    ));
}

#[test]
fn restore_emits_progress_per_blob() {
    let dir = tempdir().unwrap();
    let photo = source_file(dir.path(), "cat.jpg", b"jpeg bytes");

    let mut vault = fast_init(&dir.path().join("a"), "pw");
    vault.import(&photo).unwrap();
    let archive = dir.path().join("backup.tar");
    vault
        .backup(&archive, &CancelToken::new(), &ProgressSink::disabled())
        .unwrap();

    let mut other = fast_init(&dir.path().join("b"), "pw2");
    let (sink, rx) = ProgressSink::channel();
    other
        .restore(&archive, "pw", &CancelToken::new(), &sink)
        .unwrap();
    drop(sink);

    let events: Vec<_> = rx.iter().collect();
    assert_eq!(
        events,
        vec![
            ProgressEvent::Item { done: 1, total: 2 },
            ProgressEvent::Item { done: 2, total: 2 },
            ProgressEvent::Finished { done: 2, total: 2 },
        ]
    );
}

#[test]
fn cancelled_backup_reports_cancellation() {
    let dir = tempdir().unwrap();
    let photo = source_file(dir.path(), "cat.jpg", b"jpeg bytes");

    let mut vault = fast_init(&dir.path().join("vault"), "pw");
    vault.import(&photo).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();

    let report = vault
        .backup(
            &dir.path().join("backup.tar"),
            &cancel,
            &ProgressSink::disabled(),
        )
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.written, 0);
}
