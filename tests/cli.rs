use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn bin() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("pixlock"))
}

// cheap KDF so tests do not burn CPU on Argon2
fn init_vault(vault: &Path, password: &str) {
    bin()
        .env("PIXLOCK_PASSWORD", password)
        .arg("--vault")
        .arg(vault)
        .arg("init")
        .arg("--argon-mem")
        .arg("64")
        .arg("--argon-time")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("vault initialized"));
}

fn import(vault: &Path, password: &str, file: &Path) -> String {
    let output = bin()
        .env("PIXLOCK_PASSWORD", password)
        .arg("--vault")
        .arg(vault)
        .arg("import")
        .arg(file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    String::from_utf8(output)
        .unwrap()
        .split_whitespace()
        .next()
        .unwrap()
        .to_string()
}

#[test]
fn init_creates_vault_files() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");

    init_vault(&vault, "pw");

    assert!(vault.join("credentials.json").exists());
    assert!(vault.join("files").is_dir());
}

#[test]
fn init_twice_fails() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");

    init_vault(&vault, "pw");

    bin()
        .env("PIXLOCK_PASSWORD", "pw")
        .arg("--vault")
        .arg(&vault)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn import_list_export_roundtrip() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");
    let photo = dir.path().join("cat.jpg");
    fs::write(&photo, b"jpeg bytes").unwrap();

    init_vault(&vault, "pw");
    let id = import(&vault, "pw", &photo);

    bin()
        .env("PIXLOCK_PASSWORD", "pw")
        .arg("--vault")
        .arg(&vault)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("cat.jpg").and(predicate::str::contains(&id)));

    let out = dir.path().join("out.jpg");
    bin()
        .env("PIXLOCK_PASSWORD", "pw")
        .arg("--vault")
        .arg(&vault)
        .arg("export")
        .arg(&id)
        .arg(&out)
        .assert()
        .success();

    assert_eq!(fs::read(&out).unwrap(), b"jpeg bytes");

    // nothing in the vault directory contains the plaintext
    for entry in fs::read_dir(vault.join("files")).unwrap() {
        let blob = fs::read(entry.unwrap().path()).unwrap();
        assert!(!blob
            .windows(b"jpeg bytes".len())
            .any(|w| w == b"jpeg bytes"));
    }
}

#[test]
fn cat_writes_plaintext_to_stdout() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");
    let photo = dir.path().join("cat.png");
    fs::write(&photo, b"png payload").unwrap();

    init_vault(&vault, "pw");
    let id = import(&vault, "pw", &photo);

    bin()
        .env("PIXLOCK_PASSWORD", "pw")
        .arg("--vault")
        .arg(&vault)
        .arg("cat")
        .arg(&id)
        .assert()
        .success()
        .stdout(predicate::eq(&b"png payload"[..]));
}

#[test]
fn wrong_password_fails() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");

    init_vault(&vault, "pw");

    bin()
        .env("PIXLOCK_PASSWORD", "wrong")
        .arg("--vault")
        .arg(&vault)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("wrong password"));
}

#[test]
fn actions_fail_without_vault() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("missing");

    bin()
        .env("PIXLOCK_PASSWORD", "pw")
        .arg("--vault")
        .arg(&vault)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn remove_deletes_media() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");
    let photo = dir.path().join("cat.jpg");
    fs::write(&photo, b"jpeg bytes").unwrap();

    init_vault(&vault, "pw");
    let id = import(&vault, "pw", &photo);

    bin()
        .env("PIXLOCK_PASSWORD", "pw")
        .arg("--vault")
        .arg(&vault)
        .arg("remove")
        .arg(&id)
        .assert()
        .success()
        .stdout(predicate::str::contains("removed"));

    bin()
        .env("PIXLOCK_PASSWORD", "pw")
        .arg("--vault")
        .arg(&vault)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("vault is empty"));
}

#[test]
fn backup_and_restore_into_new_vault() {
    let dir = tempdir().unwrap();
    let vault_a = dir.path().join("a");
    let vault_b = dir.path().join("b");
    let photo = dir.path().join("cat.jpg");
    fs::write(&photo, b"jpeg bytes").unwrap();

    init_vault(&vault_a, "pw-a");
    let id = import(&vault_a, "pw-a", &photo);

    let archive = dir.path().join("backup.tar");
    bin()
        .env("PIXLOCK_PASSWORD", "pw-a")
        .arg("--vault")
        .arg(&vault_a)
        .arg("backup")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("backup written"));

    init_vault(&vault_b, "pw-b");
    bin()
        .env("PIXLOCK_PASSWORD", "pw-b")
        .arg("--vault")
        .arg(&vault_b)
        .arg("restore")
        .arg(&archive)
        .arg("--backup-password")
        .arg("pw-a")
        .assert()
        .success()
        .stdout(predicate::str::contains("restored 2 blobs"));

    let out = dir.path().join("restored.jpg");
    bin()
        .env("PIXLOCK_PASSWORD", "pw-b")
        .arg("--vault")
        .arg(&vault_b)
        .arg("export")
        .arg(&id)
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::read(&out).unwrap(), b"jpeg bytes");
}

#[test]
fn restore_with_wrong_backup_password_fails() {
    let dir = tempdir().unwrap();
    let vault_a = dir.path().join("a");
    let vault_b = dir.path().join("b");
    let photo = dir.path().join("cat.jpg");
    fs::write(&photo, b"jpeg bytes").unwrap();

    init_vault(&vault_a, "pw-a");
    import(&vault_a, "pw-a", &photo);

    let archive = dir.path().join("backup.tar");
    bin()
        .env("PIXLOCK_PASSWORD", "pw-a")
        .arg("--vault")
        .arg(&vault_a)
        .arg("backup")
        .arg(&archive)
        .assert()
        .success();

    init_vault(&vault_b, "pw-b");
    bin()
        .env("PIXLOCK_PASSWORD", "pw-b")
        .arg("--vault")
        .arg(&vault_b)
        .arg("restore")
        .arg(&archive)
        .arg("--backup-password")
        .arg("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("wrong password"));

    bin()
        .env("PIXLOCK_PASSWORD", "pw-b")
        .arg("--vault")
        .arg(&vault_b)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("vault is empty"));
}

#[test]
fn change_password_via_stdin() {
    let dir = tempdir().unwrap();
    let vault = dir.path().join("vault");
    let photo = dir.path().join("cat.jpg");
    fs::write(&photo, b"jpeg bytes").unwrap();

    init_vault(&vault, "old");
    let id = import(&vault, "old", &photo);

    // line 1: current password, lines 2+3: new password with confirmation
    bin()
        .arg("--vault")
        .arg(&vault)
        .arg("change-password")
        .write_stdin("old\nnew\nnew\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("password changed"));

    bin()
        .env("PIXLOCK_PASSWORD", "old")
        .arg("--vault")
        .arg(&vault)
        .arg("list")
        .assert()
        .failure();

    let out = dir.path().join("out.jpg");
    bin()
        .env("PIXLOCK_PASSWORD", "new")
        .arg("--vault")
        .arg(&vault)
        .arg("export")
        .arg(&id)
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::read(&out).unwrap(), b"jpeg bytes");
}
