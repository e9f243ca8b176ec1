//! Crash-safe file replacement helpers.
//!
//! A writer targets a random sibling temp file, syncs it, and atomically
//! replaces the destination. A crash leaves either the old or the new
//! file, never a partial one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::crypto::secure_random;
use crate::error::{VaultError, VaultResult};

/// Returns a unique temp path next to `target`.
///
/// Same directory so the later rename stays on one filesystem; random
/// suffix so concurrent writers cannot collide.
pub fn random_sibling_tmp(target: &Path) -> VaultResult<PathBuf> {
    let mut buf = [0u8; 8]; // 64 bit entropy
    secure_random(&mut buf)?;

    let rand_string = buf.iter().map(|b| format!("{:02x}", b)).collect::<String>();

    let file_name = target
        .file_name()
        .ok_or_else(|| VaultError::Corrupted(format!("not a file path: {}", target.display())))?
        .to_string_lossy()
        .into_owned();

    Ok(target.with_file_name(format!("{file_name}.tmp.{rand_string}")))
}

/// Opens a fresh temp file for exclusive writing (fails if it exists).
pub fn create_tmp(tmp_path: &Path) -> VaultResult<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)?)
}

/// Atomically replaces `target` with `tmp_path` and syncs the parent
/// directory so the rename itself is persisted.
pub fn atomic_replace(tmp_path: &Path, target: &Path) -> VaultResult<()> {
    replace_file(tmp_path, target)?;

    if let Some(parent) = target.parent() {
        let dir = File::open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}

/// Writes `data` to `path` crash-safely, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = random_sibling_tmp(path)?;
    let mut tmp_file = create_tmp(&tmp_path)?;

    let written = tmp_file
        .write_all(data)
        .and_then(|()| tmp_file.sync_all());
    drop(tmp_file);

    if let Err(e) = written.map_err(VaultError::from).and_then(|()| atomic_replace(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    Ok(())
}

/// Uses the Windows `ReplaceFileW` API with `REPLACEFILE_WRITE_THROUGH`
/// so the replacement is truly atomic and persisted.
#[cfg(target_os = "windows")]
fn replace_file(tmp_path: &Path, target: &Path) -> VaultResult<()> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

    fn to_wide(s: &OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    // ReplaceFileW fails when the target does not exist yet; fall back
    // to a plain rename for first writes.
    if !target.exists() {
        fs::rename(tmp_path, target)?;
        return Ok(());
    }

    let target_w = to_wide(target.as_os_str());
    let tmp_w = to_wide(tmp_path.as_os_str());

    // SAFETY:
    // - Strings are valid UTF-16 and null-terminated
    // - Pointers remain valid during the call
    // - Windows does not retain the pointers after return
    let result = unsafe {
        ReplaceFileW(
            target_w.as_ptr(),
            tmp_w.as_ptr(),
            std::ptr::null(),
            REPLACEFILE_WRITE_THROUGH,
            std::ptr::null(),
            std::ptr::null(),
        )
    };

    if result == 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(())
}

/// On Unix, `rename()` is atomic when both paths are on the same
/// filesystem.
#[cfg(not(target_os = "windows"))]
fn replace_file(tmp_path: &Path, target: &Path) -> VaultResult<()> {
    fs::rename(tmp_path, target)?;
    Ok(())
}
