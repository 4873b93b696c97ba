//! A utility module for common file operations.
//!
//! Everything that is published is written to a temporary file in the
//! target directory first, synced and then moved into place, so readers
//! only ever see complete files.

use std::fs::{self, File, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Error, Result};

/// Mode of private key material, markers and state files.
pub const OWNER_ONLY: u32 = 0o600;

/// Mode of files the nameserver needs to read.
pub const PUBLIC_READ: u32 = 0o644;

/// Mode of the key directory.
pub const PRIVATE_DIR: u32 = 0o700;

fn io_error<'a>(what: &str, path: &'a Path) -> impl FnOnce(io::Error) -> Error + 'a {
    let what = what.to_string();
    move |err| Error::from(err).context(&format!("{what} '{}'", path.display()))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Create a directory and its parents, then set its mode.
pub fn create_dir(path: &Path, mode: u32) -> Result<()> {
    fs::create_dir_all(path).map_err(io_error("creating directory", path))?;
    fs::set_permissions(path, Permissions::from_mode(mode))
        .map_err(|err| Error::permission_denied(err).context(&format!(
            "restricting permissions of '{}'",
            path.display()
        )))
}

/// Flush a directory so that renames into it survive a crash.
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|dir| dir.sync_all())
        .map_err(io_error("syncing directory", dir))
}

/// Write `contents` to a synced temporary file next to `path`.
fn write_temp(path: &Path, contents: &[u8], mode: u32) -> Result<NamedTempFile> {
    let dir = parent_dir(path);
    let mut temp =
        NamedTempFile::new_in(dir).map_err(io_error("creating temporary file in", dir))?;
    temp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .map_err(io_error("setting permissions for", temp.path()))?;
    temp.write_all(contents)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(io_error("writing", path))?;
    Ok(temp)
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let temp = write_temp(path, contents, mode)?;
    temp.persist(path)
        .map_err(|err| err.error)
        .map_err(io_error("replacing", path))?;
    sync_dir(parent_dir(path))
}

/// Atomically create `path` with `contents`, failing if it exists.
///
/// A concurrent writer of the same path either wins or gets an error of
/// kind `AlreadyExists`. There is no window in which `path` exists with
/// partial contents.
pub fn write_new_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let temp = write_temp(path, contents, mode)?;
    temp.persist_noclobber(path)
        .map_err(|err| err.error)
        .map_err(io_error("creating", path))?;
    sync_dir(parent_dir(path))
}

/// Make sure a file is only accessible by its owner.
///
/// Group or world bits are removed with a warning. Failing to do so is a
/// [`PermissionDenied`](crate::error::ErrorKind::PermissionDenied) error.
pub fn ensure_owner_only(path: &Path) -> Result<()> {
    let mode = fs::metadata(path)
        .map_err(io_error("reading metadata of", path))?
        .permissions()
        .mode()
        & 0o777;
    if mode & 0o077 != 0 {
        warn!(
            "'{}' is accessible by others (mode {mode:o}), restricting it to {OWNER_ONLY:o}",
            path.display()
        );
        fs::set_permissions(path, Permissions::from_mode(OWNER_ONLY)).map_err(|err| {
            Error::permission_denied(err)
                .context(&format!("restricting permissions of '{}'", path.display()))
        })?;
    }
    Ok(())
}

/// Read a secret file, tightening its permissions first.
pub fn read_owner_only(path: &Path) -> Result<String> {
    ensure_owner_only(path)?;
    fs::read_to_string(path).map_err(io_error("reading", path))
}

#[cfg(test)]
mod tests {
    use std::fs::{self, Permissions};
    use std::os::unix::fs::PermissionsExt;

    use crate::error::ErrorKind;

    use super::*;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn atomic_writes_set_the_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        write_atomic(&path, b"one", OWNER_ONLY).unwrap();
        assert_eq!(mode(&path), 0o600);
        write_atomic(&path, b"two", PUBLIC_READ).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(mode(&path), 0o644);
    }

    #[test]
    fn new_files_are_never_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");
        write_new_atomic(&path, b"first", OWNER_ONLY).unwrap();
        let err = write_new_atomic(&path, b"second", OWNER_ONLY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        // No temporary files are left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn secrets_are_tightened_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        fs::write(&path, "key").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();
        assert_eq!(read_owner_only(&path).unwrap(), "key");
        assert_eq!(mode(&path), 0o600);
    }
}
