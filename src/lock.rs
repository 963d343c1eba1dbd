//! Advisory single-writer lock on a catalog root.
//!
//! The lock is an exclusive `flock(2)` on `<root>/.catalog.lock`, taken
//! without blocking. It is released when the [`CatalogLock`] is dropped or the
//! process exits. On non-Unix targets the lock file is created but no lock is
//! held.

use crate::error::FatalError;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = ".catalog.lock";

#[derive(Debug)]
pub struct CatalogLock {
    path: PathBuf,
    _file: File,
}

impl CatalogLock {
    /// Take the lock, failing immediately if another run holds it.
    pub fn acquire(root: &Path) -> Result<Self, FatalError> {
        fs::create_dir_all(root).map_err(|err| FatalError::store(root.display().to_string(), err))?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| FatalError::store(path.display().to_string(), err))?;

        if !try_lock_exclusive(&file).map_err(|err| FatalError::store(path.display().to_string(), err))? {
            return Err(FatalError::Locked {
                root: root.to_path_buf(),
            });
        }
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `Ok(false)` when another descriptor already holds the lock.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_first_is_dropped() {
        let dir = TempDir::new().unwrap();
        let first = CatalogLock::acquire(dir.path()).unwrap();
        assert!(first.path().ends_with(LOCK_FILE));

        let err = CatalogLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, FatalError::Locked { .. }));

        drop(first);
        assert!(CatalogLock::acquire(dir.path()).is_ok());
    }
}
