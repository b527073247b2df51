//! Advisory per-project lock
//!
//! Validation and deployment both read and write the project state file.
//! Each takes an exclusive `flock` on `<project>/.appforge.lock` for its whole
//! run; a second run against the same directory fails immediately.

use fs4::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Lock file name inside a project directory
pub const LOCK_FILE_NAME: &str = ".appforge.lock";

/// Held exclusive lock on a project directory.
///
/// The lock is released when the guard is dropped.
pub struct ProjectLock {
    _file: File,
    path: PathBuf,
}

impl fmt::Debug for ProjectLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ProjectLock {
    /// Take the lock without blocking.
    ///
    /// Returns [`Error::ProjectBusy`] when another run holds it.
    pub fn acquire(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(ProjectLock { _file: file, path }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(Error::ProjectBusy(project_dir.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_fails_fast() {
        let dir = tempdir().unwrap();

        let held = ProjectLock::acquire(dir.path()).unwrap();
        assert!(held.path().ends_with(LOCK_FILE_NAME));

        let err = ProjectLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ProjectBusy(_)));

        drop(held);
        assert!(ProjectLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_missing_project_dir_is_io_error() {
        let dir = tempdir().unwrap();
        let err = ProjectLock::acquire(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
