//! Recursive directory copy used by the local backend

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::path_guard;
use crate::error::Result;

/// Copy `src` into `dst`, creating `dst` if it does not exist yet.
///
/// Permission bits are preserved. Symlinks inside `src` are skipped so a copy
/// can never pull in content from outside the source tree, and every
/// destination path is resolved through [`path_guard`] so links already
/// present under `dst` cannot redirect writes out of it. Returns the number
/// of files copied.
pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> Result<u64> {
    std::fs::create_dir_all(dst)?;

    let mut copied = 0;
    let mut dir_modes: Vec<(PathBuf, std::fs::Permissions)> = Vec::new();
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = path_guard::resolve(dst, relative)?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            make_writable(&target)?;
            dir_modes.push((target, entry.metadata()?.permissions()));
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // fs::copy carries the permission bits over
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    // Deepest first, so a read-only directory is sealed after its children
    for (dir, mode) in dir_modes.into_iter().rev() {
        std::fs::set_permissions(&dir, mode)?;
    }

    Ok(copied)
}

/// Open up a directory left read-only by an earlier copy
#[cfg(unix)]
fn make_writable(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(dir)?.permissions();
    if perms.mode() & 0o700 != 0o700 {
        perms.set_mode(perms.mode() | 0o700);
        std::fs::set_permissions(dir, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(_dir: &Path) -> Result<()> {
    Ok(())
}
