//! Path containment checks shared by every sandbox backend
//!
//! A user-supplied path is always interpreted relative to a base directory.
//! Absolute paths, `..` segments and symlinks pointing outside the base are
//! rejected before any filesystem operation happens.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Upper bound on symlink hops followed while resolving a path
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `user_path` against `base_dir` on the host filesystem.
///
/// Returns the absolute, symlink-free path. The base directory is
/// canonicalized first, so callers may pass a non-canonical base.
pub fn resolve(base_dir: &Path, user_path: impl AsRef<Path>) -> Result<PathBuf> {
    let user_path = user_path.as_ref();
    let base = std::fs::canonicalize(base_dir).map_err(|e| {
        Error::Sandbox(format!(
            "cannot resolve base directory {}: {}",
            base_dir.display(),
            e
        ))
    })?;

    let cleaned = clean_join(&base, user_path)?;
    let resolved = resolve_symlinks(&cleaned, 0)?;

    if !resolved.starts_with(&base) {
        return Err(Error::PathOutsideBase(user_path.display().to_string()));
    }

    Ok(resolved)
}

/// Lexical-only variant of [`resolve`] for paths that live somewhere the
/// host cannot `stat`, such as inside a container.
pub fn resolve_lexical(base_dir: &Path, user_path: impl AsRef<Path>) -> Result<PathBuf> {
    let base = normalize(base_dir);
    clean_join(&base, user_path.as_ref())
}

/// Join and clean without touching the filesystem.
fn clean_join(base: &Path, user_path: &Path) -> Result<PathBuf> {
    let shown = || user_path.display().to_string();

    if user_path.is_absolute() || user_path.has_root() {
        return Err(Error::AbsolutePathNotAllowed(shown()));
    }

    let mut out = base.to_path_buf();
    for component in user_path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(segment) => out.push(segment),
            Component::ParentDir => return Err(Error::PathOutsideBase(shown())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::AbsolutePathNotAllowed(shown()))
            }
        }
    }

    if !out.starts_with(base) {
        return Err(Error::PathOutsideBase(shown()));
    }

    Ok(out)
}

/// Collapse `.` and `..` in an already-trusted absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve every symlink along `path`.
///
/// The deepest existing ancestor is canonicalized and the non-existent tail
/// re-appended; a tail cannot contain symlinks because it does not exist.
fn resolve_symlinks(path: &Path, hops: usize) -> Result<PathBuf> {
    if hops > MAX_SYMLINK_HOPS {
        return Err(Error::PathOutsideBase(format!(
            "{} (too many levels of symbolic links)",
            path.display()
        )));
    }

    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        match std::fs::symlink_metadata(&existing) {
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Ok(path.to_path_buf()),
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }

    let mut resolved = match std::fs::canonicalize(&existing) {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Dangling link: follow it by hand so its target is still checked.
            let target = std::fs::read_link(&existing)?;
            let joined = if target.is_absolute() {
                target
            } else {
                existing
                    .parent()
                    .map(|p| p.join(&target))
                    .unwrap_or(target)
            };
            resolve_symlinks(&normalize(&joined), hops + 1)?
        }
        Err(e) => return Err(Error::Io(e)),
    };

    for segment in tail.iter().rev() {
        resolved.push(segment);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_plain_relative_path() {
        let dir = tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();

        let resolved = resolve(dir.path(), "a/b.txt").unwrap();
        assert_eq!(resolved, base.join("a").join("b.txt"));
        assert!(resolved.starts_with(&base));
        assert_ne!(resolved, base);
    }

    #[test]
    fn test_rejects_absolute() {
        let dir = tempdir().unwrap();
        let err = resolve(dir.path(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, Error::AbsolutePathNotAllowed(_)));
    }

    #[test]
    fn test_rejects_parent_segments() {
        let dir = tempdir().unwrap();
        for candidate in ["../evil.txt", "a/../../evil", "a/../b", "./.."] {
            let err = resolve(dir.path(), candidate).unwrap_err();
            assert!(
                err.to_string().contains("outside base directory"),
                "{} should be rejected, got {}",
                candidate,
                err
            );
        }
    }

    #[test]
    fn test_current_dir_segments_are_cleaned() {
        let dir = tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(resolve(dir.path(), "./a/./b").unwrap(), base.join("a/b"));
        assert_eq!(resolve(dir.path(), ".").unwrap(), base);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let outside = tempdir().unwrap();
        let dir = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s3cr3t").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        for candidate in ["link", "link/secret.txt", "link/new/file.txt"] {
            let err = resolve(dir.path(), candidate).unwrap_err();
            assert!(matches!(err, Error::PathOutsideBase(_)), "{}", candidate);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_escape_rejected() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink("/nonexistent/appforge/target", dir.path().join("dangling"))
            .unwrap();

        let err = resolve(dir.path(), "dangling").unwrap_err();
        assert!(matches!(err, Error::PathOutsideBase(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_internal_symlink_allowed() {
        let dir = tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(base.join("real"), dir.path().join("alias")).unwrap();

        let resolved = resolve(dir.path(), "alias/file.txt").unwrap();
        assert_eq!(resolved, base.join("real").join("file.txt"));
    }

    #[test]
    fn test_lexical_resolution() {
        let base = Path::new("/workspace");
        assert_eq!(
            resolve_lexical(base, "src/main.ts").unwrap(),
            PathBuf::from("/workspace/src/main.ts")
        );
        assert!(resolve_lexical(base, "../etc").is_err());
        assert!(resolve_lexical(base, "/etc").is_err());
    }
}
