//! Content checksum over a project's source files
//!
//! Files under the configured source directories whose extension is
//! allow-listed, plus the root manifest, are sorted by path and their bytes
//! hashed in that order with BLAKE3.

use blake3::Hasher;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};

/// Read buffer for hashing (64 KB)
const CHUNK_SIZE: usize = 64 * 1024;

const SOURCE_DIRS: &[&str] = &["client", "server"];

const EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "json", "css", "html", "py", "sql", "md", "yaml", "yml", "toml",
];

const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    ".git",
    ".next",
    "__pycache__",
    ".venv",
    "target",
    "coverage",
];

const MANIFEST: &str = "package.json";

/// Computes and verifies project checksums
#[derive(Debug, Clone)]
pub struct ChecksumEngine {
    source_dirs: Vec<String>,
    extensions: HashSet<String>,
    excluded_dirs: HashSet<String>,
    manifest: Option<String>,
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        ChecksumEngine {
            source_dirs: SOURCE_DIRS.iter().map(|s| s.to_string()).collect(),
            extensions: EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            excluded_dirs: EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            manifest: Some(MANIFEST.to_string()),
        }
    }
}

impl ChecksumEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the top-level directories that are scanned
    pub fn with_source_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the extension allow-list (without leading dots)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Replace the excluded directory names
    pub fn with_excluded_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Replace or drop the root manifest file
    pub fn with_manifest(mut self, manifest: Option<&str>) -> Self {
        self.manifest = manifest.map(str::to_string);
        self
    }

    /// Hex digest of the project's source files
    pub fn compute(&self, project_root: &Path) -> Result<String> {
        let files = self.collect_files(project_root)?;
        if files.is_empty() {
            return Err(Error::NoFiles(project_root.display().to_string()));
        }

        let mut hasher = Hasher::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        for path in &files {
            let mut reader = BufReader::new(File::open(path)?);
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }

        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Recompute and compare against `expected`
    pub fn verify(&self, project_root: &Path, expected: &str) -> Result<bool> {
        Ok(self.compute(project_root)? == expected)
    }

    /// Sorted list of files that feed the checksum
    pub fn collect_files(&self, project_root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for dir in &self.source_dirs {
            let root = project_root.join(dir);
            if !root.is_dir() {
                continue;
            }

            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| !self.is_excluded(entry));
            for entry in walker {
                let entry = entry?;
                if entry.file_type().is_file() && self.has_allowed_extension(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        }

        if let Some(manifest) = &self.manifest {
            let path = project_root.join(manifest);
            if path.is_file() {
                files.push(path);
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.excluded_dirs.contains(name))
    }

    fn has_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn project() -> TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("client/src")).unwrap();
        std::fs::create_dir_all(root.join("server/node_modules/dep")).unwrap();
        std::fs::write(root.join("client/src/App.tsx"), "export default 1;").unwrap();
        std::fs::write(root.join("server/index.ts"), "console.log('hi');").unwrap();
        std::fs::write(root.join("server/node_modules/dep/index.js"), "x").unwrap();
        std::fs::write(root.join("package.json"), r#"{"name": "app"}"#).unwrap();
        dir
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let dir = project();
        let engine = ChecksumEngine::default();
        let first = engine.compute(dir.path()).unwrap();
        let second = engine.compute(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(engine.verify(dir.path(), &first).unwrap());
    }

    #[test]
    fn test_included_change_alters_checksum() {
        let dir = project();
        let engine = ChecksumEngine::default();
        let before = engine.compute(dir.path()).unwrap();

        std::fs::write(dir.path().join("server/index.ts"), "console.log('bye');").unwrap();
        let after = engine.compute(dir.path()).unwrap();
        assert_ne!(before, after);
        assert!(!engine.verify(dir.path(), &before).unwrap());

        std::fs::write(dir.path().join("package.json"), r#"{"name": "renamed"}"#).unwrap();
        assert_ne!(after, engine.compute(dir.path()).unwrap());
    }

    #[test]
    fn test_excluded_change_keeps_checksum() {
        let dir = project();
        let engine = ChecksumEngine::default();
        let before = engine.compute(dir.path()).unwrap();

        std::fs::write(dir.path().join("server/node_modules/dep/index.js"), "y").unwrap();
        std::fs::create_dir_all(dir.path().join("client/dist")).unwrap();
        std::fs::write(dir.path().join("client/dist/bundle.js"), "built").unwrap();
        std::fs::write(dir.path().join("client/src/logo.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join("README.md"), "outside source dirs").unwrap();

        assert_eq!(before, engine.compute(dir.path()).unwrap());
    }

    #[test]
    fn test_empty_project_has_no_checksum() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("client")).unwrap();
        let err = ChecksumEngine::default().compute(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NoFiles(_)));
    }

    #[test]
    fn test_file_order_is_lexical() {
        let dir = project();
        let files = ChecksumEngine::default().collect_files(dir.path()).unwrap();
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_builders_change_the_file_set() {
        let dir = project();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/main.go"), "package main").unwrap();

        let engine = ChecksumEngine::new()
            .with_source_dirs(["api"])
            .with_extensions([".go"])
            .with_manifest(None);
        let files = engine.collect_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("api/main.go")]);
    }
}
