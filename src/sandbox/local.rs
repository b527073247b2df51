//! Host filesystem sandbox
//!
//! Runs commands and file operations directly on the host, confined to a
//! base directory. This is the least isolated backend but needs nothing
//! beyond a POSIX shell.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::fs_copy::copy_dir_all;
use super::{cancellable, path_guard, ExecResult, Sandbox, SandboxKind};
use crate::error::{Error, Result};

/// Host-backed sandbox rooted at a canonical base directory
pub struct LocalSandbox {
    /// Canonical root all operations are confined to
    base_dir: PathBuf,
    /// Working directory relative to `base_dir`
    workdir: RwLock<PathBuf>,
    closed: AtomicBool,
}

impl LocalSandbox {
    /// Create a sandbox rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir)?;
        let base_dir = std::fs::canonicalize(base_dir)?;

        Ok(LocalSandbox {
            base_dir,
            workdir: RwLock::new(PathBuf::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// The canonical base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Current working directory, relative to the base directory
    pub fn workdir(&self) -> PathBuf {
        self.workdir.read().clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Sandbox("sandbox is closed".to_string()));
        }
        Ok(())
    }

    /// Resolve a caller path against the working directory
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if Path::new(path).is_absolute() {
            return Err(Error::AbsolutePathNotAllowed(path.to_string()));
        }
        let relative = self.workdir.read().join(path);
        path_guard::resolve(&self.base_dir, relative)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Local
    }

    async fn exec(&self, ctx: &CancellationToken, command: &str) -> Result<ExecResult> {
        self.ensure_open()?;
        let working_dir = path_guard::resolve(&self.base_dir, self.workdir())?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Sandbox(format!("Failed to spawn process: {}", e)))?;

        cancellable(ctx, async move {
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| Error::Sandbox(format!("Process error: {}", e)))?;

            Ok(ExecResult {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        })
        .await
    }

    async fn write_file(&self, ctx: &CancellationToken, path: &str, content: &str) -> Result<()> {
        self.ensure_open()?;
        let full_path = self.resolve(path)?;

        cancellable(ctx, async {
            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full_path, content).await?;
            Ok(())
        })
        .await
    }

    async fn write_files(
        &self,
        ctx: &CancellationToken,
        files: &HashMap<String, String>,
    ) -> Result<()> {
        self.ensure_open()?;
        let resolved = files
            .iter()
            .map(|(path, content)| Ok((self.resolve(path)?, content)))
            .collect::<Result<Vec<_>>>()?;

        cancellable(ctx, async {
            for (full_path, content) in resolved {
                if let Some(parent) = full_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full_path, content).await?;
            }
            Ok(())
        })
        .await
    }

    async fn read_file(&self, ctx: &CancellationToken, path: &str) -> Result<String> {
        self.ensure_open()?;
        let full_path = self.resolve(path)?;

        cancellable(ctx, async {
            tokio::fs::read_to_string(&full_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(path.to_string())
                } else {
                    Error::Io(e)
                }
            })
        })
        .await
    }

    async fn delete_file(&self, ctx: &CancellationToken, path: &str) -> Result<()> {
        self.ensure_open()?;
        let full_path = self.resolve(path)?;

        cancellable(ctx, async {
            tokio::fs::remove_file(&full_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(path.to_string())
                } else {
                    Error::Io(e)
                }
            })
        })
        .await
    }

    async fn list_directory(&self, ctx: &CancellationToken, path: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let full_path = self.resolve(path)?;

        cancellable(ctx, async {
            let mut entries = tokio::fs::read_dir(&full_path).await?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn set_workdir(&self, ctx: &CancellationToken, path: &str) -> Result<()> {
        self.ensure_open()?;
        let full_path = self.resolve(path)?;

        let metadata = cancellable(ctx, async {
            tokio::fs::metadata(&full_path)
                .await
                .map_err(|_| Error::NotFound(format!("working directory {}", path)))
        })
        .await?;

        if !metadata.is_dir() {
            return Err(Error::InvalidInput(format!("{} is not a directory", path)));
        }

        let relative = full_path
            .strip_prefix(&self.base_dir)
            .map_err(|_| Error::PathOutsideBase(path.to_string()))?
            .to_path_buf();
        *self.workdir.write() = relative;
        Ok(())
    }

    async fn export_directory(
        &self,
        ctx: &CancellationToken,
        sandbox_path: &str,
        host_path: &Path,
    ) -> Result<PathBuf> {
        self.ensure_open()?;
        let source = self.resolve(sandbox_path)?;
        let target = std::path::absolute(host_path)?;

        let copy_target = target.clone();
        cancellable(ctx, async move {
            tokio::task::spawn_blocking(move || copy_dir_all(&source, &copy_target)).await??;
            Ok(())
        })
        .await?;

        Ok(std::fs::canonicalize(&target)?)
    }

    async fn refresh_from_host(
        &self,
        ctx: &CancellationToken,
        host_path: &Path,
        sandbox_path: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        let target = self.resolve(sandbox_path)?;
        let source = host_path.to_path_buf();

        if !source.is_dir() {
            return Err(Error::NotFound(format!(
                "host directory {}",
                source.display()
            )));
        }

        cancellable(ctx, async move {
            tokio::task::spawn_blocking(move || copy_dir_all(&source, &target)).await??;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
