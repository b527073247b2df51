//! Sandbox module - Isolated environments for agent-generated projects
//!
//! Provides two interchangeable backends behind the [`Sandbox`] trait:
//! - Local Mode: host filesystem confined beneath a base directory
//! - Container Mode: long-lived Docker container with layered file sync
//!
//! Every path argument passes through [`path_guard`] before the backend
//! touches a filesystem.

mod container;
mod fs_copy;
mod local;
pub mod path_guard;

pub use container::{ContainerEngine, ContainerOptions, ContainerSandbox};
pub use local::LocalSandbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{SandboxBackend, SandboxConfig};
use crate::error::{Error, Result};

/// Outcome of a command run inside a sandbox.
///
/// A non-zero `exit_code` is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Process exit code (`-1` when killed by a signal)
    pub exit_code: i64,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl ExecResult {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Which backend a sandbox runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    Local,
    Container,
}

impl std::fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxKind::Local => write!(f, "local"),
            SandboxKind::Container => write!(f, "container"),
        }
    }
}

/// Capability contract for an isolated execution environment.
///
/// All paths are relative to the sandbox's current working directory and
/// must stay inside its base directory. Every operation observes `ctx` and
/// returns [`Error::Cancelled`] once it fires.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Backend identifier
    fn kind(&self) -> SandboxKind;

    /// Run a shell command in the current working directory
    async fn exec(&self, ctx: &CancellationToken, command: &str) -> Result<ExecResult>;

    /// Run a shell command, failing with [`Error::Timeout`] past `timeout`
    async fn exec_with_timeout(
        &self,
        ctx: &CancellationToken,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecResult> {
        match tokio::time::timeout(timeout, self.exec(ctx, command)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "command exceeded {}s: {}",
                timeout.as_secs_f64(),
                command
            ))),
        }
    }

    /// Write a file, creating parent directories
    async fn write_file(&self, ctx: &CancellationToken, path: &str, content: &str) -> Result<()>;

    /// Write several files; every path is validated before anything is written
    async fn write_files(
        &self,
        ctx: &CancellationToken,
        files: &HashMap<String, String>,
    ) -> Result<()>;

    /// Read a UTF-8 file
    async fn read_file(&self, ctx: &CancellationToken, path: &str) -> Result<String>;

    /// Delete a single file
    async fn delete_file(&self, ctx: &CancellationToken, path: &str) -> Result<()>;

    /// List entry names of a directory, sorted
    async fn list_directory(&self, ctx: &CancellationToken, path: &str) -> Result<Vec<String>>;

    /// Change the working directory used by subsequent commands
    async fn set_workdir(&self, ctx: &CancellationToken, path: &str) -> Result<()>;

    /// Copy a sandbox subtree onto the host, returning the absolute host path
    async fn export_directory(
        &self,
        ctx: &CancellationToken,
        sandbox_path: &str,
        host_path: &Path,
    ) -> Result<PathBuf>;

    /// Import a host subtree into the sandbox, overwriting existing files
    async fn refresh_from_host(
        &self,
        ctx: &CancellationToken,
        host_path: &Path,
        sandbox_path: &str,
    ) -> Result<()>;

    /// Release backend resources; safe to call more than once
    async fn close(&self) -> Result<()>;
}

/// Drive `fut` to completion unless `ctx` is cancelled first.
pub(crate) async fn cancellable<T, F>(ctx: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Create a sandbox for `project_dir` based on the configuration.
///
/// The container backend needs a connected engine; one engine may be shared
/// by any number of sandboxes.
pub async fn create_sandbox(
    config: &SandboxConfig,
    project_dir: &Path,
    engine: Option<&ContainerEngine>,
) -> Result<Box<dyn Sandbox>> {
    match config.backend {
        SandboxBackend::Local => {
            let sandbox = LocalSandbox::new(project_dir)?;
            Ok(Box::new(sandbox))
        }
        SandboxBackend::Container => {
            let engine = match engine {
                Some(engine) => engine.clone(),
                None => ContainerEngine::connect().await?,
            };
            let options = ContainerOptions::from(&config.container);
            let sandbox = ContainerSandbox::new(engine, options).await?;
            Ok(Box::new(sandbox))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_result() {
        let ok = ExecResult {
            exit_code: 0,
            stdout: "out".to_string(),
            stderr: String::new(),
        };
        assert!(ok.success());
        assert_eq!(ok.combined_output(), "out");

        let failed = ExecResult {
            exit_code: 2,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert!(!failed.success());
        assert_eq!(failed.combined_output(), "out\nerr");
    }

    #[test]
    fn test_sandbox_kind_display() {
        assert_eq!(SandboxKind::Local.to_string(), "local");
        assert_eq!(SandboxKind::Container.to_string(), "container");
    }

    #[tokio::test]
    async fn test_cancellable_short_circuits() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = cancellable(&ctx, async { Ok::<_, Error>(1) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_create_local_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::default();
        let sandbox = create_sandbox(&config, dir.path(), None).await.unwrap();
        assert_eq!(sandbox.kind(), SandboxKind::Local);
        sandbox.close().await.unwrap();
    }
}
