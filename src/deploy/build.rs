//! Host-side build producing deployable artifacts

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DeployConfig;
use crate::error::{Error, Result};

/// Trailing stderr kept in build failure messages
const STDERR_TAIL_LINES: usize = 20;

/// Ordered shell commands run in the project directory on the host
#[derive(Debug, Clone)]
pub struct LocalBuild {
    commands: Vec<String>,
    timeout: Duration,
}

impl LocalBuild {
    pub fn new(commands: Vec<String>, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(config.build_commands.clone(), config.build_timeout)
    }

    /// Run each command in `work_dir`, stopping at the first failure
    pub async fn run(&self, ctx: &CancellationToken, work_dir: &Path) -> Result<()> {
        for command in &self.commands {
            ensure_program(command)?;
            info!(command = %command, "Running build step");

            let child = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(work_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| Error::Deploy(format!("failed to start `{}`: {}", command, e)))?;

            let output = tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                output = tokio::time::timeout(self.timeout, child.wait_with_output()) => match output {
                    Ok(output) => output?,
                    Err(_) => {
                        return Err(Error::Timeout(format!(
                            "build step exceeded {}s: {}",
                            self.timeout.as_secs(),
                            command
                        )))
                    }
                },
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let lines: Vec<&str> = stderr.lines().collect();
                let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
                return Err(Error::Deploy(format!(
                    "build step `{}` failed (exit {}): {}",
                    command,
                    output.status.code().unwrap_or(-1),
                    tail
                )));
            }
        }

        Ok(())
    }
}

/// Fail early with a clear message when the step's program is not installed
fn ensure_program(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(Error::InvalidInput("empty build command".to_string()));
    }
    // Leading `NAME=value` words set the environment of the step
    let Some(program) = command
        .split_whitespace()
        .find(|word| !is_env_assignment(word))
    else {
        return Ok(());
    };

    // Shell builtins and explicit paths are left to the shell
    if program.contains('/') || matches!(program, "cd" | "export" | "true" | "false" | "test" | "exit") {
        return Ok(());
    }

    which::which(program)
        .map(|_| ())
        .map_err(|_| Error::Deploy(format!("`{}` not found in PATH (needed by `{}`)", program, command)))
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
