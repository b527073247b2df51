//! Docker container-based sandbox
//!
//! A single long-lived container per sandbox. Commands run through
//! `docker exec`, files move in and out as tar archives, and `fork` commits
//! the container's filesystem to an image that seeds a new container.
//!
//! # Fork semantics
//!
//! A fork starts from a snapshot of the parent's filesystem. The two then
//! diverge: writes made in the fork are never visible in the parent, and
//! writes made in the parent after the fork are never visible in the fork.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, CreateImageOptions, RemoveImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{cancellable, path_guard, ExecResult, Sandbox, SandboxKind};
use crate::config::ContainerConfig;
use crate::error::{Error, Result};

const DEFAULT_IMAGE: &str = "node:20-alpine";
const DEFAULT_WORKDIR: &str = "/workspace";
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Prints the deepest existing ancestor of `$1` and its fully resolved form.
const RESOLVE_SCRIPT: &str = r#"p="$1"
while [ ! -e "$p" ] && [ ! -L "$p" ]; do p=$(dirname "$p"); done
printf '%s\n' "$p"
readlink -f "$p""#;

/// Prints the resolved target of every symlink under `$1`, or `/` when a
/// target cannot be resolved.
const LINKS_SCRIPT: &str = r#"find "$1" -type l 2>/dev/null | while read -r l; do
  readlink -f "$l" || echo /
done"#;

/// Records its PID in `$0`, then runs `$1` as a child shell.
const RUN_SCRIPT: &str = r#"{ echo $$ > "$0"; } 2>/dev/null
sh -c "$1"
status=$?
rm -f "$0"
exit $status"#;

/// Kills the process tree whose root PID is stored in `$0`.
const KILL_SCRIPT: &str = r#"kill_tree() {
  children=$(cat /proc/"$1"/task/*/children 2>/dev/null || pgrep -P "$1")
  for child in $children; do kill_tree "$child"; done
  kill -9 "$1" 2>/dev/null
}
pid=$(cat "$0" 2>/dev/null) && [ -n "$pid" ] && kill_tree "$pid"
rm -f "$0""#;

/// Shared handle to the Docker engine.
///
/// Cloning is cheap; clone one engine into every sandbox instead of
/// reconnecting.
#[derive(Clone)]
pub struct ContainerEngine {
    docker: Docker,
}

impl ContainerEngine {
    /// Connect to the Docker daemon.
    ///
    /// Tries these locations in order:
    /// 1. `DOCKER_HOST` env var (bollard default)
    /// 2. `/var/run/docker.sock` (Linux default)
    /// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
    pub async fn connect() -> Result<Self> {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            if docker.ping().await.is_ok() {
                return Ok(Self { docker });
            }
        }

        if let Some(home) = dirs::home_dir() {
            let desktop_sock = home.join(".docker/run/docker.sock");
            if desktop_sock.exists() {
                let sock_str = desktop_sock.to_string_lossy();
                if let Ok(docker) =
                    Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
                {
                    if docker.ping().await.is_ok() {
                        return Ok(Self { docker });
                    }
                }
            }
        }

        Err(Error::Container(
            "Docker daemon not reachable (checked DOCKER_HOST and default sockets)".to_string(),
        ))
    }

    /// Pull `image` unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(Error::Container(format!(
                    "Failed to pull image {}: {}",
                    image, e
                )));
            }
        }

        Ok(())
    }

    /// Create and start an idle container from `image`
    async fn start_container(&self, image: &str, options: &ContainerOptions) -> Result<String> {
        let host_config = HostConfig {
            memory: options.memory_bytes,
            nano_cpus: options.nano_cpus,
            network_mode: Some(options.network.clone()),
            cap_drop: Some(vec!["ALL".to_string()]),
            cap_add: Some(vec![
                "CHOWN".to_string(),
                "SETUID".to_string(),
                "SETGID".to_string(),
                "DAC_OVERRIDE".to_string(),
            ]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            working_dir: Some(options.workdir.clone()),
            labels: Some(HashMap::from([(
                "appforge.sandbox".to_string(),
                "true".to_string(),
            )])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: format!("appforge-sandbox-{}", uuid::Uuid::new_v4()),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.remove_container(&response.id).await;
            return Err(Error::Container(format!("Failed to start container: {}", e)));
        }

        Ok(response.id)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::Container(format!(
                "Failed to remove container: {}",
                e
            ))),
        }
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_image(image, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::Container(format!("Failed to remove image: {}", e))),
        }
    }
}

/// Settings for provisioning a container sandbox
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Base image
    pub image: String,
    /// In-container base directory
    pub workdir: String,
    /// Bound applied to `exec`
    pub exec_timeout: Duration,
    /// Docker network mode
    pub network: String,
    /// Memory limit in bytes
    pub memory_bytes: Option<i64>,
    /// CPU quota in units of 1e-9 CPUs
    pub nano_cpus: Option<i64>,
    /// Variables applied to every exec
    pub env: HashMap<String, String>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        ContainerOptions {
            image: DEFAULT_IMAGE.to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            network: "bridge".to_string(),
            memory_bytes: None,
            nano_cpus: None,
            env: HashMap::new(),
        }
    }
}

impl ContainerOptions {
    /// Options with a specific image and the default everything else
    pub fn with_image(image: impl Into<String>) -> Self {
        ContainerOptions {
            image: image.into(),
            ..Default::default()
        }
    }
}

impl From<&ContainerConfig> for ContainerOptions {
    fn from(config: &ContainerConfig) -> Self {
        let image = if config.image.trim().is_empty() {
            DEFAULT_IMAGE.to_string()
        } else {
            config.image.clone()
        };
        let workdir = if config.workdir.trim().is_empty() {
            DEFAULT_WORKDIR.to_string()
        } else {
            config.workdir.clone()
        };
        let exec_timeout = if config.exec_timeout.is_zero() {
            DEFAULT_EXEC_TIMEOUT
        } else {
            config.exec_timeout
        };

        ContainerOptions {
            image,
            workdir,
            exec_timeout,
            network: config.network.clone(),
            memory_bytes: parse_memory_limit(&config.memory_limit),
            nano_cpus: (config.cpu_limit > 0.0)
                .then(|| (config.cpu_limit * 1_000_000_000.0) as i64),
            env: config.env.clone(),
        }
    }
}

/// Sandbox backed by a running Docker container
pub struct ContainerSandbox {
    engine: ContainerEngine,
    container_id: String,
    options: ContainerOptions,
    /// Image committed by `fork`, removed together with the container
    owned_image: Option<String>,
    /// Working directory relative to `options.workdir`
    workdir: RwLock<PathBuf>,
    env: RwLock<HashMap<String, String>>,
    closed: AtomicBool,
}

impl ContainerSandbox {
    /// Provision a new container from `options.image`
    pub async fn new(engine: ContainerEngine, options: ContainerOptions) -> Result<Self> {
        engine.ensure_image(&options.image).await?;
        let container_id = engine.start_container(&options.image, &options).await?;
        let env = options.env.clone();

        Ok(ContainerSandbox {
            engine,
            container_id,
            options,
            owned_image: None,
            workdir: RwLock::new(PathBuf::new()),
            env: RwLock::new(env),
            closed: AtomicBool::new(false),
        })
    }

    /// Docker container ID
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Set one environment variable for subsequent commands
    pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.env.write().insert(key.into(), value.into());
    }

    /// Set several environment variables for subsequent commands
    pub fn with_envs<I, K, V>(&self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = self.env.write();
        for (key, value) in vars {
            env.insert(key.into(), value.into());
        }
    }

    /// Branch a new, independent sandbox from the current filesystem state.
    ///
    /// Writes to the fork never propagate back to this sandbox.
    pub async fn fork(&self) -> Result<ContainerSandbox> {
        self.ensure_open()?;

        let repo = format!("appforge-fork-{}", uuid::Uuid::new_v4().simple());
        let commit = CommitContainerOptions {
            container: self.container_id.clone(),
            repo: repo.clone(),
            tag: "latest".to_string(),
            pause: true,
            ..Default::default()
        };
        self.engine
            .docker
            .commit_container(commit, Config::<String>::default())
            .await
            .map_err(|e| Error::Container(format!("Failed to snapshot container: {}", e)))?;

        let image = format!("{}:latest", repo);
        let container_id = match self.engine.start_container(&image, &self.options).await {
            Ok(id) => id,
            Err(e) => {
                let _ = self.engine.remove_image(&image).await;
                return Err(e);
            }
        };

        Ok(ContainerSandbox {
            engine: self.engine.clone(),
            container_id,
            options: self.options.clone(),
            owned_image: Some(image),
            workdir: RwLock::new(self.workdir.read().clone()),
            env: RwLock::new(self.env.read().clone()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Sandbox("sandbox is closed".to_string()));
        }
        Ok(())
    }

    fn base(&self) -> &Path {
        Path::new(&self.options.workdir)
    }

    fn current_workdir(&self) -> PathBuf {
        self.base().join(self.workdir.read().as_path())
    }

    /// Lexically resolve a caller path to an absolute in-container path
    fn resolve_lexical(&self, path: &str) -> Result<PathBuf> {
        if Path::new(path).is_absolute() {
            return Err(Error::AbsolutePathNotAllowed(path.to_string()));
        }
        let relative = self.workdir.read().join(path);
        path_guard::resolve_lexical(self.base(), relative)
    }

    /// Resolve symlinks inside the container and re-check containment
    async fn resolve(&self, path: &str) -> Result<PathBuf> {
        let full = self.resolve_lexical(path)?;
        let full_str = full.to_string_lossy().to_string();

        let result = self
            .run_exec(
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    RESOLVE_SCRIPT.to_string(),
                    "sh".to_string(),
                    full_str,
                ],
                "/",
            )
            .await?;

        let mut lines = result.stdout.lines();
        let (Some(ancestor), Some(resolved)) = (lines.next(), lines.next()) else {
            return Err(Error::PathOutsideBase(path.to_string()));
        };
        if !result.success() {
            return Err(Error::PathOutsideBase(path.to_string()));
        }

        let resolved = Path::new(resolved.trim());
        if !resolved.starts_with(self.base()) {
            return Err(Error::PathOutsideBase(path.to_string()));
        }

        let tail = full
            .strip_prefix(ancestor.trim())
            .map_err(|_| Error::PathOutsideBase(path.to_string()))?;
        Ok(resolved.join(tail))
    }

    /// Refuse when a symlink under `full` points outside the base
    async fn ensure_contained_links(&self, full: &Path, display: &str) -> Result<()> {
        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            LINKS_SCRIPT.to_string(),
            "sh".to_string(),
            full.to_string_lossy().to_string(),
        ];
        let result = self.run_exec(cmd, "/").await?;
        let escapes = result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .any(|target| !Path::new(target).starts_with(self.base()));
        if escapes {
            return Err(Error::PathOutsideBase(display.to_string()));
        }
        Ok(())
    }

    /// Best-effort kill of an exec that outlived its caller
    async fn kill_exec(&self, pid_file: &str) {
        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            KILL_SCRIPT.to_string(),
            pid_file.to_string(),
        ];
        let _ = self.run_exec(cmd, "/").await;
    }

    /// Path relative to the container base, as stored in tar archives
    fn archive_path(&self, full: &Path) -> Result<PathBuf> {
        full.strip_prefix(self.base())
            .map(Path::to_path_buf)
            .map_err(|_| Error::PathOutsideBase(full.display().to_string()))
    }

    async fn run_exec(&self, cmd: Vec<String>, working_dir: &str) -> Result<ExecResult> {
        let env: Vec<String> = self
            .env
            .read()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exec = self
            .engine
            .docker
            .create_exec(
                &self.container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(working_dir.to_string()),
                    env: Some(env),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Container(format!("exec create failed: {}", e)))?;

        let started = self
            .engine
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::Container(format!("exec start failed: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(Error::Container(format!("exec output failed: {}", e)))
                    }
                }
            }
        }

        let inspect = self
            .engine
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::Container(format!("exec inspect failed: {}", e)))?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn upload(&self, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: self.options.workdir.clone(),
            ..Default::default()
        };
        self.engine
            .docker
            .upload_to_container(&self.container_id, Some(options), Bytes::from(archive))
            .await
            .map_err(|e| Error::Container(format!("upload failed: {}", e)))
    }

    async fn download(&self, full: &Path, display: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions {
            path: full.to_string_lossy().to_string(),
        };
        let mut stream = self
            .engine
            .docker
            .download_from_container(&self.container_id, Some(options));

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(e) if is_not_found(&e) => return Err(Error::NotFound(display.to_string())),
                Err(e) => return Err(Error::Container(format!("download failed: {}", e))),
            }
        }
        Ok(archive)
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Container
    }

    async fn exec(&self, ctx: &CancellationToken, command: &str) -> Result<ExecResult> {
        self.exec_with_timeout(ctx, command, self.options.exec_timeout)
            .await
    }

    /// Run `command`, killing its in-container process tree on timeout or
    /// cancellation.
    async fn exec_with_timeout(
        &self,
        ctx: &CancellationToken,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecResult> {
        self.ensure_open()?;
        let workdir = self.current_workdir().to_string_lossy().to_string();
        let pid_file = format!("/tmp/appforge-exec-{}.pid", uuid::Uuid::new_v4().simple());
        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            RUN_SCRIPT.to_string(),
            pid_file.clone(),
            command.to_string(),
        ];

        let outcome = cancellable(ctx, async {
            match tokio::time::timeout(timeout, self.run_exec(cmd, &workdir)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "command exceeded {}s: {}",
                    timeout.as_secs_f64(),
                    command
                ))),
            }
        })
        .await;

        if matches!(outcome, Err(Error::Timeout(_)) | Err(Error::Cancelled)) {
            self.kill_exec(&pid_file).await;
        }
        outcome
    }

    async fn write_file(&self, ctx: &CancellationToken, path: &str, content: &str) -> Result<()> {
        let files = HashMap::from([(path.to_string(), content.to_string())]);
        self.write_files(ctx, &files).await
    }

    async fn write_files(
        &self,
        ctx: &CancellationToken,
        files: &HashMap<String, String>,
    ) -> Result<()> {
        self.ensure_open()?;

        cancellable(ctx, async {
            let mut entries = Vec::with_capacity(files.len());
            for (path, content) in files {
                let full = self.resolve(path).await?;
                entries.push((self.archive_path(&full)?, content.as_bytes()));
            }

            let archive = tar_files(&entries)?;
            self.upload(archive).await
        })
        .await
    }

    async fn read_file(&self, ctx: &CancellationToken, path: &str) -> Result<String> {
        self.ensure_open()?;

        cancellable(ctx, async {
            let full = self.resolve(path).await?;
            let archive = self.download(&full, path).await?;

            let mut archive = tar::Archive::new(archive.as_slice());
            for entry in archive.entries()? {
                let mut entry = entry?;
                if entry.header().entry_type().is_file() {
                    let mut content = String::new();
                    entry.read_to_string(&mut content)?;
                    return Ok(content);
                }
            }
            Err(Error::InvalidInput(format!("{} is not a regular file", path)))
        })
        .await
    }

    async fn delete_file(&self, ctx: &CancellationToken, path: &str) -> Result<()> {
        self.ensure_open()?;

        cancellable(ctx, async {
            let full = self.resolve(path).await?;
            let cmd = vec![
                "rm".to_string(),
                "--".to_string(),
                full.to_string_lossy().to_string(),
            ];
            let result = self.run_exec(cmd, "/").await?;
            match result.exit_code {
                0 => Ok(()),
                _ if result.stderr.contains("No such file") => {
                    Err(Error::NotFound(path.to_string()))
                }
                code => Err(Error::Sandbox(format!(
                    "failed to delete {} (exit {}): {}",
                    path,
                    code,
                    result.stderr.trim()
                ))),
            }
        })
        .await
    }

    async fn list_directory(&self, ctx: &CancellationToken, path: &str) -> Result<Vec<String>> {
        self.ensure_open()?;

        cancellable(ctx, async {
            let full = self.resolve(path).await?;
            let cmd = vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"cd "$1" && ls -1A"#.to_string(),
                "sh".to_string(),
                full.to_string_lossy().to_string(),
            ];
            let result = self.run_exec(cmd, "/").await?;
            if !result.success() {
                return Err(Error::NotFound(format!("directory {}", path)));
            }

            let mut names: Vec<String> = result
                .stdout
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn set_workdir(&self, ctx: &CancellationToken, path: &str) -> Result<()> {
        self.ensure_open()?;

        let relative = cancellable(ctx, async {
            let full = self.resolve(path).await?;
            let cmd = vec![
                "test".to_string(),
                "-d".to_string(),
                full.to_string_lossy().to_string(),
            ];
            if !self.run_exec(cmd, "/").await?.success() {
                return Err(Error::InvalidInput(format!("{} is not a directory", path)));
            }
            self.archive_path(&full)
        })
        .await?;

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
        let target = std::path::absolute(host_path)?;

        cancellable(ctx, async {
            let full = self.resolve(sandbox_path).await?;
            let archive = self.download(&full, sandbox_path).await?;
            let unpack_target = target.clone();
            tokio::task::spawn_blocking(move || unpack_stripped(&archive, &unpack_target))
                .await??;
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
        if !host_path.is_dir() {
            return Err(Error::NotFound(format!(
                "host directory {}",
                host_path.display()
            )));
        }

        cancellable(ctx, async {
            let full = self.resolve(sandbox_path).await?;
            self.ensure_contained_links(&full, sandbox_path).await?;
            let prefix = self.archive_path(&full)?;
            let source = host_path.to_path_buf();
            let archive =
                tokio::task::spawn_blocking(move || tar_directory(&source, &prefix)).await??;
            self.upload(archive).await
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.engine.remove_container(&self.container_id).await?;
        if let Some(image) = &self.owned_image {
            self.engine.remove_image(image).await?;
        }
        Ok(())
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Build a tar archive holding `entries` as regular files
fn tar_files(entries: &[(PathBuf, &[u8])]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;

    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        builder.append_data(&mut header, path, *content)?;
    }

    Ok(builder.into_inner()?)
}

/// Archive `source` under `prefix`, skipping symlinks
fn tar_directory(source: &Path, prefix: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for entry in WalkDir::new(source).follow_links(false).min_depth(1) {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let name = prefix.join(relative);
        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }

    Ok(builder.into_inner()?)
}

/// Unpack a Docker archive into `target`, dropping its top-level directory
fn unpack_stripped(archive: &[u8], target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;

    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let rest: PathBuf = path.components().skip(1).collect();
        if rest.as_os_str().is_empty() {
            continue;
        }

        let dest = path_guard::resolve_lexical(target, &rest)?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest)?;
        }
    }

    Ok(())
}

/// Parse a memory limit string (e.g., "512m", "1g") to bytes
fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.trim().to_lowercase();
    if limit.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = limit.strip_suffix("gb").or(limit.strip_suffix('g')) {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = limit.strip_suffix("mb").or(limit.strip_suffix('m')) {
        (n, 1024 * 1024)
    } else if let Some(n) = limit.strip_suffix("kb").or(limit.strip_suffix('k')) {
        (n, 1024)
    } else {
        (limit.as_str(), 1)
    };

    let num: i64 = num_str.trim().parse().ok()?;
    Some(num * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_IMAGE: &str = "alpine:3.20";

    /// Connect to Docker or skip the calling test
    async fn engine_or_skip() -> Option<ContainerEngine> {
        match ContainerEngine::connect().await {
            Ok(engine) => Some(engine),
            Err(_) => {
                eprintln!("Skipping Docker test: Docker not available");
                None
            }
        }
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("2GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1024k"), Some(1024 * 1024));
        assert_eq!(parse_memory_limit("1024"), Some(1024));
        assert_eq!(parse_memory_limit(""), None);
    }

    #[test]
    fn test_options_defaults_apply_when_unset() {
        let config = ContainerConfig {
            image: String::new(),
            workdir: String::new(),
            exec_timeout: Duration::ZERO,
            ..Default::default()
        };
        let options = ContainerOptions::from(&config);
        assert_eq!(options.image, DEFAULT_IMAGE);
        assert_eq!(options.workdir, DEFAULT_WORKDIR);
        assert_eq!(options.exec_timeout, DEFAULT_EXEC_TIMEOUT);
    }

    #[test]
    fn test_unpack_strips_top_level_dir() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "project/src/a.txt", &b"hi"[..])
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        unpack_stripped(&archive, dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.txt")).unwrap(),
            "hi"
        );
    }

    #[tokio::test]
    async fn test_container_file_roundtrip() {
        let Some(engine) = engine_or_skip().await else {
            return;
        };
        let sandbox = ContainerSandbox::new(engine, ContainerOptions::with_image(TEST_IMAGE))
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        sandbox.write_file(&ctx, "a/b.txt", "hi").await.unwrap();
        assert_eq!(sandbox.read_file(&ctx, "a/b.txt").await.unwrap(), "hi");
        assert_eq!(
            sandbox.list_directory(&ctx, "a").await.unwrap(),
            vec!["b.txt".to_string()]
        );
        assert!(sandbox.write_file(&ctx, "../evil.txt", "x").await.is_err());

        sandbox.close().await.unwrap();
        sandbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_container_symlink_escape() {
        let Some(engine) = engine_or_skip().await else {
            return;
        };
        let sandbox = ContainerSandbox::new(engine, ContainerOptions::with_image(TEST_IMAGE))
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        sandbox.exec(&ctx, "ln -s /etc escape").await.unwrap();
        let err = sandbox.read_file(&ctx, "escape/hostname").await.unwrap_err();
        assert!(matches!(err, Error::PathOutsideBase(_)));

        sandbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_container_env_is_additive_and_timeout_distinct() {
        let Some(engine) = engine_or_skip().await else {
            return;
        };
        let sandbox = ContainerSandbox::new(engine, ContainerOptions::with_image(TEST_IMAGE))
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        sandbox.with_env("FIRST", "1");
        sandbox.with_envs([("SECOND", "2")]);
        let result = sandbox.exec(&ctx, "echo $FIRST$SECOND").await.unwrap();
        assert_eq!(result.stdout.trim(), "12");

        let failed = sandbox.exec(&ctx, "exit 7").await.unwrap();
        assert_eq!(failed.exit_code, 7);

        let err = sandbox
            .exec_with_timeout(&ctx, "sleep 5", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        sandbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_process_is_killed() {
        let Some(engine) = engine_or_skip().await else {
            return;
        };
        let sandbox = ContainerSandbox::new(engine, ContainerOptions::with_image(TEST_IMAGE))
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        let err = sandbox
            .exec_with_timeout(&ctx, "sleep 47; echo done", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        let ps = sandbox.exec(&ctx, "ps -o args").await.unwrap();
        assert!(!ps.stdout.contains("sleep 47"), "{}", ps.stdout);

        sandbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_container_workdir_delete_and_sync() {
        let Some(engine) = engine_or_skip().await else {
            return;
        };
        let sandbox = ContainerSandbox::new(engine, ContainerOptions::with_image(TEST_IMAGE))
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        let host = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(host.path().join("src")).unwrap();
        std::fs::write(host.path().join("src/app.ts"), "export {}").unwrap();
        std::fs::write(host.path().join("package.json"), "{}").unwrap();

        sandbox
            .refresh_from_host(&ctx, host.path(), "project")
            .await
            .unwrap();
        assert_eq!(
            sandbox.read_file(&ctx, "project/src/app.ts").await.unwrap(),
            "export {}"
        );

        assert!(matches!(
            sandbox.set_workdir(&ctx, "project/package.json").await,
            Err(Error::InvalidInput(_))
        ));
        sandbox.set_workdir(&ctx, "project").await.unwrap();
        let pwd = sandbox.exec(&ctx, "pwd").await.unwrap();
        assert_eq!(pwd.stdout.trim(), "/workspace/project");

        sandbox.write_file(&ctx, "src/app.ts", "export const x = 1").await.unwrap();
        sandbox.delete_file(&ctx, "package.json").await.unwrap();
        assert!(matches!(
            sandbox.delete_file(&ctx, "package.json").await,
            Err(Error::NotFound(_))
        ));

        let out = tempfile::tempdir().unwrap();
        let exported = sandbox
            .export_directory(&ctx, ".", &out.path().join("exported"))
            .await
            .unwrap();
        assert!(exported.is_absolute());
        assert_eq!(
            std::fs::read_to_string(exported.join("src/app.ts")).unwrap(),
            "export const x = 1"
        );
        assert!(!exported.join("package.json").exists());

        sandbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_container_refresh_refuses_escaping_link() {
        let Some(engine) = engine_or_skip().await else {
            return;
        };
        let sandbox = ContainerSandbox::new(engine, ContainerOptions::with_image(TEST_IMAGE))
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        sandbox
            .exec(&ctx, "mkdir -p project /tmp/elsewhere && ln -s /tmp/elsewhere project/out")
            .await
            .unwrap();

        let host = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(host.path().join("out")).unwrap();
        std::fs::write(host.path().join("out/planted.txt"), "x").unwrap();

        let err = sandbox
            .refresh_from_host(&ctx, host.path(), "project")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PathOutsideBase(_)), "{}", err);
        let check = sandbox.exec(&ctx, "test -e /tmp/elsewhere/planted.txt").await.unwrap();
        assert!(!check.success());

        sandbox.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fork_diverges_one_way() {
        let Some(engine) = engine_or_skip().await else {
            return;
        };
        let original = ContainerSandbox::new(engine, ContainerOptions::with_image(TEST_IMAGE))
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        original.write_file(&ctx, "shared.txt", "before").await.unwrap();
        let fork = original.fork().await.unwrap();

        assert_eq!(fork.read_file(&ctx, "shared.txt").await.unwrap(), "before");

        fork.write_file(&ctx, "fork-only.txt", "fork").await.unwrap();
        fork.write_file(&ctx, "shared.txt", "changed in fork").await.unwrap();

        assert!(matches!(
            original.read_file(&ctx, "fork-only.txt").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(original.read_file(&ctx, "shared.txt").await.unwrap(), "before");

        fork.close().await.unwrap();
        original.close().await.unwrap();
    }
}
