//! Deploy module - checksum-gated deployment of validated projects
//!
//! The deployer refuses to touch the remote unless the project's current
//! sources hash to the checksum recorded by the last successful validation.

mod build;
mod http;
mod remote;
mod retry;

pub use build::LocalBuild;
pub use http::HttpRemoteTarget;
pub use remote::{AppInfo, DeploymentInfo, RemoteTarget, UserInfo};
pub use retry::RetryPolicy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::project::{ChecksumEngine, ProjectLock, ProjectState, StateKind};

/// Outcome of a successful deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResult {
    pub success: bool,
    pub message: String,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

/// Drives a validated project through build, sync and remote deploy
pub struct Deployer {
    remote: Arc<dyn RemoteTarget>,
    build: LocalBuild,
    retry: RetryPolicy,
    checksum: ChecksumEngine,
    source_path: String,
    sync_excluded_dirs: Vec<String>,
    metrics: Arc<dyn MetricsSink>,
}

impl Deployer {
    pub fn new(remote: Arc<dyn RemoteTarget>, config: &DeployConfig) -> Self {
        Self {
            remote,
            build: LocalBuild::from_config(config),
            retry: RetryPolicy::from(&config.retry),
            checksum: ChecksumEngine::default(),
            source_path: config.source_path.clone(),
            sync_excluded_dirs: config.sync_excluded_dirs.clone(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_checksum_engine(mut self, checksum: ChecksumEngine) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_build(mut self, build: LocalBuild) -> Self {
        self.build = build;
        self
    }

    /// Deploy `work_dir` as app `name`
    pub async fn deploy(
        &self,
        work_dir: &Path,
        name: &str,
        description: &str,
        force: bool,
    ) -> Result<DeployResult> {
        self.deploy_with(&CancellationToken::new(), work_dir, name, description, force)
            .await
    }

    /// Deploy `work_dir` as app `name`, aborting when `ctx` is cancelled.
    ///
    /// `force` deploys over an app created by a different principal.
    pub async fn deploy_with(
        &self,
        ctx: &CancellationToken,
        work_dir: &Path,
        name: &str,
        description: &str,
        force: bool,
    ) -> Result<DeployResult> {
        let started = Instant::now();
        let result = self.run(ctx, work_dir, name, description, force).await;
        self.metrics
            .deploy_finished(result.is_ok(), started.elapsed());
        if let Err(e) = &result {
            warn!(app = name, error = %e, "Deployment failed");
        }
        result
    }

    async fn run(
        &self,
        ctx: &CancellationToken,
        work_dir: &Path,
        name: &str,
        description: &str,
        force: bool,
    ) -> Result<DeployResult> {
        if !work_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "{} is not a directory",
                work_dir.display()
            )));
        }
        validate_app_name(name)?;

        let _lock = ProjectLock::acquire(work_dir)?;
        let state = match ProjectState::load_existing(work_dir)? {
            Some(state @ ProjectState::Validated(_)) => state,
            Some(other) => return Err(not_deployable(&other.kind().to_string())),
            None => return Err(not_deployable("unscaffolded")),
        };

        let expected = state.checksum().unwrap_or_default();
        let actual = self.checksum.compute(work_dir)?;
        if actual != expected {
            self.metrics.checksum_mismatch();
            return Err(Error::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        info!(app = name, checksum = %actual, "Checksum verified");

        self.build.run(ctx, work_dir).await?;

        let user = self.remote.current_user().await?;
        let app = match self.remote.get_app(name).await? {
            Some(app) => {
                match app.creator.as_deref() {
                    Some(creator) if creator != user.user_name && !force => {
                        return Err(Error::OwnershipConflict {
                            name: name.to_string(),
                            creator: creator.to_string(),
                        });
                    }
                    Some(creator) if creator != user.user_name => {
                        warn!(app = name, creator, "Deploying over an app owned by another user");
                    }
                    _ => {}
                }
                info!(app = name, "Using existing app");
                app
            }
            None => {
                info!(app = name, "Creating app");
                self.remote.create_app(name, description).await?
            }
        };

        let source_path = self
            .source_path
            .replace("{user}", &user.user_name)
            .replace("{app}", name);
        let files = self
            .remote
            .sync_directory(work_dir, &source_path, &self.sync_excluded_dirs)
            .await?;
        info!(app = name, files, source_path = %source_path, "Synced project");

        let remote = &self.remote;
        let source = source_path.as_str();
        let deployment = self
            .retry
            .run(
                "deploy_app",
                |_| remote.deploy_app(name, source),
                |attempt, ok| self.metrics.deploy_attempt(attempt, ok),
            )
            .await?;

        let deployed = state.deploy()?;
        if let Err(e) = deployed.save(work_dir) {
            error!(app = name, error = %e, "Deployed, but failed to persist project state");
        }
        let deployed_at = match &deployed {
            ProjectState::Deployed(data) => data.deployed_at,
            _ => Utc::now(),
        };

        info!(
            app = name,
            deployment_id = %deployment.deployment_id,
            "Deployment triggered"
        );

        Ok(DeployResult {
            success: true,
            message: format!(
                "Deployed {} (deployment {})",
                name, deployment.deployment_id
            ),
            app_name: name.to_string(),
            app_url: app.url,
            deployed_at,
        })
    }
}

fn not_deployable(from: &str) -> Error {
    Error::InvalidTransition {
        from: from.to_string(),
        to: StateKind::Deployed.to_string(),
        reason: "project must be scaffolded and validated first".to_string(),
    }
}

/// App names: 2-30 chars of lowercase letters, digits and dashes
fn validate_app_name(name: &str) -> Result<()> {
    let valid = (2..=30).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid app name '{}': use 2-30 lowercase letters, digits or dashes",
            name
        )))
    }
}
