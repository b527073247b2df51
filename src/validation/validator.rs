//! Validation entry point

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ValidateResult, ValidationPipeline};
use crate::config::{Config, SandboxBackend, SandboxConfig, ValidationConfig};
use crate::error::{Error, Result};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::project::{ChecksumEngine, ProjectLock, ProjectState};
use crate::sandbox::{create_sandbox, ContainerEngine, ContainerOptions, ContainerSandbox, Sandbox};

/// Validates a project directory and records the result in its state file
pub struct Validator {
    sandbox_config: SandboxConfig,
    pipeline: ValidationPipeline,
    checksum: ChecksumEngine,
    engine: Option<ContainerEngine>,
    metrics: Arc<dyn MetricsSink>,
}

impl Validator {
    pub fn new(sandbox_config: SandboxConfig, validation: &ValidationConfig) -> Self {
        Self {
            sandbox_config,
            pipeline: ValidationPipeline::from_config(validation),
            checksum: ChecksumEngine::default(),
            engine: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sandbox.clone(), &config.validation)
    }

    /// Share an already-connected Docker engine
    pub fn with_engine(mut self, engine: ContainerEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_checksum_engine(mut self, checksum: ChecksumEngine) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_pipeline(mut self, pipeline: ValidationPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Validate `work_dir`
    pub async fn validate(&self, work_dir: &Path) -> Result<ValidateResult> {
        self.validate_with(&CancellationToken::new(), work_dir).await
    }

    /// Validate `work_dir`, aborting when `ctx` is cancelled.
    ///
    /// On success the content checksum is persisted as `Validated`. A failed
    /// run leaves the state file untouched.
    pub async fn validate_with(
        &self,
        ctx: &CancellationToken,
        work_dir: &Path,
    ) -> Result<ValidateResult> {
        if !work_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "{} is not a directory",
                work_dir.display()
            )));
        }

        let _lock = ProjectLock::acquire(work_dir)?;
        let state = ProjectState::load(work_dir)?;
        let started = Instant::now();

        info!(
            project = %work_dir.display(),
            backend = %self.sandbox_config.backend,
            state = %state.kind(),
            "Validating project"
        );

        let sandbox = self.open_sandbox(ctx, work_dir).await?;
        let outcome = self
            .pipeline
            .run(ctx, sandbox.as_ref(), self.metrics.as_ref())
            .await;
        if let Err(e) = sandbox.close().await {
            warn!(error = %e, "Failed to close sandbox");
        }
        let result = outcome?;

        self.metrics
            .validation_finished(result.success, started.elapsed());
        if !result.success {
            info!(message = %result.message, "Validation failed");
            return Ok(result);
        }

        let checksum = self.checksum.compute(work_dir)?;
        let next = state.validate(checksum);
        next.save(work_dir)?;
        info!(
            checksum = next.checksum().unwrap_or_default(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Project validated"
        );

        Ok(result)
    }

    async fn open_sandbox(
        &self,
        ctx: &CancellationToken,
        work_dir: &Path,
    ) -> Result<Box<dyn Sandbox>> {
        match self.sandbox_config.backend {
            SandboxBackend::Local => {
                create_sandbox(&self.sandbox_config, work_dir, self.engine.as_ref()).await
            }
            SandboxBackend::Container => {
                let engine = match &self.engine {
                    Some(engine) => engine.clone(),
                    None => ContainerEngine::connect().await?,
                };
                let options = ContainerOptions::from(&self.sandbox_config.container);
                let sandbox = ContainerSandbox::new(engine, options).await?;

                // Credentials are pushed explicitly; the container never
                // sees the rest of the host environment.
                sandbox.with_envs(
                    self.sandbox_config
                        .propagate_env
                        .iter()
                        .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v))),
                );

                if let Err(e) = sandbox.refresh_from_host(ctx, work_dir, ".").await {
                    let _ = sandbox.close().await;
                    return Err(e);
                }
                Ok(Box::new(sandbox))
            }
        }
    }
}
