//! Step sequencing for a validation run

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ValidateResult, ValidationDetail};
use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::sandbox::Sandbox;

/// How a project is validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationStrategy {
    /// Build, then type-check, then test
    Builtin {
        build: String,
        typecheck: String,
        test: String,
    },
    /// One operator-supplied command
    Custom { command: String },
}

/// One command in a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationStep {
    pub name: &'static str,
    pub command: String,
    pub failure_message: &'static str,
}

impl ValidationStrategy {
    pub fn from_config(config: &ValidationConfig) -> Self {
        match config.custom_command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => ValidationStrategy::Custom {
                command: command.to_string(),
            },
            _ => ValidationStrategy::Builtin {
                build: config.build_command.clone(),
                typecheck: config.typecheck_command.clone(),
                test: config.test_command.clone(),
            },
        }
    }

    /// Steps in execution order
    pub fn steps(&self) -> Vec<ValidationStep> {
        match self {
            ValidationStrategy::Builtin {
                build,
                typecheck,
                test,
            } => vec![
                ValidationStep {
                    name: "build",
                    command: build.clone(),
                    failure_message: "Build failed",
                },
                ValidationStep {
                    name: "typecheck",
                    command: typecheck.clone(),
                    failure_message: "Type check failed",
                },
                ValidationStep {
                    name: "test",
                    command: test.clone(),
                    failure_message: "Tests failed",
                },
            ],
            ValidationStrategy::Custom { command } => vec![ValidationStep {
                name: "custom",
                command: command.clone(),
                failure_message: "Custom validation failed",
            }],
        }
    }

    fn describe(&self) -> String {
        match self {
            ValidationStrategy::Builtin { .. } => "build → typecheck → test".to_string(),
            ValidationStrategy::Custom { command } => format!("custom: {}", command),
        }
    }
}

/// Runs a strategy's steps in a sandbox, stopping at the first failure
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    strategy: ValidationStrategy,
    step_timeout: Duration,
}

impl ValidationPipeline {
    pub fn new(strategy: ValidationStrategy, step_timeout: Duration) -> Self {
        Self {
            strategy,
            step_timeout,
        }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(ValidationStrategy::from_config(config), config.step_timeout)
    }

    /// Run every step in order.
    ///
    /// A failing step yields `Ok` with `success: false`. Only cancellation is
    /// returned as an error; a step that cannot be launched or times out is
    /// reported with exit code `-1` and the error text as stderr.
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        sandbox: &dyn Sandbox,
        metrics: &dyn MetricsSink,
    ) -> Result<ValidateResult> {
        let sandbox_type = sandbox.kind().to_string();
        let mut progress_log = vec![format!(
            "Starting validation ({}) in {} sandbox",
            self.strategy.describe(),
            sandbox_type
        )];
        info!(sandbox = %sandbox_type, strategy = %self.strategy.describe(), "Starting validation");

        for step in self.strategy.steps() {
            debug!(step = step.name, command = %step.command, "Running validation step");
            let started = Instant::now();

            let detail = match sandbox
                .exec_with_timeout(ctx, &step.command, self.step_timeout)
                .await
            {
                Ok(result) if result.success() => None,
                Ok(result) => Some(ValidationDetail {
                    exit_code: result.exit_code,
                    stdout: result.stdout,
                    stderr: result.stderr,
                }),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => Some(ValidationDetail {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                }),
            };

            let elapsed = started.elapsed();
            metrics.validation_step(step.name, detail.is_none(), elapsed);

            match detail {
                None => {
                    progress_log.push(format!("✓ {} ({:.1}s)", step.name, elapsed.as_secs_f64()));
                    info!(step = step.name, elapsed_ms = elapsed.as_millis() as u64, "Validation step passed");
                }
                Some(detail) => {
                    progress_log.push(format!(
                        "✗ {} ({:.1}s): exit code {}",
                        step.name,
                        elapsed.as_secs_f64(),
                        detail.exit_code
                    ));
                    warn!(
                        step = step.name,
                        exit_code = detail.exit_code,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Validation step failed"
                    );
                    return Ok(ValidateResult {
                        success: false,
                        message: step.failure_message.to_string(),
                        details: Some(detail),
                        progress_log,
                        sandbox_type,
                    });
                }
            }
        }

        Ok(ValidateResult {
            success: true,
            message: "Validation passed".to_string(),
            details: None,
            progress_log,
            sandbox_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{InMemoryMetrics, NoopMetrics};
    use crate::sandbox::LocalSandbox;
    use tempfile::tempdir;

    fn builtin(build: &str, typecheck: &str, test: &str) -> ValidationPipeline {
        ValidationPipeline::new(
            ValidationStrategy::Builtin {
                build: build.to_string(),
                typecheck: typecheck.to_string(),
                test: test.to_string(),
            },
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_all_steps_pass() {
        let dir = tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).unwrap();
        let metrics = InMemoryMetrics::new();

        let result = builtin("true", "true", "true")
            .run(&CancellationToken::new(), &sandbox, &metrics)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.details.is_none());
        assert_eq!(result.sandbox_type, "local");
        assert_eq!(result.progress_log.len(), 4);
        assert!(result.progress_log[0].starts_with("Starting validation"));
        assert!(result.progress_log[1..].iter().all(|l| l.starts_with('✓')));
        assert_eq!(metrics.validation_steps.get(), 3);
    }

    #[tokio::test]
    async fn test_typecheck_failure_stops_pipeline() {
        let dir = tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).unwrap();

        let result = builtin("true", "echo 'TS2322' >&2; exit 2", "touch tests_ran")
            .run(&CancellationToken::new(), &sandbox, &NoopMetrics)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.message, "Type check failed");
        let details = result.details.unwrap();
        assert_eq!(details.exit_code, 2);
        assert!(details.stderr.contains("TS2322"));
        assert_eq!(result.progress_log.len(), 3);
        assert!(result.progress_log[1].starts_with("✓ build"));
        assert!(result.progress_log[2].starts_with("✗ typecheck"));
        assert!(!dir.path().join("tests_ran").exists());
    }

    #[tokio::test]
    async fn test_build_failure_skips_later_steps() {
        let dir = tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).unwrap();

        let result = builtin("exit 1", "touch typecheck_ran", "touch tests_ran")
            .run(&CancellationToken::new(), &sandbox, &NoopMetrics)
            .await
            .unwrap();

        assert_eq!(result.message, "Build failed");
        assert_eq!(result.progress_log.len(), 2);
        assert!(!result.progress_log.iter().any(|l| l.contains("typecheck") && !l.starts_with("Starting")));
        assert!(!dir.path().join("typecheck_ran").exists());
        assert!(!dir.path().join("tests_ran").exists());
    }

    #[tokio::test]
    async fn test_test_failure_message() {
        let dir = tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).unwrap();

        let result = builtin("true", "true", "exit 1")
            .run(&CancellationToken::new(), &sandbox, &NoopMetrics)
            .await
            .unwrap();
        assert_eq!(result.message, "Tests failed");
        assert_eq!(result.progress_log.len(), 4);
    }

    #[tokio::test]
    async fn test_custom_strategy() {
        let dir = tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).unwrap();
        let ctx = CancellationToken::new();

        let passing = ValidationPipeline::new(
            ValidationStrategy::Custom {
                command: "echo ok".to_string(),
            },
            Duration::from_secs(30),
        );
        let result = passing.run(&ctx, &sandbox, &NoopMetrics).await.unwrap();
        assert!(result.success);
        assert_eq!(result.progress_log.len(), 2);

        let failing = ValidationPipeline::new(
            ValidationStrategy::Custom {
                command: "exit 3".to_string(),
            },
            Duration::from_secs(30),
        );
        let result = failing.run(&ctx, &sandbox, &NoopMetrics).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Custom validation failed");
        assert_eq!(result.details.unwrap().exit_code, 3);
    }

    #[tokio::test]
    async fn test_timeout_reported_as_launch_failure() {
        let dir = tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).unwrap();
        let pipeline = ValidationPipeline::new(
            ValidationStrategy::Custom {
                command: "sleep 5".to_string(),
            },
            Duration::from_millis(100),
        );

        let result = pipeline
            .run(&CancellationToken::new(), &sandbox, &NoopMetrics)
            .await
            .unwrap();
        let details = result.details.unwrap();
        assert_eq!(details.exit_code, -1);
        assert!(details.stderr.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_cancellation_is_an_error() {
        let dir = tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).unwrap();
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = builtin("true", "true", "true")
            .run(&ctx, &sandbox, &NoopMetrics)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_strategy_from_config() {
        let mut config = ValidationConfig::default();
        assert!(matches!(
            ValidationStrategy::from_config(&config),
            ValidationStrategy::Builtin { .. }
        ));

        config.custom_command = Some("  ".to_string());
        assert!(matches!(
            ValidationStrategy::from_config(&config),
            ValidationStrategy::Builtin { .. }
        ));

        config.custom_command = Some("make check".to_string());
        assert_eq!(
            ValidationStrategy::from_config(&config),
            ValidationStrategy::Custom {
                command: "make check".to_string()
            }
        );
    }
}
