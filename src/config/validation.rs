//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::sandbox::SandboxBackend;
use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_sandbox_config(config, result);
    result = validate_pipeline_config(config, result);
    result = validate_remote_config(config, result);

    result
}

fn validate_sandbox_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.sandbox.backend != SandboxBackend::Container {
        return result;
    }

    let container = &config.sandbox.container;
    if container.image.trim().is_empty() {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.container.image",
                "Container backend selected but no image specified",
            )
            .with_suggestion("Set sandbox.container.image to a valid Docker image"),
        );
    }
    if !container.workdir.starts_with('/') {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.container.workdir",
                format!("Container workdir must be absolute: {}", container.workdir),
            )
            .with_suggestion("Use an absolute path such as /workspace"),
        );
    }
    if container.exec_timeout.is_zero() {
        result = result.with_warning(
            ValidationIssue::new("sandbox.container.exec_timeout", "Zero timeout; the default 5m applies"),
        );
    }

    result
}

fn validate_pipeline_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if let Some(command) = &config.validation.custom_command {
        if command.trim().is_empty() {
            result = result.with_error(
                ValidationIssue::new("validation.custom_command", "Custom validation command is empty")
                    .with_suggestion("Remove validation.custom_command to use build/typecheck/test"),
            );
        }
    }

    if config.deploy.retry.max_attempts == 0 {
        result = result.with_error(
            ValidationIssue::new("deploy.retry.max_attempts", "At least one deploy attempt is required")
                .with_suggestion("Set deploy.retry.max_attempts to 3"),
        );
    }

    if config.deploy.build_commands.is_empty() {
        result = result.with_warning(ValidationIssue::new(
            "deploy.build_commands",
            "No build commands configured; the project is synced as-is",
        ));
    }

    result
}

fn validate_remote_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if !config.remote.is_configured() {
        result = result.with_warning(
            ValidationIssue::new(
                "remote",
                "No remote workspace configured. Deploy will not be available.",
            )
            .with_suggestion("Set DATABRICKS_HOST and DATABRICKS_TOKEN environment variables"),
        );
        return result;
    }

    if let Some(host) = &config.remote.host {
        if url::Url::parse(host).is_err() {
            result = result.with_error(
                ValidationIssue::new("remote.host", format!("Invalid workspace URL: {}", host))
                    .with_suggestion("Use the full URL, e.g. https://example.cloud.databricks.com"),
            );
        }
    }

    result
}
