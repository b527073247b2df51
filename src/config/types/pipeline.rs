//! Validation and deployment configuration types
//!
//! Command lists here are project-type specific; the defaults target a
//! Node.js app with a TypeScript client/server split.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Validation pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Build step of the built-in strategy
    #[serde(default = "default_build_command")]
    pub build_command: String,
    /// Type-check step of the built-in strategy
    #[serde(default = "default_typecheck_command")]
    pub typecheck_command: String,
    /// Test step of the built-in strategy
    #[serde(default = "default_test_command")]
    pub test_command: String,
    /// Replaces the built-in strategy with a single command when set
    #[serde(default)]
    pub custom_command: Option<String>,
    /// Bound applied to each step
    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub step_timeout: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            build_command: default_build_command(),
            typecheck_command: default_typecheck_command(),
            test_command: default_test_command(),
            custom_command: None,
            step_timeout: default_step_timeout(),
        }
    }
}

fn default_build_command() -> String {
    "npm install && npm run build".to_string()
}

fn default_typecheck_command() -> String {
    "npx tsc --noEmit".to_string()
}

fn default_test_command() -> String {
    "npm test".to_string()
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Host commands producing deployable artifacts, run in order
    #[serde(default = "default_build_commands")]
    pub build_commands: Vec<String>,
    /// Bound applied to each build command
    #[serde(default = "default_build_timeout", with = "humantime_serde")]
    pub build_timeout: Duration,
    /// Remote source path; `{user}` and `{app}` are substituted
    #[serde(default = "default_source_path")]
    pub source_path: String,
    /// Directory names never uploaded; build output is always synced
    #[serde(default = "default_sync_excluded_dirs")]
    pub sync_excluded_dirs: Vec<String>,
    /// Retry policy for the remote deploy call
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            build_commands: default_build_commands(),
            build_timeout: default_build_timeout(),
            source_path: default_source_path(),
            sync_excluded_dirs: default_sync_excluded_dirs(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_build_commands() -> Vec<String> {
    vec!["npm install".to_string(), "npm run build".to_string()]
}

fn default_build_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_source_path() -> String {
    "/Workspace/Users/{user}/apps/{app}".to_string()
}

fn default_sync_excluded_dirs() -> Vec<String> {
    ["node_modules", ".git", ".venv", "__pycache__"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Retry policy for the remote deploy call
///
/// A zero `initial_backoff` retries immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomize delays by up to 25%
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_defaults() {
        let config = ValidationConfig::default();
        assert!(config.custom_command.is_none());
        assert_eq!(config.test_command, "npm test");
        assert_eq!(config.step_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_deploy_config_from_toml() {
        let config: DeployConfig = toml::from_str(
            r#"
            build_commands = ["make dist"]
            [retry]
            max_attempts = 5
            initial_backoff = "0s"
            "#,
        )
        .unwrap();
        assert_eq!(config.build_commands, vec!["make dist".to_string()]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff, Duration::ZERO);
        assert_eq!(config.retry.max_backoff, Duration::from_secs(30));
        assert_eq!(config.build_timeout, Duration::from_secs(600));
        assert!(config.sync_excluded_dirs.contains(&"node_modules".to_string()));
        assert!(!config.sync_excluded_dirs.iter().any(|d| d == "dist" || d == "build"));
    }
}
