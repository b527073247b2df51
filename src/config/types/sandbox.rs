//! Sandbox configuration types
//!
//! Selects the sandbox backend (local or container) and tunes the container.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Backend used for validation runs
    #[serde(default)]
    pub backend: SandboxBackend,
    /// Container configuration
    #[serde(default)]
    pub container: ContainerConfig,
    /// Host variables pushed into container sandboxes when set
    #[serde(default = "default_propagate_env")]
    pub propagate_env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            backend: SandboxBackend::default(),
            container: ContainerConfig::default(),
            propagate_env: default_propagate_env(),
        }
    }
}

fn default_propagate_env() -> Vec<String> {
    vec![
        "DATABRICKS_HOST".to_string(),
        "DATABRICKS_TOKEN".to_string(),
        "DATABRICKS_WAREHOUSE_ID".to_string(),
    ]
}

/// Sandbox backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Host filesystem beneath the project directory
    #[default]
    Local,
    /// Docker container
    Container,
}

impl std::str::FromStr for SandboxBackend {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "host" => Ok(SandboxBackend::Local),
            "container" | "docker" => Ok(SandboxBackend::Container),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid sandbox backend: {}. Valid: local, container",
                s
            ))),
        }
    }
}

impl std::fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxBackend::Local => write!(f, "local"),
            SandboxBackend::Container => write!(f, "container"),
        }
    }
}

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Docker image to use
    #[serde(default = "default_image")]
    pub image: String,
    /// Directory inside the container that bounds all file operations
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Default bound for commands run with `exec`
    #[serde(default = "default_exec_timeout", with = "humantime_serde")]
    pub exec_timeout: Duration,
    /// Network mode
    #[serde(default = "default_network")]
    pub network: String,
    /// Memory limit (e.g. "2g"); empty for no limit
    #[serde(default = "default_memory")]
    pub memory_limit: String,
    /// CPU limit (number of CPUs); 0 for no limit
    #[serde(default = "default_cpu")]
    pub cpu_limit: f64,
    /// Environment variables applied to every command
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            image: default_image(),
            workdir: default_workdir(),
            exec_timeout: default_exec_timeout(),
            network: default_network(),
            memory_limit: default_memory(),
            cpu_limit: default_cpu(),
            env: HashMap::new(),
        }
    }
}

fn default_image() -> String {
    "node:20-alpine".to_string()
}

fn default_workdir() -> String {
    "/workspace".to_string()
}

fn default_exec_timeout() -> Duration {
    Duration::from_secs(300)
}

// npm install needs registry access
fn default_network() -> String {
    "bridge".to_string()
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpu() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_backend_parsing() {
        assert_eq!("local".parse::<SandboxBackend>().unwrap(), SandboxBackend::Local);
        assert_eq!(
            "Docker".parse::<SandboxBackend>().unwrap(),
            SandboxBackend::Container
        );
        assert!("wasm".parse::<SandboxBackend>().is_err());
    }

    #[test]
    fn test_sandbox_config_default() {
        let config = SandboxConfig::default();
        assert_eq!(config.backend, SandboxBackend::Local);
        assert_eq!(config.container.image, "node:20-alpine");
        assert_eq!(config.container.workdir, "/workspace");
        assert_eq!(config.container.exec_timeout, Duration::from_secs(300));
        assert!(config.propagate_env.contains(&"DATABRICKS_TOKEN".to_string()));
    }

    #[test]
    fn test_container_timeout_is_humantime() {
        let config: ContainerConfig =
            serde_json::from_str(r#"{"exec_timeout": "90s", "image": "node:22"}"#).unwrap();
        assert_eq!(config.exec_timeout, Duration::from_secs(90));
        assert_eq!(config.image, "node:22");
        assert_eq!(config.workdir, "/workspace");
    }
}
