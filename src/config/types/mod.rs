//! Configuration types module
//!
//! One submodule per configuration section.

pub mod pipeline;
pub mod remote;
pub mod sandbox;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sandbox configuration
    #[serde(default)]
    pub sandbox: sandbox::SandboxConfig,

    /// Validation pipeline configuration
    #[serde(default)]
    pub validation: pipeline::ValidationConfig,

    /// Deployment configuration
    #[serde(default)]
    pub deploy: pipeline::DeployConfig,

    /// Remote workspace configuration
    #[serde(default)]
    pub remote: remote::RemoteConfig,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// Layers, lowest precedence first:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}
