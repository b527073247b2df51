//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // JSON5 is a superset of JSON and allows comments
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Env vars have the
/// highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

fn apply_overrides_from(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    use secrecy::SecretString;

    // Sandbox overrides
    if let Some(backend) = var("APPFORGE_SANDBOX_BACKEND") {
        if let Ok(backend) = backend.parse() {
            config.sandbox.backend = backend;
        }
    }
    if let Some(image) = var("APPFORGE_CONTAINER_IMAGE") {
        config.sandbox.container.image = image;
    }
    if let Some(timeout) = var("APPFORGE_CONTAINER_TIMEOUT") {
        if let Ok(v) = humantime_serde::re::humantime::parse_duration(&timeout) {
            config.sandbox.container.exec_timeout = v;
        }
    }

    // Validation overrides
    if let Some(command) = var("APPFORGE_VALIDATION_COMMAND") {
        config.validation.custom_command = Some(command).filter(|c| !c.trim().is_empty());
    }
    if let Some(timeout) = var("APPFORGE_VALIDATION_TIMEOUT") {
        if let Ok(v) = humantime_serde::re::humantime::parse_duration(&timeout) {
            config.validation.step_timeout = v;
        }
    }

    // Deploy overrides
    if let Some(attempts) = var("APPFORGE_DEPLOY_MAX_ATTEMPTS") {
        if let Ok(v) = attempts.parse() {
            config.deploy.retry.max_attempts = v;
        }
    }

    // Remote workspace overrides
    if let Some(host) = var("DATABRICKS_HOST") {
        config.remote.host = Some(host);
    }
    if let Some(token) = var("DATABRICKS_TOKEN") {
        config.remote.token = SecretString::from(token);
    }
    if let Some(warehouse) = var("DATABRICKS_WAREHOUSE_ID") {
        config.remote.warehouse_id = Some(warehouse);
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
