//! Configuration module - Layered configuration management
//!
//! - types/mod.rs: Root `Config`
//! - types/sandbox.rs: Sandbox backend and container settings
//! - types/pipeline.rs: Validation and deployment settings
//! - types/remote.rs: Remote workspace credentials
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::Config;

pub use types::pipeline::{DeployConfig, RetryConfig, ValidationConfig};
pub use types::remote::RemoteConfig;
pub use types::sandbox::{ContainerConfig, SandboxBackend, SandboxConfig};

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
