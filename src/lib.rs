//! # AppForge
//!
//! Sandboxed validation and checksum-gated deployment of agent-generated
//! projects.
//!
//! ## Features
//!
//! - **Sandboxes:** Host-directory or Docker-container execution behind one
//!   [`sandbox::Sandbox`] trait, with path containment on every operation
//! - **Lifecycle:** `Scaffolded -> Validated -> Deployed`, persisted per project
//! - **Drift Detection:** BLAKE3 checksum of project sources gates deployment
//! - **Validation:** Build, type-check and test steps (or one custom command)
//! - **Deployment:** Local build, remote sync and retried deploy calls

pub mod config;
pub mod deploy;
pub mod error;
pub mod metrics;
pub mod project;
pub mod sandbox;
pub mod validation;

pub use config::Config;
pub use deploy::{DeployResult, Deployer};
pub use error::{Error, Result};
pub use project::{ChecksumEngine, ProjectState};
pub use validation::{ValidateResult, Validator};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
