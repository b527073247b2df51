//! Validation module - run a project's checks inside a sandbox
//!
//! A failed check is a [`ValidateResult`] with `success: false`, never an
//! error. Errors are reserved for infrastructure problems.

mod pipeline;
mod validator;

pub use pipeline::{ValidationPipeline, ValidationStep, ValidationStrategy};
pub use validator::Validator;

use serde::{Deserialize, Serialize};

/// Output of the step that failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDetail {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of a validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ValidationDetail>,
    /// One line at start, then one per finished step
    #[serde(default)]
    pub progress_log: Vec<String>,
    /// `local` or `container`
    pub sandbox_type: String,
}
