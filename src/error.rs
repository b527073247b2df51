//! Error types for AppForge

use thiserror::Error;

/// Result type alias using AppForge's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for AppForge
#[derive(Error, Debug)]
pub enum Error {
    /// A sandbox path argument was absolute
    #[error("absolute paths not allowed: {0}")]
    AbsolutePathNotAllowed(String),

    /// A sandbox path argument resolved outside the base directory
    #[error("path {0} is outside base directory")]
    PathOutsideBase(String),

    /// Illegal project lifecycle transition
    #[error("invalid state transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// The persisted project state could not be decoded
    #[error("project state is corrupt: {0}")]
    StateCorrupt(String),

    /// Project sources changed since the last successful validation
    #[error(
        "project has changed since validation (expected checksum {expected}, found {actual}); re-run validation before deploying"
    )]
    ChecksumMismatch { expected: String, actual: String },

    /// No files matched the checksum filters
    #[error("no source files found to checksum in {0}")]
    NoFiles(String),

    /// Another validate/deploy holds the project lock
    #[error("project {0} is busy: another validate or deploy is in progress")]
    ProjectBusy(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sandbox error
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Docker/container error
    #[error("Container error: {0}")]
    Container(String),

    /// A command exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled by its caller
    #[error("operation cancelled")]
    Cancelled,

    /// Deployment step failed
    #[error("Deploy error: {0}")]
    Deploy(String),

    /// Remote deploy call failed on every attempt
    #[error("deployment failed after {attempts} attempts: {last_error}")]
    DeployRetriesExhausted { attempts: u32, last_error: String },

    /// Remote app exists and belongs to someone else
    #[error("app '{name}' already exists and was created by {creator}; pass --force to deploy over it")]
    OwnershipConflict { name: String, creator: String },

    /// Remote API returned an error status
    #[error("Remote API error ({status}): {message}")]
    RemoteApi { status: u16, message: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) | Error::Container(_) => true,
            Error::RemoteApi { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if error is a path containment violation
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Error::AbsolutePathNotAllowed(_) | Error::PathOutsideBase(_)
        )
    }

    /// Check if error can be fixed by re-running an earlier lifecycle step
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidTransition { .. }
                | Error::StateCorrupt(_)
                | Error::ChecksumMismatch { .. }
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        self.is_security_violation()
            || matches!(
                self,
                Error::InvalidInput(_) | Error::NotFound(_) | Error::OwnershipConflict { .. }
            )
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Container(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Io(err.into())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_messages() {
        let abs = Error::AbsolutePathNotAllowed("/etc/passwd".to_string());
        assert!(abs.to_string().contains("absolute paths not allowed"));
        assert!(abs.is_security_violation());

        let outside = Error::PathOutsideBase("../evil.txt".to_string());
        assert!(outside.to_string().contains("outside base directory"));
        assert!(!outside.is_retryable());
    }

    #[test]
    fn test_retryable_detection() {
        let transient = Error::RemoteApi {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(transient.is_retryable());

        let rejected = Error::RemoteApi {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!rejected.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_checksum_mismatch_is_actionable() {
        let err = Error::ChecksumMismatch {
            expected: "abc".to_string(),
            actual: "xyz".to_string(),
        };
        assert!(err.is_state_error());
        assert!(err.to_string().contains("re-run validation"));
    }
}
