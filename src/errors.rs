//! Error types for portfolio workflow operations
//!
//! Each variant carries a stable code so callers (and the CLI) can tell a
//! missing record from a stale write or a refused token without parsing text.

use thiserror::Error;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Main error type for the library
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A workflow, operation, step or token does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Input rejected before anything was stored
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Optimistic concurrency check failed on save
    #[error("Version conflict on {key}: version {expected} is stale")]
    Conflict { key: String, expected: u64 },

    /// The supplied token does not unlock the step
    #[error("Token rejected for step {step_id}")]
    TokenRejected { step_id: String },

    /// The actor may not act on this step right now
    #[error("Step {step_id} cannot be advanced: {reason}")]
    NotPermitted { step_id: String, reason: String },

    /// The backend could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with an unexpected status
    #[error("Remote error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    /// Unknown currency or unusable rate
    #[error("Currency error: {0}")]
    Currency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Get the error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "NOT_FOUND",
            WorkflowError::Validation(_) => "VALIDATION",
            WorkflowError::Conflict { .. } => "CONFLICT",
            WorkflowError::TokenRejected { .. } => "TOKEN_REJECTED",
            WorkflowError::NotPermitted { .. } => "NOT_PERMITTED",
            WorkflowError::Transport(_) => "TRANSPORT",
            WorkflowError::Remote { .. } => "REMOTE",
            WorkflowError::Currency(_) => "CURRENCY",
            WorkflowError::Io(_) => "IO_ERROR",
            WorkflowError::Serialization(_) => "SERIALIZATION",
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        WorkflowError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn not_permitted(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkflowError::NotPermitted {
            step_id: step_id.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure came from reaching the backend rather than from
    /// what the backend said.
    pub fn is_transport(&self) -> bool {
        matches!(self, WorkflowError::Transport(_))
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            WorkflowError::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            WorkflowError::Validation(format!("malformed response body: {err}"))
        } else {
            WorkflowError::Transport(err.to_string())
        }
    }
}

/// Convert an error to a process exit code
pub fn to_exit_code(error: &WorkflowError) -> i32 {
    match error {
        WorkflowError::Conflict { .. } => 3,
        WorkflowError::TokenRejected { .. } | WorkflowError::NotPermitted { .. } => 2,
        _ => 1,
    }
}
