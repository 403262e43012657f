//! Error types for flotilla-runtime.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for runtime adapter operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors reported by a [`RuntimeClient`](crate::RuntimeClient).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Image reference could not be resolved or fetched
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Sandbox is not known to the runtime
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// Execution unit is not known to the runtime
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// Resource with the same key already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Failed to create a sandbox or unit
    #[error("failed to create: {0}")]
    Create(String),

    /// Failed to start a unit
    #[error("failed to start unit: {0}")]
    Start(String),

    /// Failed to deliver a signal
    #[error("failed to signal unit: {0}")]
    Signal(String),

    /// Failed to delete a unit or sandbox
    #[error("failed to delete: {0}")]
    Delete(String),

    /// Failed to query unit status
    #[error("failed to query status: {0}")]
    Status(String),

    /// Unit is not in the state the operation requires
    #[error("invalid unit state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Firecracker/firepilot error
    #[error("firepilot error: {0}")]
    Firepilot(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation did not complete within its bound
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,
}

impl RuntimeError {
    /// Whether the error means the target resource no longer exists.
    ///
    /// Deletes treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SandboxNotFound(_) | Self::UnitNotFound(_) | Self::ImageNotFound(_)
        )
    }

    /// Whether the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
