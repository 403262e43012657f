//! Error types for flotilla-core.

use crate::lifecycle::LifecycleState;
use flotilla_runtime::RuntimeError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for flotilla-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Rollback or teardown step that can fail after the primary work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    /// Forced kill after an expired wait
    KillUnit,
    /// Graceful termination signal
    SignalUnit,
    /// Waiting for the unit to exit
    WaitUnit,
    /// Unit record deletion
    DeleteUnit,
    /// Sandbox and writable layer deletion
    DeleteSandbox,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStep::KillUnit => write!(f, "kill_unit"),
            CleanupStep::SignalUnit => write!(f, "signal_unit"),
            CleanupStep::WaitUnit => write!(f, "wait_unit"),
            CleanupStep::DeleteUnit => write!(f, "delete_unit"),
            CleanupStep::DeleteSandbox => write!(f, "delete_sandbox"),
        }
    }
}

/// A cleanup step that failed. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    /// Which step failed
    pub step: CleanupStep,
    /// Adapter error, rendered
    pub error: String,
}

impl CleanupFailure {
    pub(crate) fn new(step: CleanupStep, error: &RuntimeError) -> Self {
        Self {
            step,
            error: error.to_string(),
        }
    }
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Errors that can occur during orchestrator operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed request (empty id, bad limits, ...)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid orchestrator configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Instance id is already registered or being created
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    /// Instance id is not registered
    #[error("instance not found: {0}")]
    NotFound(String),

    /// Instance is not in the state the operation requires. `destroy`
    /// returns this while another teardown of the same id is in progress.
    #[error("invalid state for {id}: expected {expected}, got {actual}")]
    InvalidState {
        id: String,
        expected: LifecycleState,
        actual: LifecycleState,
    },

    /// Illegal lifecycle transition
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Orchestrator has been closed
    #[error("orchestrator is closed")]
    Closed,

    /// Image could not be pulled
    #[error("image pull failed for {id}: {source}")]
    ImagePullFailed {
        id: String,
        #[source]
        source: RuntimeError,
    },

    /// Sandbox could not be created
    #[error("sandbox creation failed for {id}: {source}{}", cleanup_suffix(.cleanup))]
    SandboxCreationFailed {
        id: String,
        #[source]
        source: RuntimeError,
        cleanup: Vec<CleanupFailure>,
    },

    /// Execution unit could not be created
    #[error("task creation failed for {id}: {source}{}", cleanup_suffix(.cleanup))]
    TaskCreationFailed {
        id: String,
        #[source]
        source: RuntimeError,
        cleanup: Vec<CleanupFailure>,
    },

    /// Execution unit could not be started
    #[error("start failed for {id}: {source}{}", cleanup_suffix(.cleanup))]
    StartFailed {
        id: String,
        #[source]
        source: RuntimeError,
        cleanup: Vec<CleanupFailure>,
    },

    /// Unit did not exit within the teardown bound and had to be killed
    #[error("teardown of {id} timed out after {timeout:?}{}", cleanup_suffix(.warnings))]
    TeardownTimeout {
        id: String,
        timeout: Duration,
        warnings: Vec<CleanupFailure>,
    },

    /// Instance was removed but some runtime resources may remain
    #[error("partial cleanup of {id}{}", cleanup_suffix(.warnings))]
    PartialCleanupFailure {
        id: String,
        warnings: Vec<CleanupFailure>,
    },

    /// Internal failure (e.g. a pipeline task panicked)
    #[error("internal error: {0}")]
    Internal(String),
}

fn cleanup_suffix(cleanup: &[CleanupFailure]) -> String {
    if cleanup.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = cleanup.iter().map(ToString::to_string).collect();
    format!(" (cleanup failed: {})", rendered.join("; "))
}

impl CoreError {
    /// Pipeline stage the error belongs to, for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_)
            | Self::AlreadyExists(_)
            | Self::NotFound(_)
            | Self::InvalidState { .. }
            | Self::Closed => "precondition",
            Self::Config(_) => "config",
            Self::InvalidTransition { .. } => "lifecycle",
            Self::ImagePullFailed { .. } => "pull_image",
            Self::SandboxCreationFailed { .. } => "create_sandbox",
            Self::TaskCreationFailed { .. } => "create_unit",
            Self::StartFailed { .. } => "start_unit",
            Self::TeardownTimeout { .. } | Self::PartialCleanupFailure { .. } => "teardown",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the request was refused before any runtime call.
    pub fn is_precondition(&self) -> bool {
        self.stage() == "precondition"
    }

    /// Secondary cleanup failures attached to the error.
    pub fn cleanup_failures(&self) -> &[CleanupFailure] {
        match self {
            Self::SandboxCreationFailed { cleanup, .. }
            | Self::TaskCreationFailed { cleanup, .. }
            | Self::StartFailed { cleanup, .. } => cleanup,
            Self::TeardownTimeout { warnings, .. }
            | Self::PartialCleanupFailure { warnings, .. } => warnings,
            _ => &[],
        }
    }

    /// Attach rollback failures to a stage error. Other errors are
    /// returned unchanged.
    pub(crate) fn with_cleanup(mut self, failures: Vec<CleanupFailure>) -> Self {
        if let Self::SandboxCreationFailed { cleanup, .. }
        | Self::TaskCreationFailed { cleanup, .. }
        | Self::StartFailed { cleanup, .. } = &mut self
        {
            cleanup.extend(failures);
        }
        self
    }
}
