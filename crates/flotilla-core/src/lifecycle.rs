//! Per-instance lifecycle state machine.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an instance.
///
/// ```text
/// Unregistered -> Pulling -> SandboxCreated -> Starting -> Running
///                                                            |
///                                          Stopped <- Stopping
///
/// any non-terminal state -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Request accepted, nothing created yet
    Unregistered,
    /// Image pull in progress
    Pulling,
    /// Sandbox exists, unit not yet created
    SandboxCreated,
    /// Unit created and being started
    Starting,
    /// Unit started; the instance is registered
    Running,
    /// Teardown in progress
    Stopping,
    /// Teardown completed normally
    Stopped,
    /// Creation or teardown failed
    Failed,
}

impl LifecycleState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Unregistered, Pulling)
            | (Pulling, SandboxCreated)
            | (SandboxCreated, Starting)
            | (Starting, Running)
            | (Running, Stopping)
            | (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unregistered => "unregistered",
            LifecycleState::Pulling => "pulling",
            LifecycleState::SandboxCreated => "sandbox_created",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Current state of one instance plus transition timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    id: String,
    state: LifecycleState,
    created_at: DateTime<Utc>,
    last_transition_at: DateTime<Utc>,
}

impl Lifecycle {
    /// Start a lifecycle in [`LifecycleState::Unregistered`].
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: LifecycleState::Unregistered,
            created_at: now,
            last_transition_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.last_transition_at
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidTransition`] for an edge the state
    /// machine does not allow. The state is left unchanged.
    pub fn advance(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(instance_id = %self.id, from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        self.last_transition_at = Utc::now();
        Ok(())
    }

    /// Force the lifecycle into [`LifecycleState::Failed`]. No-op once
    /// terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = LifecycleState::Failed;
            self.last_transition_at = Utc::now();
        }
    }
}
