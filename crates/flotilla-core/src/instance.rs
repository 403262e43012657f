//! Registered instance records.

use crate::lifecycle::{Lifecycle, LifecycleState};
use chrono::{DateTime, Utc};
use flotilla_runtime::{ResourceLimits, SandboxHandle, UnitHandle};

/// Runtime handles owned by one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandles {
    pub sandbox: SandboxHandle,
    pub unit: UnitHandle,
}

/// A microVM the orchestrator has started and registered.
#[derive(Debug, Clone)]
pub struct Instance {
    image: String,
    handles: RuntimeHandles,
    limits: ResourceLimits,
    lifecycle: Lifecycle,
}

impl Instance {
    pub(crate) fn new(
        image: String,
        handles: RuntimeHandles,
        limits: ResourceLimits,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            image,
            handles,
            limits,
            lifecycle,
        }
    }

    /// Caller-supplied instance id.
    pub fn id(&self) -> &str {
        self.lifecycle.id()
    }

    /// Image reference the instance was created from.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn handles(&self) -> &RuntimeHandles {
        &self.handles
    }

    /// Limits actually applied to the sandbox.
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.lifecycle.created_at()
    }

    pub fn last_transition_at(&self) -> DateTime<Utc> {
        self.lifecycle.last_transition_at()
    }

    pub(crate) fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }
}
