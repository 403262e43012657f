//! Handle and value types exchanged with a runtime adapter.

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource limits applied to a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory in MiB (default: 128).
    pub memory_mib: u32,
    /// vCPU count (default: 1).
    pub vcpu_count: u8,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mib: 128,
            vcpu_count: 1,
        }
    }
}

impl ResourceLimits {
    /// Create limits with the given memory and vCPU count.
    pub fn new(memory_mib: u32, vcpu_count: u8) -> Self {
        Self {
            memory_mib,
            vcpu_count,
        }
    }

    /// Reject zero-sized limits.
    pub fn validate(&self) -> Result<()> {
        if self.memory_mib == 0 {
            return Err(RuntimeError::Config("memory_mib must be > 0".into()));
        }
        if self.vcpu_count == 0 {
            return Err(RuntimeError::Config("vcpu_count must be > 0".into()));
        }
        Ok(())
    }
}

/// A pulled image, ready to back a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHandle {
    /// Reference the caller asked for (e.g. `alpine:latest`).
    pub reference: String,
    /// Where the runtime keeps the resolved image.
    pub location: String,
}

/// An isolated execution environment and its writable layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Instance id the sandbox was created for.
    pub instance_id: String,
    /// Runtime-unique key. Two sandboxes created for the same instance id
    /// never share a key.
    pub key: String,
    /// Isolation namespace the sandbox lives in.
    pub namespace: String,
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// The execution unit (task) running inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitHandle {
    /// Runtime-unique unit key.
    pub key: String,
    /// Key of the owning sandbox.
    pub sandbox_key: String,
}

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Signal delivered to an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the workload to shut down.
    Terminate,
    /// Stop the workload immediately.
    Kill,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Exit information for a unit that reached a terminal run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, when the runtime can report one.
    pub exit_code: Option<i32>,
}

/// Native run status reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Created but never started
    Created,
    /// Running
    Running,
    /// Pause requested
    Pausing,
    /// Paused
    Paused,
    /// Exited
    Stopped,
    /// Runtime could not tell
    Unknown,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Created => write!(f, "created"),
            UnitStatus::Running => write!(f, "running"),
            UnitStatus::Pausing => write!(f, "pausing"),
            UnitStatus::Paused => write!(f, "paused"),
            UnitStatus::Stopped => write!(f, "stopped"),
            UnitStatus::Unknown => write!(f, "unknown"),
        }
    }
}
