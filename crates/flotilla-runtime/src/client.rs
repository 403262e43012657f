//! The runtime client contract.

use crate::error::Result;
use crate::types::{
    ExitInfo, ImageHandle, ResourceLimits, SandboxHandle, Signal, UnitHandle, UnitStatus,
};
use async_trait::async_trait;
use std::time::Duration;

/// Capability interface to an external VM runtime.
///
/// Every call is scoped to the isolation namespace the adapter was
/// constructed with. Implementations own their connections and sessions;
/// callers only hold the handles returned here.
///
/// This abstraction allows different backends (Firecracker, an in-memory
/// fake for tests) to be swapped without changing orchestration logic.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Isolation namespace all resources are created in.
    fn namespace(&self) -> &str;

    /// Resolve and fetch an image.
    ///
    /// # Errors
    /// Returns [`RuntimeError::Timeout`](crate::RuntimeError::Timeout) if the
    /// pull does not finish within `timeout`.
    async fn pull_image(&self, reference: &str, timeout: Duration) -> Result<ImageHandle>;

    /// Create a sandbox (and its writable layer) for instance `id`.
    async fn create_sandbox(
        &self,
        id: &str,
        image: &ImageHandle,
        limits: &ResourceLimits,
    ) -> Result<SandboxHandle>;

    /// Create the execution unit inside a sandbox. The unit is not started.
    async fn create_unit(&self, sandbox: &SandboxHandle) -> Result<UnitHandle>;

    /// Start a created unit.
    async fn start_unit(&self, unit: &UnitHandle) -> Result<()>;

    /// Deliver a signal to a unit.
    async fn signal_unit(&self, unit: &UnitHandle, signal: Signal) -> Result<()>;

    /// Wait for a unit to reach a terminal run state.
    ///
    /// # Errors
    /// Returns [`RuntimeError::Timeout`](crate::RuntimeError::Timeout) if the
    /// unit is still running after `timeout`.
    async fn wait_unit(&self, unit: &UnitHandle, timeout: Duration) -> Result<ExitInfo>;

    /// Delete a unit's record. Deleting an absent unit succeeds.
    async fn delete_unit(&self, unit: &UnitHandle) -> Result<()>;

    /// Delete a sandbox and its writable layer. Deleting an absent sandbox
    /// succeeds.
    async fn delete_sandbox(&self, sandbox: &SandboxHandle) -> Result<()>;

    /// Enumerate sandboxes that exist in the namespace.
    async fn list_sandboxes(&self) -> Result<Vec<SandboxHandle>>;

    /// Query the native run status of a unit.
    async fn unit_status(&self, unit: &UnitHandle) -> Result<UnitStatus>;
}
