//! In-memory runtime for tests and local development.
//!
//! `FakeRuntime` keeps images, sandboxes and units in a map guarded by a
//! plain mutex and lets tests inject failures at any stage, slow every call
//! down, or make units ignore termination.

use crate::client::RuntimeClient;
use crate::error::{Result, RuntimeError};
use crate::types::{
    ExitInfo, ImageHandle, ResourceLimits, SandboxHandle, Signal, UnitHandle, UnitStatus,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How often `wait_unit` re-checks unit status.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Adapter call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeStage {
    Pull,
    CreateSandbox,
    CreateUnit,
    StartUnit,
    SignalUnit,
    WaitUnit,
    DeleteUnit,
    DeleteSandbox,
    ListSandboxes,
    UnitStatus,
}

#[derive(Debug)]
struct FakeSandbox {
    handle: SandboxHandle,
    limits: ResourceLimits,
}

#[derive(Debug)]
struct FakeUnit {
    handle: UnitHandle,
    instance_id: String,
    status: UnitStatus,
}

#[derive(Debug, Default)]
struct FakeState {
    pulled: HashSet<String>,
    sandboxes: HashMap<String, FakeSandbox>,
    units: HashMap<String, FakeUnit>,
    failures: HashSet<FakeStage>,
    rejected_images: HashSet<String>,
    ignore_terminate: bool,
    calls: HashMap<FakeStage, usize>,
}

/// In-memory [`RuntimeClient`] with failure injection.
#[derive(Debug)]
pub struct FakeRuntime {
    namespace: String,
    state: Mutex<FakeState>,
    delay: Mutex<Duration>,
    next_key: AtomicU64,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new("flotilla-test")
    }
}

impl FakeRuntime {
    /// Create an empty runtime scoped to `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(FakeState::default()),
            delay: Mutex::new(Duration::ZERO),
            next_key: AtomicU64::new(1),
        }
    }

    /// Make every call at `stage` fail until cleared.
    pub fn fail_at(&self, stage: FakeStage) {
        self.lock().failures.insert(stage);
    }

    /// Stop failing calls at `stage`.
    pub fn clear_failure(&self, stage: FakeStage) {
        self.lock().failures.remove(&stage);
    }

    /// Make pulls of `reference` fail with `ImageNotFound`.
    pub fn reject_image(&self, reference: impl Into<String>) {
        self.lock().rejected_images.insert(reference.into());
    }

    /// When set, `Terminate` is accepted but the unit keeps running.
    /// `Kill` still stops it.
    pub fn ignore_terminate(&self, ignore: bool) {
        self.lock().ignore_terminate = ignore;
    }

    /// Sleep this long before serving any call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Mark the unit of `instance_id` as exited, as if the workload crashed.
    pub fn mark_exited(&self, instance_id: &str) {
        let mut state = self.lock();
        for unit in state.units.values_mut() {
            if unit.instance_id == instance_id {
                unit.status = UnitStatus::Stopped;
            }
        }
    }

    /// Sandboxes currently allocated.
    pub fn live_sandboxes(&self) -> Vec<SandboxHandle> {
        let state = self.lock();
        let mut sandboxes: Vec<_> = state.sandboxes.values().map(|s| s.handle.clone()).collect();
        sandboxes.sort_by(|a, b| a.key.cmp(&b.key));
        sandboxes
    }

    /// Units currently allocated.
    pub fn live_units(&self) -> Vec<UnitHandle> {
        let state = self.lock();
        let mut units: Vec<_> = state.units.values().map(|u| u.handle.clone()).collect();
        units.sort_by(|a, b| a.key.cmp(&b.key));
        units
    }

    /// Limits a live sandbox was created with.
    pub fn sandbox_limits(&self, key: &str) -> Option<ResourceLimits> {
        self.lock().sandboxes.get(key).map(|s| s.limits)
    }

    /// Number of calls made at `stage`, failed ones included.
    pub fn calls(&self, stage: FakeStage) -> usize {
        self.lock().calls.get(&stage).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call, apply the configured delay and injected failure.
    async fn enter(&self, stage: FakeStage) -> Result<()> {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        *state.calls.entry(stage).or_default() += 1;
        if state.failures.contains(&stage) {
            tracing::debug!(?stage, "Injected failure");
            return Err(injected(stage));
        }
        Ok(())
    }

    fn next_key(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_key.fetch_add(1, Ordering::Relaxed))
    }

    async fn wait_exit(&self, unit: &UnitHandle) -> Result<ExitInfo> {
        loop {
            match self.unit_state(unit)? {
                UnitStatus::Stopped | UnitStatus::Created => {
                    return Ok(ExitInfo { exit_code: Some(0) })
                }
                _ => tokio::time::sleep(WAIT_POLL_INTERVAL).await,
            }
        }
    }

    fn unit_state(&self, unit: &UnitHandle) -> Result<UnitStatus> {
        self.lock()
            .units
            .get(&unit.key)
            .map(|u| u.status)
            .ok_or_else(|| RuntimeError::UnitNotFound(unit.key.clone()))
    }
}

fn injected(stage: FakeStage) -> RuntimeError {
    let message = format!("injected failure at {stage:?}");
    match stage {
        FakeStage::Pull => RuntimeError::ImageNotFound(message),
        FakeStage::CreateSandbox | FakeStage::CreateUnit => RuntimeError::Create(message),
        FakeStage::StartUnit => RuntimeError::Start(message),
        FakeStage::SignalUnit => RuntimeError::Signal(message),
        FakeStage::DeleteUnit | FakeStage::DeleteSandbox => RuntimeError::Delete(message),
        FakeStage::WaitUnit | FakeStage::ListSandboxes | FakeStage::UnitStatus => {
            RuntimeError::Status(message)
        }
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn pull_image(&self, reference: &str, _timeout: Duration) -> Result<ImageHandle> {
        self.enter(FakeStage::Pull).await?;

        let mut state = self.lock();
        if reference.is_empty() || state.rejected_images.contains(reference) {
            return Err(RuntimeError::ImageNotFound(reference.to_string()));
        }
        state.pulled.insert(reference.to_string());

        Ok(ImageHandle {
            reference: reference.to_string(),
            location: format!("fake://{}/{}", self.namespace, reference),
        })
    }

    async fn create_sandbox(
        &self,
        id: &str,
        image: &ImageHandle,
        limits: &ResourceLimits,
    ) -> Result<SandboxHandle> {
        self.enter(FakeStage::CreateSandbox).await?;
        limits.validate()?;

        let key = self.next_key(id);
        let mut state = self.lock();
        if !state.pulled.contains(&image.reference) {
            return Err(RuntimeError::ImageNotFound(image.reference.clone()));
        }

        let handle = SandboxHandle {
            instance_id: id.to_string(),
            key: key.clone(),
            namespace: self.namespace.clone(),
        };
        state.sandboxes.insert(
            key,
            FakeSandbox {
                handle: handle.clone(),
                limits: *limits,
            },
        );
        Ok(handle)
    }

    async fn create_unit(&self, sandbox: &SandboxHandle) -> Result<UnitHandle> {
        self.enter(FakeStage::CreateUnit).await?;

        let key = format!("{}/unit", sandbox.key);
        let mut state = self.lock();
        if sandbox.namespace != self.namespace || !state.sandboxes.contains_key(&sandbox.key) {
            return Err(RuntimeError::SandboxNotFound(sandbox.key.clone()));
        }
        if state.units.contains_key(&key) {
            return Err(RuntimeError::AlreadyExists(key));
        }

        let handle = UnitHandle {
            key: key.clone(),
            sandbox_key: sandbox.key.clone(),
        };
        state.units.insert(
            key,
            FakeUnit {
                handle: handle.clone(),
                instance_id: sandbox.instance_id.clone(),
                status: UnitStatus::Created,
            },
        );
        Ok(handle)
    }

    async fn start_unit(&self, unit: &UnitHandle) -> Result<()> {
        self.enter(FakeStage::StartUnit).await?;

        let mut state = self.lock();
        let entry = state
            .units
            .get_mut(&unit.key)
            .ok_or_else(|| RuntimeError::UnitNotFound(unit.key.clone()))?;
        if entry.status != UnitStatus::Created {
            return Err(RuntimeError::InvalidState {
                expected: UnitStatus::Created.to_string(),
                actual: entry.status.to_string(),
            });
        }
        entry.status = UnitStatus::Running;
        Ok(())
    }

    async fn signal_unit(&self, unit: &UnitHandle, signal: Signal) -> Result<()> {
        self.enter(FakeStage::SignalUnit).await?;

        let mut state = self.lock();
        let ignore_terminate = state.ignore_terminate;
        let entry = state
            .units
            .get_mut(&unit.key)
            .ok_or_else(|| RuntimeError::UnitNotFound(unit.key.clone()))?;
        match signal {
            Signal::Terminate if ignore_terminate => {
                tracing::debug!(unit = %unit, "Fake unit ignoring termination");
            }
            _ => entry.status = UnitStatus::Stopped,
        }
        Ok(())
    }

    async fn wait_unit(&self, unit: &UnitHandle, timeout: Duration) -> Result<ExitInfo> {
        self.enter(FakeStage::WaitUnit).await?;

        tokio::time::timeout(timeout, self.wait_exit(unit))
            .await
            .unwrap_or(Err(RuntimeError::Timeout(timeout)))
    }

    async fn delete_unit(&self, unit: &UnitHandle) -> Result<()> {
        self.enter(FakeStage::DeleteUnit).await?;
        self.lock().units.remove(&unit.key);
        Ok(())
    }

    async fn delete_sandbox(&self, sandbox: &SandboxHandle) -> Result<()> {
        self.enter(FakeStage::DeleteSandbox).await?;

        let mut state = self.lock();
        state.sandboxes.remove(&sandbox.key);
        // Deleting a sandbox takes its units with it.
        state.units.retain(|_, u| u.handle.sandbox_key != sandbox.key);
        Ok(())
    }

    async fn list_sandboxes(&self) -> Result<Vec<SandboxHandle>> {
        self.enter(FakeStage::ListSandboxes).await?;
        Ok(self.live_sandboxes())
    }

    async fn unit_status(&self, unit: &UnitHandle) -> Result<UnitStatus> {
        self.enter(FakeStage::UnitStatus).await?;
        self.unit_state(unit)
    }
}
