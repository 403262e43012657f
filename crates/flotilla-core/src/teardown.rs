//! Teardown pipeline: terminate, bounded wait, kill, delete.

use crate::context::{bounded, Context};
use crate::error::{CleanupFailure, CleanupStep, CoreError, Result};
use crate::instance::Instance;
use crate::lifecycle::LifecycleState;
use flotilla_runtime::Signal;
use std::time::{Duration, Instant};

/// Non-fatal problem hit while tearing an instance down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownWarning {
    /// The unit did not exit within the bound and was killed.
    Timeout(Duration),
    /// A cleanup step failed; runtime resources may be left behind.
    Cleanup(CleanupFailure),
}

impl std::fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeardownWarning::Timeout(t) => write!(f, "unit did not exit within {t:?}, killed"),
            TeardownWarning::Cleanup(failure) => write!(f, "{failure}"),
        }
    }
}

/// Outcome of tearing down one instance.
#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub id: String,
    /// `Stopped`, or `Failed` when the wait expired.
    pub final_state: LifecycleState,
    pub warnings: Vec<TeardownWarning>,
    pub elapsed: Duration,
}

impl TeardownReport {
    /// Whether the teardown finished without warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Turn warnings into an error for callers that want strict semantics.
    ///
    /// # Errors
    /// [`CoreError::TeardownTimeout`] if the wait expired, otherwise
    /// [`CoreError::PartialCleanupFailure`] if any cleanup step failed.
    pub fn into_result(self) -> Result<Self> {
        if self.is_clean() {
            return Ok(self);
        }

        let mut timeout = None;
        let mut failures = Vec::new();
        for warning in self.warnings {
            match warning {
                TeardownWarning::Timeout(t) => timeout = Some(t),
                TeardownWarning::Cleanup(failure) => failures.push(failure),
            }
        }

        Err(match timeout {
            Some(timeout) => CoreError::TeardownTimeout {
                id: self.id,
                timeout,
                warnings: failures,
            },
            None => CoreError::PartialCleanupFailure {
                id: self.id,
                warnings: failures,
            },
        })
    }
}

/// Claim a registered instance, dismantle it and drop it from the registry.
pub(crate) async fn destroy(ctx: &Context, id: &str) -> Result<TeardownReport> {
    let instance = ctx.registry.begin_teardown(id).await?;
    tracing::info!(instance_id = %id, "Destroying instance");

    let report = dismantle(ctx, instance).await;

    // The runtime calls were all attempted; the entry goes regardless.
    if ctx.registry.remove(id).await.is_err() {
        tracing::debug!(instance_id = %id, "Instance already unregistered");
    }
    Ok(report)
}

/// Tear down a started instance that is in `Stopping`.
///
/// Never fails: problems become warnings on the report. The caller owns
/// the registry entry, if any.
pub(crate) async fn dismantle(ctx: &Context, mut instance: Instance) -> TeardownReport {
    let start = Instant::now();
    let id = instance.id().to_string();
    let handles = instance.handles().clone();
    let unit = &handles.unit;
    let wait_bound = ctx.config.teardown_timeout;
    let mut warnings = Vec::new();

    let mut kill = false;
    match ctx
        .cleanup(ctx.runtime.signal_unit(unit, Signal::Terminate))
        .await
    {
        Ok(()) => {
            // The outer bound covers adapters that do not honor their own timeout.
            match bounded(wait_bound, ctx.runtime.wait_unit(unit, wait_bound)).await {
                Ok(exit) => {
                    tracing::debug!(instance_id = %id, exit_code = ?exit.exit_code, "Unit exited");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) if e.is_timeout() => {
                    tracing::warn!(
                        instance_id = %id,
                        timeout_ms = wait_bound.as_millis() as u64,
                        "Unit did not exit in time, killing"
                    );
                    warnings.push(TeardownWarning::Timeout(wait_bound));
                    instance.lifecycle_mut().fail();
                    kill = true;
                }
                Err(e) => {
                    tracing::warn!(instance_id = %id, error = %e, "Wait failed, killing");
                    warnings.push(TeardownWarning::Cleanup(CleanupFailure::new(
                        CleanupStep::WaitUnit,
                        &e,
                    )));
                    kill = true;
                }
            }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            tracing::warn!(instance_id = %id, error = %e, "Terminate failed, killing");
            warnings.push(TeardownWarning::Cleanup(CleanupFailure::new(
                CleanupStep::SignalUnit,
                &e,
            )));
            kill = true;
        }
    }

    if kill {
        if let Err(e) = ctx.cleanup(ctx.runtime.signal_unit(unit, Signal::Kill)).await {
            if !e.is_not_found() {
                tracing::warn!(instance_id = %id, error = %e, "Kill failed");
                warnings.push(TeardownWarning::Cleanup(CleanupFailure::new(
                    CleanupStep::KillUnit,
                    &e,
                )));
            }
        }
    }

    if let Err(e) = ctx.cleanup(ctx.runtime.delete_unit(unit)).await {
        if !e.is_not_found() {
            tracing::warn!(instance_id = %id, error = %e, "Unit deletion failed");
            warnings.push(TeardownWarning::Cleanup(CleanupFailure::new(
                CleanupStep::DeleteUnit,
                &e,
            )));
        }
    }

    if let Err(e) = ctx.cleanup(ctx.runtime.delete_sandbox(&handles.sandbox)).await {
        if !e.is_not_found() {
            tracing::warn!(instance_id = %id, error = %e, "Sandbox deletion failed");
            warnings.push(TeardownWarning::Cleanup(CleanupFailure::new(
                CleanupStep::DeleteSandbox,
                &e,
            )));
        }
    }

    if instance.state() == LifecycleState::Stopping {
        if let Err(e) = instance.lifecycle_mut().advance(LifecycleState::Stopped) {
            tracing::error!(instance_id = %id, error = %e, "Unexpected lifecycle state");
            instance.lifecycle_mut().fail();
        }
    }

    let elapsed = start.elapsed();
    tracing::info!(
        instance_id = %id,
        final_state = %instance.state(),
        warnings = warnings.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Instance torn down"
    );

    TeardownReport {
        id,
        final_state: instance.state(),
        warnings,
        elapsed,
    }
}
