//! Status projection from runtime unit states.

use crate::context::Context;
use crate::instance::Instance;
use crate::lifecycle::LifecycleState;
use flotilla_runtime::UnitStatus;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Unknown,
}

impl From<UnitStatus> for VmStatus {
    fn from(status: UnitStatus) -> Self {
        match status {
            // A paused guest still holds its resources.
            UnitStatus::Running | UnitStatus::Pausing | UnitStatus::Paused => VmStatus::Running,
            UnitStatus::Created | UnitStatus::Stopped => VmStatus::Stopped,
            UnitStatus::Unknown => VmStatus::Unknown,
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmStatus::Running => write!(f, "running"),
            VmStatus::Stopped => write!(f, "stopped"),
            VmStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One row of [`Orchestrator::list`](crate::Orchestrator::list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSummary {
    pub id: String,
    pub image: String,
    /// Lifecycle state tracked by the orchestrator
    pub state: LifecycleState,
    /// Status reported by the runtime
    pub status: VmStatus,
}

/// Query the runtime for one instance. Errors and timeouts map to
/// [`VmStatus::Unknown`].
pub(crate) async fn project(ctx: &Context, instance: &Instance) -> VmSummary {
    let unit = &instance.handles().unit;
    let status = match ctx.cleanup(ctx.runtime.unit_status(unit)).await {
        Ok(status) => VmStatus::from(status),
        Err(e) => {
            tracing::debug!(instance_id = %instance.id(), error = %e, "Status query failed");
            VmStatus::Unknown
        }
    };

    VmSummary {
        id: instance.id().to_string(),
        image: instance.image().to_string(),
        state: instance.state(),
        status,
    }
}

/// Project every instance concurrently, preserving input order.
pub(crate) async fn project_all(ctx: &Context, instances: &[Instance]) -> Vec<VmSummary> {
    join_all(instances.iter().map(|instance| project(ctx, instance))).await
}
