//! Tool parameter and response types for MCP tools.
//!
//! These types use serde for serialization and schemars for the JSON
//! Schema every MCP tool advertises.

use flotilla_core::{TeardownReport, VmSummary};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for creating a microVM.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateVmParams {
    /// Unique id for the microVM (letters, digits, '-', '_', '.').
    pub id: String,

    /// Image reference, e.g. `alpine:latest`.
    pub image: String,

    /// Memory in MiB (default: server setting, usually 128).
    #[serde(default)]
    pub memory_mib: Option<u32>,

    /// vCPU count (default: server setting, usually 1).
    #[serde(default)]
    pub vcpu_count: Option<u8>,
}

/// Result of creating a microVM.
#[derive(Debug, Serialize, JsonSchema)]
pub struct CreateVmResult {
    pub id: String,
    pub status: String,
}

/// Parameters for tools addressing a single microVM.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VmIdParams {
    /// Id of the microVM.
    pub id: String,
}

/// Result of destroying a microVM.
#[derive(Debug, Serialize, JsonSchema)]
pub struct DestroyVmResult {
    pub id: String,
    /// Lifecycle state the microVM ended in (`stopped` or `failed`).
    pub final_state: String,
    /// Problems hit while releasing resources. Empty on a clean teardown.
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

impl From<TeardownReport> for DestroyVmResult {
    fn from(report: TeardownReport) -> Self {
        Self {
            id: report.id,
            final_state: report.final_state.to_string(),
            warnings: report.warnings.iter().map(ToString::to_string).collect(),
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

/// Information about one microVM.
#[derive(Debug, Serialize, JsonSchema)]
pub struct VmInfo {
    pub id: String,
    pub image: String,
    /// Orchestrator lifecycle state.
    pub state: String,
    /// Runtime status: running, stopped or unknown.
    pub status: String,
}

impl From<VmSummary> for VmInfo {
    fn from(vm: VmSummary) -> Self {
        Self {
            id: vm.id,
            image: vm.image,
            state: vm.state.to_string(),
            status: vm.status.to_string(),
        }
    }
}

/// Result of listing microVMs.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListVmsResult {
    pub vms: Vec<VmInfo>,
}
