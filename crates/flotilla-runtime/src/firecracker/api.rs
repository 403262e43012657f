//! Direct calls to the Firecracker API socket.
//!
//! firepilot does not expose machine sizing, guest shutdown or instance
//! info, so these go over the socket with hyper.

use crate::error::{Result, RuntimeError};
use crate::types::{ResourceLimits, UnitStatus};
use firepilot_models::models::MachineConfiguration;
use hyper::{Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, Uri};
use std::path::Path;

/// Apply memory and vCPU limits. Must be called before InstanceStart.
pub async fn configure_machine(socket_path: &Path, limits: &ResourceLimits) -> Result<()> {
    tracing::debug!(
        vcpu_count = limits.vcpu_count,
        memory_mib = limits.memory_mib,
        "Configuring machine resources"
    );

    let config = MachineConfiguration::new(limits.memory_mib as i32, limits.vcpu_count as i32);
    let body = serde_json::to_string(&config)?;

    let uri: hyper::Uri = Uri::new(socket_path, "/machine-config").into();
    let request = Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .map_err(|e| RuntimeError::Config(format!("machine config request: {e}")))?;

    let response = Client::unix()
        .request(request)
        .await
        .map_err(|e| RuntimeError::Firepilot(format!("machine config request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .unwrap_or_default();
        return Err(RuntimeError::Firepilot(format!(
            "machine config failed with status {}: {}",
            status,
            String::from_utf8_lossy(&body)
        )));
    }
    Ok(())
}

/// Ask the guest to shut down via `PUT /actions` with `SendCtrlAltDel`.
pub async fn send_ctrl_alt_del(socket_path: &Path) -> Result<()> {
    let body = serde_json::json!({ "action_type": "SendCtrlAltDel" }).to_string();

    let uri: hyper::Uri = Uri::new(socket_path, "/actions").into();
    let request = Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .map_err(|e| RuntimeError::Signal(format!("action request: {e}")))?;

    let response = Client::unix().request(request).await.map_err(|e| {
        if e.is_connect() {
            RuntimeError::UnitNotFound(socket_path.display().to_string())
        } else {
            RuntimeError::Signal(format!("action request failed: {e}"))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(RuntimeError::Signal(format!(
            "SendCtrlAltDel failed with status {status}"
        )));
    }
    Ok(())
}

/// Query `GET /` and return the reported instance state.
///
/// Returns `Ok(None)` when nothing answers on the socket, which means the
/// Firecracker process is gone.
pub async fn instance_state(socket_path: &Path) -> Result<Option<String>> {
    let uri: hyper::Uri = Uri::new(socket_path, "/").into();

    let response = match Client::unix().get(uri).await {
        Ok(response) => response,
        Err(e) if e.is_connect() => return Ok(None),
        Err(e) => {
            return Err(RuntimeError::Status(format!(
                "instance info request failed: {e}"
            )))
        }
    };

    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| RuntimeError::Status(format!("instance info body: {e}")))?;
    if !status.is_success() {
        return Err(RuntimeError::Status(format!(
            "instance info failed with status {status}"
        )));
    }

    parse_instance_state(&body).map(Some)
}

/// Extract the `state` field of an InstanceInfo document.
pub(crate) fn parse_instance_state(body: &[u8]) -> Result<String> {
    let info: serde_json::Value = serde_json::from_slice(body)?;
    info.get("state")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .ok_or_else(|| RuntimeError::Status("instance info has no state".into()))
}

/// Map an InstanceInfo state onto [`UnitStatus`]. `None` means the process
/// has exited.
pub(crate) fn unit_status_from(state: Option<&str>) -> UnitStatus {
    match state {
        None => UnitStatus::Stopped,
        Some("Running") => UnitStatus::Running,
        Some("Paused") => UnitStatus::Paused,
        Some("Not started") => UnitStatus::Created,
        Some(_) => UnitStatus::Unknown,
    }
}
