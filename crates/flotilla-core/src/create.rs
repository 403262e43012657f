//! Creation pipeline: pull, sandbox, unit, start, register.

use crate::config::OrchestratorConfig;
use crate::context::Context;
use crate::error::{CleanupFailure, CleanupStep, CoreError, Result};
use crate::instance::{Instance, RuntimeHandles};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::teardown;
use flotilla_runtime::{ResourceLimits, RuntimeError, SandboxHandle, UnitHandle};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest accepted instance id.
pub const MAX_ID_LEN: usize = 64;

/// Request to create and start a microVM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Caller-chosen unique id
    pub id: String,
    /// Image reference (e.g. `alpine:latest`)
    pub image: String,
    /// Limits to apply; orchestrator defaults when `None`
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl CreateRequest {
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            limits: None,
        }
    }

    /// Override the default resource limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Check the request and resolve its effective limits.
    pub fn validate(&self, config: &OrchestratorConfig) -> Result<ResourceLimits> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidRequest("id must not be empty".into()));
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(CoreError::InvalidRequest(format!(
                "id must be at most {MAX_ID_LEN} characters"
            )));
        }
        // Ids become directory and socket names in the runtime.
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || self.id.starts_with('.')
        {
            return Err(CoreError::InvalidRequest(format!(
                "id {:?} may only contain ASCII letters, digits, '-', '_' and '.'",
                self.id
            )));
        }
        if self.image.trim().is_empty() {
            return Err(CoreError::InvalidRequest("image must not be empty".into()));
        }

        let limits = self.limits.unwrap_or(config.default_limits);
        limits
            .validate()
            .map_err(|e| CoreError::InvalidRequest(e.to_string()))?;
        Ok(limits)
    }
}

/// Resource to release if a later stage fails.
enum Undo {
    Sandbox(SandboxHandle),
    Unit(UnitHandle),
}

/// Run the whole pipeline. On error, nothing created by this call is left
/// behind in the runtime or the registry, apart from the pulled image.
pub(crate) async fn create(
    ctx: &Context,
    request: CreateRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let limits = request.validate(&ctx.config)?;

    let reserve = ctx.config.reserve_ids;
    ctx.registry.begin_create(&request.id, reserve).await?;

    let result = run(ctx, &request, limits, &cancel).await;

    ctx.registry.finish_create(&request.id, reserve).await;
    result
}

async fn run(
    ctx: &Context,
    request: &CreateRequest,
    limits: ResourceLimits,
    cancel: &CancellationToken,
) -> Result<()> {
    let start = Instant::now();
    let id = request.id.as_str();
    tracing::info!(instance_id = %id, image = %request.image, "Creating instance");

    let mut lifecycle = Lifecycle::new(id);
    let mut undo = Vec::new();

    let handles = match stages(ctx, request, limits, cancel, &mut lifecycle, &mut undo).await {
        Ok(handles) => handles,
        Err(err) => {
            lifecycle.fail();
            tracing::error!(
                instance_id = %id,
                stage = err.stage(),
                error = %err,
                "Instance creation failed, rolling back"
            );
            let failures = rollback(ctx, id, undo).await;
            return Err(err.with_cleanup(failures));
        }
    };

    let instance = Instance::new(request.image.clone(), handles, limits, lifecycle);
    match ctx.registry.insert(instance.clone()).await {
        Ok(()) => {
            tracing::info!(
                instance_id = %id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Instance running"
            );
            Ok(())
        }
        Err(err) => {
            // Lost a same-id race or the orchestrator closed. The started
            // unit is ours alone; the registry entry, if any, is not.
            tracing::warn!(instance_id = %id, error = %err, "Registration refused, tearing down");
            let mut orphan = instance;
            orphan.lifecycle_mut().advance(LifecycleState::Stopping)?;
            let report = teardown::dismantle(ctx, orphan).await;
            if !report.is_clean() {
                tracing::warn!(instance_id = %id, warnings = report.warnings.len(), "Orphan teardown left warnings");
            }
            Err(err)
        }
    }
}

async fn stages(
    ctx: &Context,
    request: &CreateRequest,
    limits: ResourceLimits,
    cancel: &CancellationToken,
    lifecycle: &mut Lifecycle,
    undo: &mut Vec<Undo>,
) -> Result<RuntimeHandles> {
    let id = request.id.as_str();
    let runtime = &ctx.runtime;
    let config = &ctx.config;

    lifecycle.advance(LifecycleState::Pulling)?;
    let image = ctx
        .call(
            cancel,
            config.pull_timeout,
            runtime.pull_image(&request.image, config.pull_timeout),
        )
        .await
        .map_err(|source| CoreError::ImagePullFailed {
            id: id.to_string(),
            source,
        })?;
    tracing::debug!(instance_id = %id, location = %image.location, "Image pulled");

    let sandbox = ctx
        .call(
            cancel,
            config.call_timeout,
            runtime.create_sandbox(id, &image, &limits),
        )
        .await
        .map_err(|source| CoreError::SandboxCreationFailed {
            id: id.to_string(),
            source,
            cleanup: Vec::new(),
        })?;
    undo.push(Undo::Sandbox(sandbox.clone()));
    lifecycle.advance(LifecycleState::SandboxCreated)?;
    tracing::debug!(instance_id = %id, sandbox = %sandbox, "Sandbox created");

    lifecycle.advance(LifecycleState::Starting)?;
    let unit = ctx
        .call(cancel, config.call_timeout, runtime.create_unit(&sandbox))
        .await
        .map_err(|source| CoreError::TaskCreationFailed {
            id: id.to_string(),
            source,
            cleanup: Vec::new(),
        })?;
    undo.push(Undo::Unit(unit.clone()));
    tracing::debug!(instance_id = %id, unit = %unit, "Unit created");

    let started = ctx
        .call(cancel, config.call_timeout, runtime.start_unit(&unit))
        .await;
    // A caller that went away during start gets nothing registered.
    let started = match started {
        Ok(()) if cancel.is_cancelled() => Err(RuntimeError::Cancelled),
        other => other,
    };
    started.map_err(|source| CoreError::StartFailed {
        id: id.to_string(),
        source,
        cleanup: Vec::new(),
    })?;

    lifecycle.advance(LifecycleState::Running)?;
    Ok(RuntimeHandles { sandbox, unit })
}

/// Release everything on the undo stack, newest first. Every step is
/// attempted; failures are collected, never returned early.
async fn rollback(ctx: &Context, id: &str, mut undo: Vec<Undo>) -> Vec<CleanupFailure> {
    let mut failures = Vec::new();

    while let Some(resource) = undo.pop() {
        let (step, result) = match &resource {
            Undo::Unit(unit) => (
                CleanupStep::DeleteUnit,
                ctx.cleanup(ctx.runtime.delete_unit(unit)).await,
            ),
            Undo::Sandbox(sandbox) => (
                CleanupStep::DeleteSandbox,
                ctx.cleanup(ctx.runtime.delete_sandbox(sandbox)).await,
            ),
        };
        match result {
            Ok(()) => tracing::debug!(instance_id = %id, %step, "Rolled back"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(instance_id = %id, %step, error = %e, "Rollback step failed");
                failures.push(CleanupFailure::new(step, &e));
            }
        }
    }
    failures
}
