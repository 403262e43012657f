//! The orchestrator facade.

use crate::config::OrchestratorConfig;
use crate::context::Context;
use crate::create::{self, CreateRequest};
use crate::error::{CoreError, Result};
use crate::instance::Instance;
use crate::registry::Registry;
use crate::status::{self, VmSummary};
use crate::teardown::{self, TeardownReport};
use flotilla_runtime::RuntimeClient;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of [`Orchestrator::close`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Teardowns that finished before the deadline
    pub reports: Vec<TeardownReport>,
    /// Ids already gone or being torn down by another caller
    pub skipped: Vec<String>,
    /// Ids whose teardown was still running at the deadline
    pub abandoned: Vec<String>,
    /// Ids whose create was still running, or rolling back, at the deadline
    pub pending: Vec<String>,
}

impl ShutdownReport {
    /// Whether every instance was torn down without warnings in time and
    /// no create was left running.
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
            && self.pending.is_empty()
            && self.reports.iter().all(TeardownReport::is_clean)
    }
}

/// Drives microVM lifecycles against a [`RuntimeClient`].
///
/// # Thread Safety
///
/// `Orchestrator` is cheap to clone and safe to share across tasks.
/// Operations on different ids run fully concurrently. Creates and
/// destroys run in their own tasks, so dropping the returned future never
/// abandons half-created or half-destroyed resources.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<Context>,
}

impl Orchestrator {
    /// Create an orchestrator over `runtime`.
    ///
    /// # Errors
    /// Returns [`CoreError::Config`] if the configuration is invalid.
    pub fn new(runtime: Arc<dyn RuntimeClient>, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(namespace = %runtime.namespace(), "Creating orchestrator");
        Ok(Self {
            ctx: Arc::new(Context {
                runtime,
                registry: Registry::new(),
                config,
            }),
        })
    }

    /// Namespace of the underlying runtime.
    pub fn namespace(&self) -> &str {
        self.ctx.runtime.namespace()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.ctx.config
    }

    /// Create, start and register a microVM.
    ///
    /// On error nothing is registered and every runtime resource this call
    /// created has been released, except the pulled image. Rollback
    /// problems are attached to the error.
    pub async fn create(&self, request: CreateRequest) -> Result<()> {
        self.create_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`create`](Self::create), aborting when `cancel` fires.
    ///
    /// Cancellation, or dropping the returned future, fails the in-flight
    /// stage with `Cancelled` and rolls back in the background.
    pub async fn create_with_cancel(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<()> {
        let token = cancel.child_token();
        let guard = token.clone().drop_guard();
        let ctx = Arc::clone(&self.ctx);

        let task = tokio::spawn(async move { create::create(&ctx, request, token).await });
        let result = task.await;
        guard.disarm();

        result.map_err(|e| CoreError::Internal(format!("create task failed: {e}")))?
    }

    /// Tear down a registered microVM.
    ///
    /// Returns the report, warnings included. Use
    /// [`TeardownReport::into_result`] for strict semantics.
    ///
    /// # Errors
    /// [`CoreError::NotFound`] if `id` is not registered,
    /// [`CoreError::InvalidState`] if another destroy of `id` is still in
    /// progress. Once that one finishes, the id reports `NotFound`.
    pub async fn destroy(&self, id: &str) -> Result<TeardownReport> {
        let ctx = Arc::clone(&self.ctx);
        let id = id.to_string();

        tokio::spawn(async move { teardown::destroy(&ctx, &id).await })
            .await
            .map_err(|e| CoreError::Internal(format!("destroy task failed: {e}")))?
    }

    /// Status of every registered microVM, sorted by id.
    pub async fn list(&self) -> Vec<VmSummary> {
        let instances = self.ctx.registry.list().await;
        status::project_all(&self.ctx, &instances).await
    }

    /// Status of one registered microVM.
    pub async fn get(&self, id: &str) -> Result<VmSummary> {
        let instance = self.ctx.registry.lookup(id).await?;
        Ok(status::project(&self.ctx, &instance).await)
    }

    /// Registry record of one microVM.
    pub async fn instance(&self, id: &str) -> Result<Instance> {
        self.ctx.registry.lookup(id).await
    }

    /// Number of registered microVMs.
    pub async fn count(&self) -> usize {
        self.ctx.registry.len().await
    }

    /// Whether [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.ctx.registry.is_sealed().await
    }

    /// Refuse new creates and tear down every registered microVM
    /// concurrently within `shutdown_deadline`.
    ///
    /// Creates already in flight cannot register any more; close waits for
    /// them to release what they allocated. Teardowns and creates still
    /// running at the deadline keep going in the background and are
    /// reported as `abandoned` and `pending`.
    pub async fn close(&self) -> ShutdownReport {
        let sealed = self.ctx.registry.seal().await;
        let deadline = Instant::now() + self.ctx.config.shutdown_deadline;
        tracing::info!(
            instances = sealed.registered.len(),
            creating = sealed.creating.len(),
            "Closing orchestrator"
        );
        let ids = sealed.registered;

        let (tx, mut rx) = mpsc::unbounded_channel();
        for id in &ids {
            let ctx = Arc::clone(&self.ctx);
            let tx = tx.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let result = teardown::destroy(&ctx, &id).await;
                let _ = tx.send((id, result));
            });
        }
        drop(tx);

        let mut outstanding: BTreeSet<String> = ids.into_iter().collect();
        let mut report = ShutdownReport::default();
        while !outstanding.is_empty() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((id, result))) => {
                    outstanding.remove(&id);
                    match result {
                        Ok(teardown) => report.reports.push(teardown),
                        Err(e) => {
                            tracing::debug!(instance_id = %id, error = %e, "Skipped during close");
                            report.skipped.push(id);
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        abandoned = outstanding.len(),
                        "Shutdown deadline reached, abandoning teardowns"
                    );
                    break;
                }
            }
        }

        report.abandoned = outstanding.into_iter().collect();
        report.reports.sort_by(|a, b| a.id.cmp(&b.id));

        // Sealed creates fail at insertion and dismantle their own resources.
        if tokio::time::timeout_at(deadline, self.ctx.registry.wait_creates())
            .await
            .is_err()
        {
            report.pending = self.ctx.registry.creating().await;
            tracing::warn!(
                pending = ?report.pending,
                "Shutdown deadline reached with creates in flight"
            );
        }

        tracing::info!(
            destroyed = report.reports.len(),
            skipped = report.skipped.len(),
            abandoned = report.abandoned.len(),
            pending = report.pending.len(),
            "Orchestrator closed"
        );
        report
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("namespace", &self.namespace())
            .field("config", &self.ctx.config)
            .finish()
    }
}
