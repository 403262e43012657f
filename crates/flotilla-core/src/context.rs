//! State shared by the orchestrator and its pipeline tasks.

use crate::config::OrchestratorConfig;
use crate::registry::Registry;
use flotilla_runtime::{RuntimeClient, RuntimeError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct Context {
    pub runtime: Arc<dyn RuntimeClient>,
    pub registry: Registry,
    pub config: OrchestratorConfig,
}

impl Context {
    /// Run a runtime call bounded by `limit` that gives up as soon as
    /// `cancel` fires.
    pub async fn call<T, F>(
        &self,
        cancel: &CancellationToken,
        limit: Duration,
        fut: F,
    ) -> flotilla_runtime::Result<T>
    where
        F: Future<Output = flotilla_runtime::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled),
            result = bounded(limit, fut) => result,
        }
    }

    /// Run a cleanup call. Cleanup is never cancelled, only bounded by
    /// `call_timeout`.
    pub async fn cleanup<T, F>(&self, fut: F) -> flotilla_runtime::Result<T>
    where
        F: Future<Output = flotilla_runtime::Result<T>>,
    {
        bounded(self.config.call_timeout, fut).await
    }
}

pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> flotilla_runtime::Result<T>
where
    F: Future<Output = flotilla_runtime::Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(RuntimeError::Timeout(limit)))
}
