//! # flotilla-core
//!
//! Lifecycle orchestration for Flotilla microVMs.
//!
//! The [`Orchestrator`] turns the multi-step, partially failable runtime
//! protocol (pull, sandbox, unit, start) into an all-or-nothing create and
//! a bounded, idempotent destroy, and keeps a registry of live instances
//! that is safe under concurrent access.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Orchestrator                        │
//! │   create() / destroy() / list() / get() / close()        │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │  Creation    │  │  Teardown    │  │    Status     │   │
//! │  │  pipeline    │  │  pipeline    │  │   projector   │   │
//! │  └──────┬───────┘  └──────┬───────┘  └───────┬───────┘   │
//! │         │   insert        │ begin/remove      │ list      │
//! │         ▼                 ▼                   ▼           │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │        Registry: RwLock<HashMap<id, Instance>>     │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └─────────────────────────────┬────────────────────────────┘
//!                               │ (never under the lock)
//!                               ▼
//!                  dyn RuntimeClient (flotilla-runtime)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use flotilla_core::{CreateRequest, Orchestrator, OrchestratorConfig};
//! use flotilla_runtime::FakeRuntime;
//! use std::sync::Arc;
//!
//! # async fn example() -> flotilla_core::Result<()> {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(FakeRuntime::default()),
//!     OrchestratorConfig::default(),
//! )?;
//!
//! orchestrator.create(CreateRequest::new("vm-1", "alpine:latest")).await?;
//! for vm in orchestrator.list().await {
//!     println!("{} {}", vm.id, vm.status);
//! }
//!
//! let report = orchestrator.destroy("vm-1").await?;
//! assert!(report.is_clean());
//!
//! orchestrator.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod create;
mod error;
mod instance;
mod lifecycle;
mod orchestrator;
mod registry;
mod status;
mod teardown;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use create::{CreateRequest, MAX_ID_LEN};
pub use error::{CleanupFailure, CleanupStep, CoreError, Result};
pub use instance::{Instance, RuntimeHandles};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use orchestrator::{Orchestrator, ShutdownReport};
pub use registry::{Registry, Sealed};
pub use status::{VmStatus, VmSummary};
pub use teardown::{TeardownReport, TeardownWarning};
