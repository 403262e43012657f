//! # flotilla-runtime
//!
//! Runtime client adapters for Flotilla microVMs.
//!
//! The orchestrator in `flotilla-core` only talks to the [`RuntimeClient`]
//! trait. This crate provides two implementations:
//!
//! - [`FirecrackerRuntime`]: boots each sandbox as a Firecracker microVM
//!   through firepilot, with sizing and status done over the API socket.
//! - [`FakeRuntime`]: in-memory, with failure injection, for tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use flotilla_runtime::{FirecrackerConfig, FirecrackerRuntime, ResourceLimits, RuntimeClient};
//! use std::time::Duration;
//!
//! # async fn example() -> flotilla_runtime::Result<()> {
//! let config = FirecrackerConfig::builder()
//!     .kernel("/var/lib/flotilla/kernel/vmlinux")
//!     .image("alpine", "/var/lib/flotilla/images/alpine.ext4")
//!     .build()?;
//! let runtime = FirecrackerRuntime::new(config)?;
//!
//! let image = runtime.pull_image("alpine", Duration::from_secs(60)).await?;
//! let sandbox = runtime
//!     .create_sandbox("vm-1", &image, &ResourceLimits::default())
//!     .await?;
//! let unit = runtime.create_unit(&sandbox).await?;
//! runtime.start_unit(&unit).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod fake;
mod firecracker;
mod types;

pub use client::RuntimeClient;
pub use error::{Result, RuntimeError};
pub use fake::{FakeRuntime, FakeStage};
pub use firecracker::{
    FirecrackerConfig, FirecrackerConfigBuilder, FirecrackerRuntime, DEFAULT_NAMESPACE,
    DEFAULT_RUNTIME,
};
pub use types::{
    ExitInfo, ImageHandle, ResourceLimits, SandboxHandle, Signal, UnitHandle, UnitStatus,
};
