//! Firecracker runtime adapter.

mod api;
mod config;
mod runtime;

pub use config::{FirecrackerConfig, FirecrackerConfigBuilder, DEFAULT_NAMESPACE, DEFAULT_RUNTIME};
pub use runtime::FirecrackerRuntime;
