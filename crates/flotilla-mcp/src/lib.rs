//! # flotilla-mcp
//!
//! MCP (Model Context Protocol) server exposing Flotilla microVM lifecycles
//! to AI agents and other MCP clients.
//!
//! ## Quick Start
//!
//! ```bash
//! export FLOTILLA_KERNEL=/var/lib/flotilla/kernel/vmlinux
//! export FLOTILLA_IMAGES=alpine=/var/lib/flotilla/images/alpine.ext4
//! export FLOTILLA_FIRECRACKER=/usr/local/bin/firecracker
//! cargo run -p flotilla-mcp
//! ```
//!
//! ## MCP Tools
//!
//! | Tool | Description |
//! |------|-------------|
//! | `create_vm` | Create and start a microVM (`id`, `image`, optional limits) |
//! | `destroy_vm` | Tear down a microVM, returning cleanup warnings |
//! | `list_vms` | List managed microVMs with lifecycle state and status |
//! | `get_vm` | Status of one microVM |
//! | `preflight` | Host diagnostics |

mod config;
pub mod http;
pub mod preflight;
mod server;
mod types;

pub use config::{parse_images, ConfigError, FlotillaConfig, PreflightMode, TransportMode};
pub use preflight::{CheckOutcome, CheckStatus, PreflightReport, PreflightTargets};
pub use server::FlotillaServer;
pub use types::*;
