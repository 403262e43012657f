//! Configuration for the MCP server.
//!
//! Configuration is loaded from `FLOTILLA_*` environment variables with
//! defaults that match a stock single-host install.

use flotilla_core::OrchestratorConfig;
use flotilla_runtime::{FirecrackerConfig, ResourceLimits, DEFAULT_NAMESPACE, DEFAULT_RUNTIME};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Stdio only (local AI tools)
    Stdio,
    /// HTTP only (remote agents)
    Http,
    /// Both stdio and HTTP
    #[default]
    Both,
}

impl TransportMode {
    /// Parse from string (case-insensitive). Unknown values mean `Both`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stdio" => Self::Stdio,
            "http" | "sse" | "remote" => Self::Http,
            _ => Self::Both,
        }
    }

    pub fn stdio_enabled(&self) -> bool {
        matches!(self, Self::Stdio | Self::Both)
    }

    pub fn http_enabled(&self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }
}

/// How host diagnostics gate startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreflightMode {
    /// Skip diagnostics at startup
    Off,
    /// Run and log, never block startup
    #[default]
    Warn,
    /// Refuse to start when a critical check fails
    Strict,
}

impl PreflightMode {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" | "false" | "0" => Self::Off,
            "strict" => Self::Strict,
            _ => Self::Warn,
        }
    }
}

/// Configuration for the Flotilla MCP server.
#[derive(Debug, Clone)]
pub struct FlotillaConfig {
    /// Runtime namespace every sandbox is created in.
    pub namespace: String,

    /// Runtime selector recorded with each sandbox.
    pub runtime: String,

    /// Data directory for sandbox state.
    pub root: PathBuf,

    /// Path to the Firecracker binary.
    pub firecracker_path: PathBuf,

    /// Path to the guest kernel.
    pub kernel_path: PathBuf,

    /// Image catalog: reference name to rootfs file.
    pub images: HashMap<String, PathBuf>,

    /// Limits applied when a create request names none.
    pub default_limits: ResourceLimits,

    /// Grace period for a guest to exit after terminate.
    pub teardown_timeout: Duration,

    /// Budget for tearing everything down on shutdown.
    pub shutdown_deadline: Duration,

    /// Host diagnostics mode.
    pub preflight: PreflightMode,

    /// Transport mode (default: both stdio and HTTP).
    pub transport_mode: TransportMode,

    /// HTTP server bind address.
    pub http_addr: SocketAddr,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("kernel file not found: {0}")]
    MissingKernel(PathBuf),

    #[error("firecracker binary not found: {0}")]
    MissingFirecracker(PathBuf),

    #[error("image {name} not found: {path}")]
    MissingImage { name: String, path: PathBuf },

    #[error("data directory parent not found: {0}")]
    InvalidRoot(PathBuf),

    #[error("invalid image catalog entry: {0:?}")]
    InvalidImageEntry(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Default for FlotillaConfig {
    fn default() -> Self {
        let runtime = FirecrackerConfig::default();
        let orchestrator = OrchestratorConfig::default();
        Self {
            namespace: DEFAULT_NAMESPACE.into(),
            runtime: DEFAULT_RUNTIME.into(),
            root: runtime.root,
            firecracker_path: runtime.firecracker_path,
            kernel_path: runtime.kernel_path,
            images: runtime.images,
            default_limits: orchestrator.default_limits,
            teardown_timeout: orchestrator.teardown_timeout,
            shutdown_deadline: orchestrator.shutdown_deadline,
            preflight: PreflightMode::Warn,
            transport_mode: TransportMode::Both,
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl FlotillaConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FLOTILLA_NAMESPACE` | `firecracker-manager` |
    /// | `FLOTILLA_RUNTIME` | `aws.firecracker` |
    /// | `FLOTILLA_ROOT` | `/tmp/flotilla` |
    /// | `FLOTILLA_FIRECRACKER` | `/usr/local/bin/firecracker` |
    /// | `FLOTILLA_KERNEL` | `/var/lib/flotilla/kernel/vmlinux` |
    /// | `FLOTILLA_IMAGES` | `alpine=…,ubuntu=…` (`name=path` pairs) |
    /// | `FLOTILLA_MEMORY_MIB` | `128` |
    /// | `FLOTILLA_VCPUS` | `1` |
    /// | `FLOTILLA_TEARDOWN_TIMEOUT_SECS` | `10` |
    /// | `FLOTILLA_SHUTDOWN_DEADLINE_SECS` | `30` |
    /// | `FLOTILLA_PREFLIGHT` | `warn` (off, warn, strict) |
    /// | `FLOTILLA_TRANSPORT` | `both` (stdio, http, both) |
    /// | `FLOTILLA_HTTP_HOST` | `0.0.0.0` |
    /// | `FLOTILLA_HTTP_PORT` | `8080` |
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidImageEntry`] for a malformed
    /// `FLOTILLA_IMAGES` value. Other unparsable values fall back to
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let http_host: IpAddr = env_parse("FLOTILLA_HTTP_HOST")
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        let http_port: u16 = env_parse("FLOTILLA_HTTP_PORT").unwrap_or(8080);

        let images = match std::env::var("FLOTILLA_IMAGES") {
            Ok(v) => parse_images(&v)?,
            Err(_) => default.images,
        };

        let default_limits = ResourceLimits::new(
            env_parse("FLOTILLA_MEMORY_MIB").unwrap_or(default.default_limits.memory_mib),
            env_parse("FLOTILLA_VCPUS").unwrap_or(default.default_limits.vcpu_count),
        );

        Ok(Self {
            namespace: std::env::var("FLOTILLA_NAMESPACE").unwrap_or(default.namespace),
            runtime: std::env::var("FLOTILLA_RUNTIME").unwrap_or(default.runtime),
            root: std::env::var("FLOTILLA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.root),
            firecracker_path: std::env::var("FLOTILLA_FIRECRACKER")
                .map(PathBuf::from)
                .unwrap_or(default.firecracker_path),
            kernel_path: std::env::var("FLOTILLA_KERNEL")
                .map(PathBuf::from)
                .unwrap_or(default.kernel_path),
            images,
            default_limits,
            teardown_timeout: env_parse("FLOTILLA_TEARDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.teardown_timeout),
            shutdown_deadline: env_parse("FLOTILLA_SHUTDOWN_DEADLINE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.shutdown_deadline),
            preflight: std::env::var("FLOTILLA_PREFLIGHT")
                .map(|v| PreflightMode::parse(&v))
                .unwrap_or(default.preflight),
            transport_mode: std::env::var("FLOTILLA_TRANSPORT")
                .map(|v| TransportMode::parse(&v))
                .unwrap_or(default.transport_mode),
            http_addr: SocketAddr::new(http_host, http_port),
        })
    }

    /// Runtime adapter configuration.
    pub fn firecracker_config(&self) -> Result<FirecrackerConfig, ConfigError> {
        FirecrackerConfig::builder()
            .namespace(&self.namespace)
            .runtime(&self.runtime)
            .root(&self.root)
            .firecracker_path(&self.firecracker_path)
            .kernel(&self.kernel_path)
            .images(self.images.clone())
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Orchestrator configuration.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        OrchestratorConfig::builder()
            .default_limits(self.default_limits)
            .teardown_timeout(self.teardown_timeout)
            .shutdown_deadline(self.shutdown_deadline)
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Validate that all configured paths exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.kernel_path.exists() {
            return Err(ConfigError::MissingKernel(self.kernel_path.clone()));
        }

        if !self.firecracker_path.exists() {
            return Err(ConfigError::MissingFirecracker(
                self.firecracker_path.clone(),
            ));
        }

        for (name, path) in &self.images {
            if !path.exists() {
                return Err(ConfigError::MissingImage {
                    name: name.clone(),
                    path: path.clone(),
                });
            }
        }

        // The data directory is created on demand.
        if let Some(parent) = self.root.parent() {
            if !parent.exists() {
                return Err(ConfigError::InvalidRoot(self.root.clone()));
            }
        }

        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if !self.kernel_path.exists() {
            tracing::warn!("Kernel not found: {:?}", self.kernel_path);
        }

        if !self.firecracker_path.exists() {
            tracing::warn!("Firecracker not found: {:?}", self.firecracker_path);
        }

        for (name, path) in &self.images {
            if !path.exists() {
                tracing::warn!(image = %name, "Image rootfs not found: {:?}", path);
            }
        }
    }
}

/// Parse an image catalog of the form `name=path,name=path`.
///
/// Blank entries are skipped; paths must be absolute.
pub fn parse_images(value: &str) -> Result<HashMap<String, PathBuf>, ConfigError> {
    let mut images = HashMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, path) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidImageEntry(entry.to_string()))?;
        let (name, path) = (name.trim(), PathBuf::from(path.trim()));
        if name.is_empty() || !path.is_absolute() {
            return Err(ConfigError::InvalidImageEntry(entry.to_string()));
        }
        images.insert(name.to_string(), path);
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FlotillaConfig::default();
        assert_eq!(config.namespace, "firecracker-manager");
        assert_eq!(config.runtime, "aws.firecracker");
        assert_eq!(config.root, PathBuf::from("/tmp/flotilla"));
        assert_eq!(config.default_limits, ResourceLimits::new(128, 1));
        assert!(config.images.contains_key("alpine"));
        assert!(config.images.contains_key("ubuntu"));
        assert_eq!(config.preflight, PreflightMode::Warn);
        assert_eq!(config.transport_mode, TransportMode::Both);
        assert_eq!(config.http_addr.port(), 8080);
    }

    #[test]
    fn test_transport_mode_parsing() {
        assert_eq!(TransportMode::parse("stdio"), TransportMode::Stdio);
        assert_eq!(TransportMode::parse("HTTP"), TransportMode::Http);
        assert_eq!(TransportMode::parse("both"), TransportMode::Both);
        assert_eq!(TransportMode::parse("anything"), TransportMode::Both);

        assert!(TransportMode::Stdio.stdio_enabled());
        assert!(!TransportMode::Stdio.http_enabled());
        assert!(TransportMode::Both.http_enabled());
    }

    #[test]
    fn test_preflight_mode_parsing() {
        assert_eq!(PreflightMode::parse("off"), PreflightMode::Off);
        assert_eq!(PreflightMode::parse("STRICT"), PreflightMode::Strict);
        assert_eq!(PreflightMode::parse("warn"), PreflightMode::Warn);
        assert_eq!(PreflightMode::parse("bogus"), PreflightMode::Warn);
    }

    #[test]
    fn test_parse_images() {
        let images = parse_images("alpine=/img/alpine.ext4, debian = /img/debian.ext4,").unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images["debian"], PathBuf::from("/img/debian.ext4"));

        assert!(parse_images("").unwrap().is_empty());
        assert!(matches!(
            parse_images("alpine"),
            Err(ConfigError::InvalidImageEntry(_))
        ));
        assert!(parse_images("alpine=relative.ext4").is_err());
        assert!(parse_images("=/img/x.ext4").is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = FlotillaConfig {
            default_limits: ResourceLimits::new(256, 2),
            teardown_timeout: Duration::from_secs(3),
            ..FlotillaConfig::default()
        };

        let runtime = config.firecracker_config().unwrap();
        assert_eq!(runtime.namespace, config.namespace);
        assert_eq!(runtime.images, config.images);

        let orchestrator = config.orchestrator_config().unwrap();
        assert_eq!(orchestrator.default_limits, ResourceLimits::new(256, 2));
        assert_eq!(orchestrator.teardown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_derived_configs_reject_invalid_values() {
        let config = FlotillaConfig {
            default_limits: ResourceLimits::new(0, 1),
            ..FlotillaConfig::default()
        };
        assert!(config.orchestrator_config().is_err());

        let config = FlotillaConfig {
            namespace: "a/b".into(),
            ..FlotillaConfig::default()
        };
        assert!(config.firecracker_config().is_err());
    }

    #[test]
    fn test_from_env_uses_defaults() {
        for var in [
            "FLOTILLA_NAMESPACE",
            "FLOTILLA_ROOT",
            "FLOTILLA_IMAGES",
            "FLOTILLA_MEMORY_MIB",
            "FLOTILLA_PREFLIGHT",
            "FLOTILLA_TRANSPORT",
            "FLOTILLA_HTTP_PORT",
        ] {
            std::env::remove_var(var);
        }

        let config = FlotillaConfig::from_env().unwrap();
        let default = FlotillaConfig::default();

        assert_eq!(config.namespace, default.namespace);
        assert_eq!(config.root, default.root);
        assert_eq!(config.images, default.images);
        assert_eq!(config.default_limits, default.default_limits);
        assert_eq!(config.transport_mode, TransportMode::Both);
    }
}
