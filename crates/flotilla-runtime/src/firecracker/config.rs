//! Configuration for the Firecracker runtime adapter.

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default isolation namespace.
pub const DEFAULT_NAMESPACE: &str = "firecracker-manager";

/// Default runtime selector recorded on every sandbox.
pub const DEFAULT_RUNTIME: &str = "aws.firecracker";

/// Settings for [`FirecrackerRuntime`](super::FirecrackerRuntime).
///
/// Binaries and images are given as explicit paths. The adapter never
/// searches or mutates `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirecrackerConfig {
    /// Isolation namespace. Sandboxes live under `<root>/<namespace>/`.
    pub namespace: String,
    /// Runtime selector (e.g. `aws.firecracker`)
    pub runtime: String,
    /// Data directory holding all namespaces
    pub root: PathBuf,
    /// Path to the Firecracker binary
    pub firecracker_path: PathBuf,
    /// Path to the guest kernel image
    pub kernel_path: PathBuf,
    /// Kernel boot arguments
    pub boot_args: String,
    /// Image catalog: reference name to rootfs file
    pub images: HashMap<String, PathBuf>,
    /// How often `wait_unit` polls the API socket
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for FirecrackerConfig {
    fn default() -> Self {
        let images = [
            ("alpine", "/var/lib/flotilla/images/alpine.ext4"),
            ("ubuntu", "/var/lib/flotilla/images/ubuntu-22.04.ext4"),
        ]
        .into_iter()
        .map(|(name, path)| (name.to_string(), PathBuf::from(path)))
        .collect();

        Self {
            namespace: DEFAULT_NAMESPACE.into(),
            runtime: DEFAULT_RUNTIME.into(),
            root: PathBuf::from("/tmp/flotilla"),
            firecracker_path: PathBuf::from("/usr/local/bin/firecracker"),
            kernel_path: PathBuf::from("/var/lib/flotilla/kernel/vmlinux"),
            boot_args: "console=ttyS0 reboot=k panic=1 pci=off".into(),
            images,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl FirecrackerConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> FirecrackerConfigBuilder {
        FirecrackerConfigBuilder::default()
    }

    /// Directory holding every sandbox of this namespace.
    pub fn namespace_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`RuntimeError::Config`] for an empty or path-like namespace,
    /// relative paths, or a zero poll interval.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty()
            || self.namespace.contains('/')
            || self.namespace == "."
            || self.namespace == ".."
        {
            return Err(RuntimeError::Config(format!(
                "invalid namespace: {:?}",
                self.namespace
            )));
        }
        if self.runtime.is_empty() {
            return Err(RuntimeError::Config("runtime must not be empty".into()));
        }
        for (name, path) in [
            ("root", &self.root),
            ("firecracker_path", &self.firecracker_path),
            ("kernel_path", &self.kernel_path),
        ] {
            if !path.is_absolute() {
                return Err(RuntimeError::Config(format!(
                    "{name} must be an absolute path, got {}",
                    path.display()
                )));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(RuntimeError::Config("poll_interval must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve an image reference to a rootfs file.
    ///
    /// Lookup order: exact catalog entry, catalog entry for the name before
    /// the tag (`alpine:latest` → `alpine`), then an absolute path given
    /// directly as the reference.
    pub fn resolve_image(&self, reference: &str) -> Option<PathBuf> {
        if let Some(path) = self.images.get(reference) {
            return Some(path.clone());
        }
        let name = reference.split(':').next().unwrap_or(reference);
        if let Some(path) = self.images.get(name) {
            return Some(path.clone());
        }
        let path = Path::new(reference);
        path.is_absolute().then(|| path.to_path_buf())
    }
}

/// Fluent builder for [`FirecrackerConfig`].
#[derive(Debug, Clone, Default)]
pub struct FirecrackerConfigBuilder {
    config: FirecrackerConfig,
}

impl FirecrackerConfigBuilder {
    /// Set the isolation namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the runtime selector.
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.config.runtime = runtime.into();
        self
    }

    /// Set the data directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root = path.into();
        self
    }

    /// Set the path to the Firecracker binary.
    pub fn firecracker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.firecracker_path = path.into();
        self
    }

    /// Set the path to the guest kernel.
    pub fn kernel(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.kernel_path = path.into();
        self
    }

    /// Set the kernel boot arguments.
    pub fn boot_args(mut self, args: impl Into<String>) -> Self {
        self.config.boot_args = args.into();
        self
    }

    /// Add (or replace) an image catalog entry.
    pub fn image(mut self, name: impl Into<String>, rootfs: impl Into<PathBuf>) -> Self {
        self.config.images.insert(name.into(), rootfs.into());
        self
    }

    /// Replace the whole image catalog.
    pub fn images(mut self, images: HashMap<String, PathBuf>) -> Self {
        self.config.images = images;
        self
    }

    /// Set the API polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<FirecrackerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
