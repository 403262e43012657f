//! `RuntimeClient` backed by Firecracker through firepilot.

use super::api::{configure_machine, instance_state, send_ctrl_alt_del, unit_status_from};
use super::config::FirecrackerConfig;
use crate::client::RuntimeClient;
use crate::error::{Result, RuntimeError};
use crate::types::{
    ExitInfo, ImageHandle, ResourceLimits, SandboxHandle, Signal, UnitHandle, UnitStatus,
};
use async_trait::async_trait;
use firepilot::builder::drive::DriveBuilder;
use firepilot::builder::executor::FirecrackerExecutorBuilder;
use firepilot::builder::kernel::KernelBuilder;
use firepilot::builder::{Builder, Configuration};
use firepilot::machine::Machine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

const METADATA_FILE: &str = "sandbox.json";
const ROOTFS_FILE: &str = "rootfs.ext4";
const SOCKET_FILE: &str = "firecracker.socket";

/// On-disk description of a sandbox, written to `sandbox.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxRecord {
    instance_id: String,
    key: String,
    namespace: String,
    runtime: String,
    image: String,
    rootfs: PathBuf,
    limits: ResourceLimits,
}

impl SandboxRecord {
    fn handle(&self) -> SandboxHandle {
        SandboxHandle {
            instance_id: self.instance_id.clone(),
            key: self.key.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// A Firecracker process created for a sandbox.
struct UnitEntry {
    handle: UnitHandle,
    socket_path: PathBuf,
    machine: Mutex<Machine>,
}

/// Runtime adapter that boots each sandbox as a Firecracker microVM.
///
/// Layout on disk:
///
/// ```text
/// <root>/<namespace>/<key>/
///     rootfs.ext4          writable copy of the catalog image
///     sandbox.json         metadata used by list_sandboxes
///     firecracker.socket   API socket (created by firepilot)
/// ```
pub struct FirecrackerRuntime {
    config: FirecrackerConfig,
    units: RwLock<HashMap<String, Arc<UnitEntry>>>,
}

impl FirecrackerRuntime {
    /// Create an adapter. No files are touched until the first sandbox.
    pub fn new(config: FirecrackerConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            namespace = %config.namespace,
            runtime = %config.runtime,
            root = %config.root.display(),
            "Firecracker runtime configured"
        );
        Ok(Self {
            config,
            units: RwLock::new(HashMap::new()),
        })
    }

    /// Configuration this adapter was built with.
    pub fn config(&self) -> &FirecrackerConfig {
        &self.config
    }

    fn sandbox_dir(&self, key: &str) -> PathBuf {
        self.config.namespace_dir().join(key)
    }

    async fn read_record(&self, sandbox: &SandboxHandle) -> Result<SandboxRecord> {
        if sandbox.namespace != self.config.namespace {
            return Err(RuntimeError::SandboxNotFound(sandbox.to_string()));
        }
        let path = self.sandbox_dir(&sandbox.key).join(METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RuntimeError::SandboxNotFound(sandbox.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unit(&self, unit: &UnitHandle) -> Result<Arc<UnitEntry>> {
        self.units
            .read()
            .await
            .get(&unit.key)
            .cloned()
            .ok_or_else(|| RuntimeError::UnitNotFound(unit.key.clone()))
    }

    /// Populate a fresh sandbox directory. The caller removes it on error.
    async fn populate(&self, dir: &Path, record: &SandboxRecord, image: &Path) -> Result<()> {
        tokio::fs::copy(image, &record.rootfs).await?;
        let metadata = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(dir.join(METADATA_FILE), metadata).await?;
        Ok(())
    }

    fn machine_config(&self, record: &SandboxRecord) -> Result<Configuration> {
        let kernel = KernelBuilder::new()
            .with_kernel_image_path(self.config.kernel_path.to_string_lossy().to_string())
            .with_boot_args(self.config.boot_args.clone())
            .try_build()
            .map_err(|e| RuntimeError::Config(format!("kernel config: {:?}", e)))?;

        let drive = DriveBuilder::new()
            .with_drive_id("rootfs".to_string())
            .with_path_on_host(record.rootfs.clone())
            .as_root_device()
            .try_build()
            .map_err(|e| RuntimeError::Config(format!("drive config: {:?}", e)))?;

        // firepilot places the API socket under <chroot>/<id>/, which is the
        // sandbox directory.
        let executor = FirecrackerExecutorBuilder::new()
            .with_chroot(self.config.namespace_dir().to_string_lossy().to_string())
            .with_exec_binary(self.config.firecracker_path.clone())
            .try_build()
            .map_err(|e| RuntimeError::Config(format!("executor config: {:?}", e)))?;

        Ok(Configuration::new(record.key.clone())
            .with_kernel(kernel)
            .with_executor(executor)
            .with_drive(drive))
    }
}

/// Poll the API socket until the guest has shut down.
async fn wait_exit(socket_path: &Path, interval: Duration) -> Result<ExitInfo> {
    loop {
        let state = instance_state(socket_path).await?;
        match unit_status_from(state.as_deref()) {
            UnitStatus::Stopped | UnitStatus::Created => return Ok(ExitInfo::default()),
            _ => tokio::time::sleep(interval).await,
        }
    }
}

#[async_trait]
impl RuntimeClient for FirecrackerRuntime {
    fn namespace(&self) -> &str {
        &self.config.namespace
    }

    async fn pull_image(&self, reference: &str, timeout: Duration) -> Result<ImageHandle> {
        let path = self
            .config
            .resolve_image(reference)
            .ok_or_else(|| RuntimeError::ImageNotFound(reference.to_string()))?;

        let metadata = tokio::time::timeout(timeout, tokio::fs::metadata(&path))
            .await
            .map_err(|_| RuntimeError::Timeout(timeout))?;
        match metadata {
            Ok(m) if m.is_file() => {}
            Ok(_) => return Err(RuntimeError::ImageNotFound(reference.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RuntimeError::ImageNotFound(reference.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(reference, rootfs = %path.display(), "Image resolved");
        Ok(ImageHandle {
            reference: reference.to_string(),
            location: path.to_string_lossy().to_string(),
        })
    }

    async fn create_sandbox(
        &self,
        id: &str,
        image: &ImageHandle,
        limits: &ResourceLimits,
    ) -> Result<SandboxHandle> {
        limits.validate()?;

        let suffix = Uuid::new_v4().simple().to_string();
        let key = format!("{}-{}", id, &suffix[..8]);
        let dir = self.sandbox_dir(&key);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RuntimeError::Create(format!("{}: {e}", dir.display())))?;

        let record = SandboxRecord {
            instance_id: id.to_string(),
            key: key.clone(),
            namespace: self.config.namespace.clone(),
            runtime: self.config.runtime.clone(),
            image: image.reference.clone(),
            rootfs: dir.join(ROOTFS_FILE),
            limits: *limits,
        };

        if let Err(e) = self.populate(&dir, &record, Path::new(&image.location)).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %cleanup, "Failed to remove partial sandbox");
            }
            return Err(RuntimeError::Create(format!("sandbox {key}: {e}")));
        }

        tracing::info!(instance_id = %id, sandbox = %key, "Sandbox created");
        Ok(record.handle())
    }

    async fn create_unit(&self, sandbox: &SandboxHandle) -> Result<UnitHandle> {
        let record = self.read_record(sandbox).await?;
        let handle = UnitHandle {
            key: format!("{}-unit", record.key),
            sandbox_key: record.key.clone(),
        };
        if self.units.read().await.contains_key(&handle.key) {
            return Err(RuntimeError::AlreadyExists(handle.key));
        }

        let fp_config = self.machine_config(&record)?;
        let mut machine = Machine::new();
        machine
            .create(fp_config)
            .await
            .map_err(|e| RuntimeError::Create(format!("{:?}", e)))?;

        let socket_path = self.sandbox_dir(&record.key).join(SOCKET_FILE);
        if let Err(e) = configure_machine(&socket_path, &record.limits).await {
            if let Err(kill) = machine.kill().await {
                tracing::warn!(unit = %handle, error = ?kill, "Failed to kill unconfigured machine");
            }
            return Err(e);
        }

        self.units.write().await.insert(
            handle.key.clone(),
            Arc::new(UnitEntry {
                handle: handle.clone(),
                socket_path,
                machine: Mutex::new(machine),
            }),
        );

        tracing::debug!(unit = %handle, "Unit created");
        Ok(handle)
    }

    async fn start_unit(&self, unit: &UnitHandle) -> Result<()> {
        let entry = self.unit(unit).await?;
        let machine = entry.machine.lock().await;
        machine
            .start()
            .await
            .map_err(|e| RuntimeError::Start(format!("{:?}", e)))?;

        tracing::info!(unit = %unit, "MicroVM started");
        Ok(())
    }

    async fn signal_unit(&self, unit: &UnitHandle, signal: Signal) -> Result<()> {
        let entry = self.unit(unit).await?;
        tracing::debug!(unit = %unit, %signal, "Signalling unit");

        match signal {
            Signal::Terminate => send_ctrl_alt_del(&entry.socket_path).await,
            Signal::Kill => entry
                .machine
                .lock()
                .await
                .kill()
                .await
                .map_err(|e| RuntimeError::Signal(format!("kill failed: {:?}", e))),
        }
    }

    async fn wait_unit(&self, unit: &UnitHandle, timeout: Duration) -> Result<ExitInfo> {
        let entry = self.unit(unit).await?;
        let poll = wait_exit(&entry.socket_path, self.config.poll_interval);
        tokio::time::timeout(timeout, poll)
            .await
            .unwrap_or(Err(RuntimeError::Timeout(timeout)))
    }

    async fn delete_unit(&self, unit: &UnitHandle) -> Result<()> {
        let Some(entry) = self.units.write().await.remove(&unit.key) else {
            return Ok(());
        };

        if let Ok(Some(_)) = instance_state(&entry.socket_path).await {
            if let Err(e) = entry.machine.lock().await.kill().await {
                tracing::warn!(unit = %entry.handle, error = ?e, "Kill during delete failed");
            }
        }

        tracing::debug!(unit = %entry.handle, "Unit deleted");
        Ok(())
    }

    async fn delete_sandbox(&self, sandbox: &SandboxHandle) -> Result<()> {
        let orphaned: Vec<UnitHandle> = self
            .units
            .read()
            .await
            .values()
            .filter(|u| u.handle.sandbox_key == sandbox.key)
            .map(|u| u.handle.clone())
            .collect();
        for unit in orphaned {
            self.delete_unit(&unit).await?;
        }

        let dir = self.sandbox_dir(&sandbox.key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(sandbox = %sandbox, "Sandbox deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::Delete(format!("{}: {e}", dir.display()))),
        }
    }

    async fn list_sandboxes(&self) -> Result<Vec<SandboxHandle>> {
        let mut entries = match tokio::fs::read_dir(self.config.namespace_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sandboxes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(METADATA_FILE);
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            match serde_json::from_slice::<SandboxRecord>(&bytes) {
                Ok(record) => sandboxes.push(record.handle()),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable sandbox metadata"),
            }
        }
        sandboxes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(sandboxes)
    }

    async fn unit_status(&self, unit: &UnitHandle) -> Result<UnitStatus> {
        let entry = self.unit(unit).await?;
        let state = instance_state(&entry.socket_path).await?;
        Ok(unit_status_from(state.as_deref()))
    }
}
