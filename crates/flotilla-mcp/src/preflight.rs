//! Host diagnostics.
//!
//! A fixed list of independent probes that check whether this host can run
//! Firecracker microVMs. Critical probes fail the report; optional probes
//! only warn.

use crate::config::FlotillaConfig;
use nix::sys::statvfs::statvfs;
use nix::unistd::{access, AccessFlags, Uid};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Minimum free space in the data directory.
pub const MIN_DISK_MIB: u64 = 1024;

/// Minimum `MemAvailable` on the host.
pub const MIN_MEMORY_MIB: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckOutcome {
    fn pass(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            detail: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            detail: Some(detail.into()),
        }
    }

    fn from_result(name: &'static str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(name),
            Err(detail) => Self::fail(name, detail),
        }
    }

    /// Downgrade a failure to a warning.
    fn optional(mut self) -> Self {
        if self.status == CheckStatus::Fail {
            self.status = CheckStatus::Warn;
        }
        self
    }
}

/// Outcome of every probe, in probe order.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub checks: Vec<CheckOutcome>,
}

impl PreflightReport {
    /// Whether no critical probe failed.
    pub fn passed(&self) -> bool {
        self.failures() == 0
    }

    pub fn failures(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warnings(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Emit one log line per probe plus a summary.
    pub fn log(&self) {
        for check in &self.checks {
            let detail = check.detail.as_deref().unwrap_or("");
            match check.status {
                CheckStatus::Pass => tracing::info!(check = check.name, "Preflight passed"),
                CheckStatus::Warn => tracing::warn!(check = check.name, detail, "Preflight warning"),
                CheckStatus::Fail => tracing::error!(check = check.name, detail, "Preflight failed"),
            }
        }
        if self.passed() {
            tracing::info!(warnings = self.warnings(), "All critical preflight checks passed");
        } else {
            tracing::error!(failures = self.failures(), "Critical preflight checks failed");
        }
    }
}

/// Paths the probes look at.
#[derive(Debug, Clone)]
pub struct PreflightTargets {
    pub firecracker_path: PathBuf,
    pub kernel_path: PathBuf,
    pub data_dir: PathBuf,
}

impl From<&FlotillaConfig> for PreflightTargets {
    fn from(config: &FlotillaConfig) -> Self {
        Self {
            firecracker_path: config.firecracker_path.clone(),
            kernel_path: config.kernel_path.clone(),
            data_dir: config.root.clone(),
        }
    }
}

/// Run every probe. Blocking; call from `spawn_blocking` in async code.
pub fn run(targets: &PreflightTargets) -> PreflightReport {
    let checks = vec![
        check_root(),
        check_virtualization(),
        check_dev_kvm(),
        check_dev_net_tun(),
        check_firecracker(&targets.firecracker_path),
        check_kernel(&targets.kernel_path),
        check_data_dir(&targets.data_dir),
        check_disk_space(&targets.data_dir),
        check_memory(),
    ];
    PreflightReport { checks }
}

fn check_root() -> CheckOutcome {
    if Uid::effective().is_root() {
        CheckOutcome::pass("root privileges")
    } else {
        CheckOutcome::fail("root privileges", "must run as root")
    }
}

fn check_virtualization() -> CheckOutcome {
    const NAME: &str = "cpu virtualization";
    match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(cpuinfo) if has_virtualization_flags(&cpuinfo) => CheckOutcome::pass(NAME),
        Ok(_) => CheckOutcome::fail(NAME, "no vmx/svm flags in /proc/cpuinfo"),
        Err(e) => CheckOutcome::fail(NAME, format!("cannot read /proc/cpuinfo: {e}")),
    }
}

fn check_dev_kvm() -> CheckOutcome {
    let result = access("/dev/kvm", AccessFlags::R_OK | AccessFlags::W_OK)
        .map_err(|e| format!("/dev/kvm is not accessible: {e}"));
    CheckOutcome::from_result("/dev/kvm", result)
}

fn check_dev_net_tun() -> CheckOutcome {
    let result = if Path::new("/dev/net/tun").exists() {
        Ok(())
    } else {
        Err("device not found".to_string())
    };
    CheckOutcome::from_result("/dev/net/tun", result).optional()
}

fn check_firecracker(path: &Path) -> CheckOutcome {
    let result = if !path.is_file() {
        Err(format!("{} not found", path.display()))
    } else {
        access(path, AccessFlags::X_OK).map_err(|_| format!("{} is not executable", path.display()))
    };
    CheckOutcome::from_result("firecracker binary", result)
}

fn check_kernel(path: &Path) -> CheckOutcome {
    let result = if path.is_file() {
        Ok(())
    } else {
        Err(format!("{} not found", path.display()))
    };
    CheckOutcome::from_result("guest kernel", result)
}

fn check_data_dir(dir: &Path) -> CheckOutcome {
    let probe = dir.join(".preflight-probe");
    let result = std::fs::create_dir_all(dir)
        .and_then(|()| std::fs::write(&probe, b"probe"))
        .and_then(|()| std::fs::remove_file(&probe))
        .map_err(|e| format!("cannot write to {}: {e}", dir.display()));
    CheckOutcome::from_result("data directory writable", result)
}

fn check_disk_space(dir: &Path) -> CheckOutcome {
    const NAME: &str = "disk space";
    let stat = match statvfs(dir) {
        Ok(stat) => stat,
        Err(e) => return CheckOutcome::fail(NAME, format!("cannot stat {}: {e}", dir.display())),
    };
    let available = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    CheckOutcome::from_result(NAME, at_least("disk space", available / (1024 * 1024), MIN_DISK_MIB))
}

fn check_memory() -> CheckOutcome {
    const NAME: &str = "available memory";
    let meminfo = match std::fs::read_to_string("/proc/meminfo") {
        Ok(meminfo) => meminfo,
        Err(e) => return CheckOutcome::fail(NAME, format!("cannot read /proc/meminfo: {e}")),
    };
    match parse_mem_available_mib(&meminfo) {
        Some(mib) => CheckOutcome::from_result(NAME, at_least("memory", mib, MIN_MEMORY_MIB)),
        None => CheckOutcome::fail(NAME, "MemAvailable missing from /proc/meminfo"),
    }
}

fn at_least(what: &str, available_mib: u64, min_mib: u64) -> Result<(), String> {
    if available_mib >= min_mib {
        Ok(())
    } else {
        Err(format!(
            "only {available_mib} MiB {what} available, need at least {min_mib} MiB"
        ))
    }
}

/// Whether a `/proc/cpuinfo` dump advertises Intel VT-x or AMD-V.
pub fn has_virtualization_flags(cpuinfo: &str) -> bool {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("flags"))
        .flat_map(|line| line.split_whitespace())
        .any(|flag| flag == "vmx" || flag == "svm")
}

/// `MemAvailable` from a `/proc/meminfo` dump, in MiB.
pub fn parse_mem_available_mib(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}
