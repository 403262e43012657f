//! Integration tests for the Firecracker adapter.
//!
//! These tests require:
//! - Linux with /dev/kvm access
//! - Firecracker binary installed
//! - Kernel and rootfs images
//!
//! Run with: `cargo test -p flotilla-runtime -- --ignored`

use flotilla_runtime::{
    FirecrackerConfig, FirecrackerRuntime, ResourceLimits, RuntimeClient, Signal, UnitStatus,
};
use std::path::Path;
use std::time::Duration;

fn runtime_from_env() -> Option<FirecrackerRuntime> {
    let kernel_path = std::env::var("FLOTILLA_KERNEL_PATH")
        .unwrap_or_else(|_| "/var/lib/flotilla/kernel/vmlinux".to_string());
    let rootfs_path = std::env::var("FLOTILLA_ROOTFS_PATH")
        .unwrap_or_else(|_| "/var/lib/flotilla/images/alpine.ext4".to_string());
    let firecracker_path = std::env::var("FLOTILLA_FIRECRACKER_PATH")
        .unwrap_or_else(|_| "/usr/local/bin/firecracker".to_string());

    if !Path::new(&kernel_path).exists() || !Path::new(&rootfs_path).exists() {
        eprintln!("Skipping test: kernel or rootfs not found");
        eprintln!("Set FLOTILLA_KERNEL_PATH and FLOTILLA_ROOTFS_PATH environment variables");
        return None;
    }

    let config = FirecrackerConfig::builder()
        .namespace("flotilla-integration")
        .kernel(kernel_path)
        .firecracker_path(firecracker_path)
        .image("test", rootfs_path)
        .build()
        .expect("invalid config");
    Some(FirecrackerRuntime::new(config).expect("failed to build runtime"))
}

/// Full unit lifecycle: pull -> sandbox -> unit -> start -> kill -> delete
#[tokio::test]
#[ignore = "requires Linux + KVM + Firecracker"]
async fn test_unit_lifecycle() {
    let Some(runtime) = runtime_from_env() else {
        return;
    };

    let image = runtime
        .pull_image("test", Duration::from_secs(60))
        .await
        .expect("pull failed");
    let sandbox = runtime
        .create_sandbox("it-lifecycle", &image, &ResourceLimits::new(128, 1))
        .await
        .expect("sandbox failed");
    let unit = runtime.create_unit(&sandbox).await.expect("unit failed");
    assert_eq!(runtime.unit_status(&unit).await.unwrap(), UnitStatus::Created);

    runtime.start_unit(&unit).await.expect("start failed");
    assert_eq!(runtime.unit_status(&unit).await.unwrap(), UnitStatus::Running);

    runtime.signal_unit(&unit, Signal::Kill).await.expect("kill failed");
    runtime
        .wait_unit(&unit, Duration::from_secs(10))
        .await
        .expect("unit did not exit");

    runtime.delete_unit(&unit).await.expect("delete unit failed");
    runtime
        .delete_sandbox(&sandbox)
        .await
        .expect("delete sandbox failed");
    assert!(!runtime
        .list_sandboxes()
        .await
        .unwrap()
        .iter()
        .any(|s| s.key == sandbox.key));
}

/// Graceful shutdown through Ctrl-Alt-Del
#[tokio::test]
#[ignore = "requires Linux + KVM + Firecracker"]
async fn test_terminate_then_wait() {
    let Some(runtime) = runtime_from_env() else {
        return;
    };

    let image = runtime.pull_image("test", Duration::from_secs(60)).await.unwrap();
    let sandbox = runtime
        .create_sandbox("it-terminate", &image, &ResourceLimits::default())
        .await
        .unwrap();
    let unit = runtime.create_unit(&sandbox).await.unwrap();
    runtime.start_unit(&unit).await.unwrap();

    // Give the guest time to boot far enough to handle the key sequence.
    tokio::time::sleep(Duration::from_secs(2)).await;
    runtime.signal_unit(&unit, Signal::Terminate).await.unwrap();

    if let Err(e) = runtime.wait_unit(&unit, Duration::from_secs(10)).await {
        assert!(e.is_timeout(), "unexpected error: {e}");
        runtime.signal_unit(&unit, Signal::Kill).await.unwrap();
    }

    runtime.delete_sandbox(&sandbox).await.unwrap();
}
