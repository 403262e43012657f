//! Orchestrator behavior against the in-memory runtime.

use flotilla_core::{
    CleanupStep, CoreError, CreateRequest, LifecycleState, Orchestrator, OrchestratorConfig,
    TeardownWarning, VmStatus,
};
use flotilla_runtime::{FakeRuntime, FakeStage, ResourceLimits, RuntimeError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn setup(config: OrchestratorConfig) -> (Arc<FakeRuntime>, Orchestrator) {
    let runtime = Arc::new(FakeRuntime::new("flotilla-test"));
    let orchestrator = Orchestrator::new(runtime.clone(), config).expect("valid config");
    (runtime, orchestrator)
}

fn default_setup() -> (Arc<FakeRuntime>, Orchestrator) {
    setup(OrchestratorConfig::default())
}

fn assert_nothing_left(runtime: &FakeRuntime) {
    assert!(runtime.live_sandboxes().is_empty(), "sandboxes leaked");
    assert!(runtime.live_units().is_empty(), "units leaked");
}

#[tokio::test]
async fn test_create_list_destroy() {
    let (runtime, orchestrator) = default_setup();

    orchestrator
        .create(CreateRequest::new("vm-1", "alpine:latest"))
        .await
        .unwrap();

    let vms = orchestrator.list().await;
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].id, "vm-1");
    assert_eq!(vms[0].status, VmStatus::Running);
    assert_eq!(vms[0].state, LifecycleState::Running);
    assert_eq!(runtime.live_sandboxes().len(), 1);

    let instance = orchestrator.instance("vm-1").await.unwrap();
    assert_eq!(instance.limits(), ResourceLimits::new(128, 1));
    assert_eq!(instance.handles().sandbox.namespace, "flotilla-test");

    let report = orchestrator.destroy("vm-1").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.final_state, LifecycleState::Stopped);
    assert_eq!(orchestrator.count().await, 0);
    assert!(orchestrator.list().await.is_empty());
    assert_nothing_left(&runtime);
}

#[tokio::test]
async fn test_custom_limits_reach_the_runtime() {
    let (runtime, orchestrator) = default_setup();
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine").with_limits(ResourceLimits::new(512, 2)))
        .await
        .unwrap();

    let sandbox = &runtime.live_sandboxes()[0];
    assert_eq!(
        runtime.sandbox_limits(&sandbox.key),
        Some(ResourceLimits::new(512, 2))
    );
}

#[tokio::test]
async fn test_bad_image_leaves_nothing() {
    let (runtime, orchestrator) = default_setup();
    runtime.reject_image("nonexistent-image");

    let err = orchestrator
        .create(CreateRequest::new("vm-1", "nonexistent-image"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::ImagePullFailed {
            source: RuntimeError::ImageNotFound(_),
            ..
        }
    ));
    assert_eq!(orchestrator.count().await, 0);
    assert_eq!(runtime.calls(FakeStage::CreateSandbox), 0);
    assert_nothing_left(&runtime);

    // The id is free again.
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_creation_is_atomic_at_every_stage() {
    for stage in [
        FakeStage::Pull,
        FakeStage::CreateSandbox,
        FakeStage::CreateUnit,
        FakeStage::StartUnit,
    ] {
        let (runtime, orchestrator) = default_setup();
        runtime.fail_at(stage);

        let err = orchestrator
            .create(CreateRequest::new("vm-1", "alpine"))
            .await
            .unwrap_err();

        let expected = match stage {
            FakeStage::Pull => "pull_image",
            FakeStage::CreateSandbox => "create_sandbox",
            FakeStage::CreateUnit => "create_unit",
            _ => "start_unit",
        };
        assert_eq!(err.stage(), expected, "failing at {stage:?}");
        assert!(err.cleanup_failures().is_empty());
        assert_eq!(orchestrator.count().await, 0);
        assert!(matches!(
            orchestrator.get("vm-1").await,
            Err(CoreError::NotFound(_))
        ));
        assert_nothing_left(&runtime);
    }
}

#[tokio::test]
async fn test_rollback_failure_is_attached_not_masking() {
    let (runtime, orchestrator) = default_setup();
    runtime.fail_at(FakeStage::StartUnit);
    runtime.fail_at(FakeStage::DeleteSandbox);

    let err = orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::StartFailed { .. }));
    let cleanup = err.cleanup_failures();
    assert_eq!(cleanup.len(), 1);
    assert_eq!(cleanup[0].step, CleanupStep::DeleteSandbox);
    // The unit was still deleted; only the sandbox is left behind.
    assert!(runtime.live_units().is_empty());
    assert_eq!(runtime.live_sandboxes().len(), 1);
    assert_eq!(orchestrator.count().await, 0);
}

#[tokio::test]
async fn test_invalid_request_makes_no_runtime_calls() {
    let (runtime, orchestrator) = default_setup();

    let err = orchestrator
        .create(CreateRequest::new("", "alpine"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidRequest(_)));
    assert!(err.is_precondition());

    let err = orchestrator
        .create(CreateRequest::new("vm-1", "alpine").with_limits(ResourceLimits::new(128, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidRequest(_)));

    assert_eq!(runtime.calls(FakeStage::Pull), 0);
}

#[tokio::test]
async fn test_duplicate_id_is_rejected_before_any_runtime_call() {
    let (runtime, orchestrator) = default_setup();
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();

    let err = orchestrator
        .create(CreateRequest::new("vm-1", "ubuntu"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists(id) if id == "vm-1"));
    assert_eq!(runtime.calls(FakeStage::Pull), 1);
    assert_eq!(orchestrator.instance("vm-1").await.unwrap().image(), "alpine");
}

#[tokio::test]
async fn test_destroy_twice() {
    let (runtime, orchestrator) = default_setup();
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();

    assert!(orchestrator.destroy("vm-1").await.is_ok());
    assert!(matches!(
        orchestrator.destroy("vm-1").await,
        Err(CoreError::NotFound(_))
    ));
    assert_nothing_left(&runtime);
}

#[tokio::test]
async fn test_destroy_unknown_id() {
    let (_, orchestrator) = default_setup();
    assert!(matches!(
        orchestrator.destroy("ghost").await,
        Err(CoreError::NotFound(id)) if id == "ghost"
    ));
}

#[tokio::test]
async fn test_teardown_is_bounded_when_unit_ignores_terminate() {
    let config = OrchestratorConfig::builder()
        .teardown_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let (runtime, orchestrator) = setup(config);
    runtime.ignore_terminate(true);

    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();

    let report = orchestrator.destroy("vm-1").await.unwrap();
    assert_eq!(report.final_state, LifecycleState::Failed);
    assert_eq!(
        report.warnings,
        vec![TeardownWarning::Timeout(Duration::from_millis(50))]
    );
    assert!(report.elapsed < Duration::from_secs(2));
    assert_eq!(runtime.calls(FakeStage::SignalUnit), 2);
    assert_eq!(orchestrator.count().await, 0);
    assert_nothing_left(&runtime);

    assert!(matches!(
        report.into_result(),
        Err(CoreError::TeardownTimeout { .. })
    ));
}

#[tokio::test]
async fn test_teardown_wait_failure_is_reported() {
    let (runtime, orchestrator) = default_setup();
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();
    runtime.fail_at(FakeStage::WaitUnit);

    let report = orchestrator.destroy("vm-1").await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(
        &report.warnings[0],
        TeardownWarning::Cleanup(f) if f.step == CleanupStep::WaitUnit
    ));
    // Terminate, then the kill fallback.
    assert_eq!(runtime.calls(FakeStage::SignalUnit), 2);
    assert_nothing_left(&runtime);
    assert_eq!(orchestrator.count().await, 0);
    assert!(matches!(
        report.into_result(),
        Err(CoreError::PartialCleanupFailure { .. })
    ));
}

#[tokio::test]
async fn test_teardown_cleanup_failure_still_unregisters() {
    let (runtime, orchestrator) = default_setup();
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();
    runtime.fail_at(FakeStage::DeleteUnit);

    let report = orchestrator.destroy("vm-1").await.unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(
        &report.warnings[0],
        TeardownWarning::Cleanup(f) if f.step == CleanupStep::DeleteUnit
    ));
    // Sandbox deletion was still attempted and cascaded to the unit.
    assert_nothing_left(&runtime);
    assert_eq!(orchestrator.count().await, 0);
    assert!(matches!(
        report.into_result(),
        Err(CoreError::PartialCleanupFailure { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_destroy_of_same_id() {
    let config = OrchestratorConfig::builder()
        .teardown_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let (runtime, orchestrator) = setup(config);
    runtime.ignore_terminate(true);
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.destroy("vm-1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = orchestrator.destroy("vm-1").await;
    assert!(matches!(
        second,
        Err(CoreError::InvalidState {
            actual: LifecycleState::Stopping,
            ..
        })
    ));
    assert_eq!(
        orchestrator.get("vm-1").await.unwrap().state,
        LifecycleState::Stopping
    );

    assert!(first.await.unwrap().is_ok());
    assert_nothing_left(&runtime);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_id_create_with_reservation() {
    let (runtime, orchestrator) = default_setup();
    runtime.set_delay(Duration::from_millis(20));

    let a = orchestrator.create(CreateRequest::new("vm-1", "alpine"));
    let b = orchestrator.create(CreateRequest::new("vm-1", "alpine"));
    let (a, b) = tokio::join!(a, b);

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CoreError::AlreadyExists(_)))));
    // The loser was refused before touching the runtime.
    assert_eq!(runtime.calls(FakeStage::Pull), 1);
    assert_eq!(runtime.live_sandboxes().len(), 1);
    assert_eq!(orchestrator.count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_id_create_without_reservation() {
    let config = OrchestratorConfig::builder()
        .reserve_ids(false)
        .build()
        .unwrap();
    let (runtime, orchestrator) = setup(config);
    runtime.set_delay(Duration::from_millis(20));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .create(CreateRequest::new("vm-1", "alpine"))
                    .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CoreError::AlreadyExists(_)))));
    // Whoever lost tore down its own unit and left the winner alone.
    assert_eq!(orchestrator.count().await, 1);
    assert_eq!(runtime.live_sandboxes().len(), 1);
    assert_eq!(runtime.live_units().len(), 1);
    assert_eq!(
        orchestrator.get("vm-1").await.unwrap().status,
        VmStatus::Running
    );
}

#[tokio::test]
async fn test_different_ids_create_concurrently() {
    let (runtime, orchestrator) = default_setup();
    runtime.set_delay(Duration::from_millis(10));

    let creates = (0..5).map(|i| {
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .create(CreateRequest::new(format!("vm-{i}"), "alpine"))
                .await
        }
    });
    for result in futures::future::join_all(creates).await {
        result.unwrap();
    }

    let ids: Vec<String> = orchestrator.list().await.into_iter().map(|v| v.id).collect();
    assert_eq!(ids, ["vm-0", "vm-1", "vm-2", "vm-3", "vm-4"]);
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_changes() {
    let (runtime, orchestrator) = default_setup();
    let token = CancellationToken::new();
    token.cancel();

    let err = orchestrator
        .create_with_cancel(CreateRequest::new("vm-1", "alpine"), token)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::ImagePullFailed {
            source: RuntimeError::Cancelled,
            ..
        }
    ));
    assert_eq!(orchestrator.count().await, 0);
    assert_nothing_left(&runtime);
}

#[tokio::test]
async fn test_cancel_mid_pipeline_rolls_back() {
    let (runtime, orchestrator) = default_setup();
    runtime.set_delay(Duration::from_millis(30));
    let token = CancellationToken::new();

    let create = {
        let orchestrator = orchestrator.clone();
        let token = token.clone();
        tokio::spawn(async move {
            orchestrator
                .create_with_cancel(CreateRequest::new("vm-1", "alpine"), token)
                .await
        })
    };
    // Pull and sandbox creation are done by now; unit creation is in flight.
    tokio::time::sleep(Duration::from_millis(75)).await;
    token.cancel();

    let err = create.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        CoreError::ImagePullFailed { source: RuntimeError::Cancelled, .. }
            | CoreError::SandboxCreationFailed { source: RuntimeError::Cancelled, .. }
            | CoreError::TaskCreationFailed { source: RuntimeError::Cancelled, .. }
            | CoreError::StartFailed { source: RuntimeError::Cancelled, .. }
    ));
    assert_eq!(orchestrator.count().await, 0);
    assert_nothing_left(&runtime);
}

#[tokio::test]
async fn test_dropped_create_future_rolls_back() {
    let (runtime, orchestrator) = default_setup();
    runtime.set_delay(Duration::from_millis(30));

    let outcome = tokio::time::timeout(
        Duration::from_millis(75),
        orchestrator.create(CreateRequest::new("vm-1", "alpine")),
    )
    .await;
    assert!(outcome.is_err(), "create should still be in flight");

    // Rollback continues in the background.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.count().await, 0);
    assert_nothing_left(&runtime);
    assert!(orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_status_projection() {
    let (runtime, orchestrator) = default_setup();
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();

    runtime.mark_exited("vm-1");
    assert_eq!(
        orchestrator.get("vm-1").await.unwrap().status,
        VmStatus::Stopped
    );

    runtime.fail_at(FakeStage::UnitStatus);
    let vms = orchestrator.list().await;
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].status, VmStatus::Unknown);

    assert!(matches!(
        orchestrator.get("ghost").await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_exited_unit_is_still_cleaned_up() {
    let (runtime, orchestrator) = default_setup();
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();
    runtime.mark_exited("vm-1");

    let report = orchestrator.destroy("vm-1").await.unwrap();
    assert!(report.is_clean());
    assert_nothing_left(&runtime);
}

#[tokio::test]
async fn test_close_tears_everything_down() {
    let (runtime, orchestrator) = default_setup();
    for id in ["vm-a", "vm-b", "vm-c"] {
        orchestrator
            .create(CreateRequest::new(id, "alpine"))
            .await
            .unwrap();
    }

    let report = orchestrator.close().await;
    assert!(report.is_clean());
    let ids: Vec<&str> = report.reports.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["vm-a", "vm-b", "vm-c"]);
    assert_eq!(orchestrator.count().await, 0);
    assert_nothing_left(&runtime);

    assert!(orchestrator.is_closed().await);
    assert!(matches!(
        orchestrator.create(CreateRequest::new("vm-d", "alpine")).await,
        Err(CoreError::Closed)
    ));
}

#[tokio::test]
async fn test_close_respects_deadline() {
    let config = OrchestratorConfig::builder()
        .teardown_timeout(Duration::from_secs(5))
        .shutdown_deadline(Duration::from_millis(100))
        .build()
        .unwrap();
    let (runtime, orchestrator) = setup(config);
    runtime.ignore_terminate(true);
    orchestrator
        .create(CreateRequest::new("vm-1", "alpine"))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let report = orchestrator.close().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.abandoned, ["vm-1"]);
    assert!(report.reports.is_empty());
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_create_racing_close_is_torn_down() {
    let (runtime, orchestrator) = default_setup();
    runtime.set_delay(Duration::from_millis(40));

    let create = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .create(CreateRequest::new("vm-1", "alpine"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = orchestrator.close().await;
    assert!(report.reports.is_empty());
    assert!(report.pending.is_empty());
    assert!(report.is_clean());
    // close returns only after the refused create released its resources
    assert_nothing_left(&runtime);

    assert!(matches!(create.await.unwrap(), Err(CoreError::Closed)));
    assert_eq!(orchestrator.count().await, 0);
}

#[tokio::test]
async fn test_close_waits_for_create_holding_resources() {
    let (runtime, orchestrator) = default_setup();
    runtime.set_delay(Duration::from_millis(30));

    let create = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .create(CreateRequest::new("vm-1", "alpine"))
                .await
        })
    };
    // Past the sandbox and unit stages, before registration.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runtime.live_sandboxes().len(), 1);

    let report = orchestrator.close().await;
    assert!(report.is_clean());
    assert!(report.pending.is_empty());
    assert_nothing_left(&runtime);
    assert_eq!(runtime.calls(FakeStage::DeleteSandbox), 1);

    assert!(matches!(create.await.unwrap(), Err(CoreError::Closed)));
}

#[tokio::test]
async fn test_close_reports_create_still_running_at_deadline() {
    let config = OrchestratorConfig::builder()
        .teardown_timeout(Duration::from_secs(5))
        .shutdown_deadline(Duration::from_millis(100))
        .build()
        .unwrap();
    let (runtime, orchestrator) = setup(config);
    runtime.set_delay(Duration::from_millis(150));

    let create = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .create(CreateRequest::new("vm-1", "alpine"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let report = orchestrator.close().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.reports.is_empty());
    assert!(report.abandoned.is_empty());
    assert_eq!(report.pending, ["vm-1"]);
    assert!(!report.is_clean());

    // The create keeps rolling back in the background.
    assert!(matches!(create.await.unwrap(), Err(CoreError::Closed)));
    assert_eq!(orchestrator.count().await, 0);
    assert_nothing_left(&runtime);
}

#[tokio::test]
async fn test_rejects_invalid_config() {
    let config = OrchestratorConfig {
        call_timeout: Duration::ZERO,
        ..Default::default()
    };
    let runtime = Arc::new(FakeRuntime::default());
    assert!(matches!(
        Orchestrator::new(runtime, config),
        Err(CoreError::Config(_))
    ));
}
