//! Integration tests for instance lifecycle (create, start, stop, restart).

mod common;

use common::TestContext;
use corral::{
    CorralError, CreatedInstance, InstanceKind, InstanceLifecycleManager, InstanceSpec,
    InstanceState, SourceType, Timeout,
};

fn manager(ctx: &TestContext) -> InstanceLifecycleManager {
    InstanceLifecycleManager::new(ctx.service.handle(), &ctx.options)
}

// ============================================================================
// CREATE TESTS
// ============================================================================

#[tokio::test]
async fn create_then_start_reaches_running() {
    let ctx = TestContext::new();
    let lifecycle = manager(&ctx);

    let mut create = lifecycle
        .create_instance(InstanceSpec::from_image("c1", "ubuntu-22.04"))
        .await
        .unwrap();
    assert_eq!(create.name(), "c1");
    let instance = create
        .wait(ctx.options.create_timeout(), &ctx.cancel)
        .await
        .unwrap();
    assert_eq!(lifecycle.state(&instance).await.unwrap(), InstanceState::Stopped);

    let mut start = lifecycle
        .start_instance(&instance, Timeout::Infinite)
        .await
        .unwrap();
    start.wait(ctx.options.start_timeout(), &ctx.cancel).await.unwrap();
    assert_eq!(lifecycle.state(&instance).await.unwrap(), InstanceState::Running);
}

#[tokio::test]
async fn create_rejects_empty_name_without_remote_call() {
    let ctx = TestContext::new();
    let err = manager(&ctx)
        .create_instance(InstanceSpec::from_image("  ", "ubuntu-22.04"))
        .await
        .unwrap_err();
    assert!(matches!(err, CorralError::Validation(_)));
    assert_eq!(ctx.service.calls().create, 0);
}

#[tokio::test]
async fn create_rejects_image_source_without_alias() {
    let ctx = TestContext::new();
    let err = manager(&ctx)
        .create_instance(InstanceSpec::from_image("c1", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, CorralError::Validation(_)));
    assert_eq!(ctx.service.calls().create, 0);
}

#[tokio::test]
async fn create_without_source_needs_no_alias() {
    let ctx = TestContext::new();
    let spec = InstanceSpec::empty("scratch").kind(InstanceKind::VirtualMachine);
    assert_eq!(spec.source_type, SourceType::None);

    let mut create = manager(&ctx).create_instance(spec).await.unwrap();
    create.wait(Timeout::Infinite, &ctx.cancel).await.unwrap();
}

#[tokio::test]
async fn unknown_image_surfaces_remote_reason() {
    let ctx = TestContext::new();
    let mut create = manager(&ctx)
        .create_instance(InstanceSpec::from_image("c1", "plan9"))
        .await
        .unwrap();

    let err = create
        .wait(ctx.options.create_timeout(), &ctx.cancel)
        .await
        .unwrap_err();
    match err {
        CorralError::RemoteFailure { operation, reason } => {
            assert_eq!(&operation, create.tracker().id());
            assert!(reason.contains("plan9"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The failure is cached.
    let polls = ctx.service.calls().get_operation;
    let again = create.wait(Timeout::Infinite, &ctx.cancel).await;
    assert!(matches!(again, Err(CorralError::RemoteFailure { .. })));
    assert_eq!(ctx.service.calls().get_operation, polls);
}

#[tokio::test]
async fn duplicate_name_fails_remotely() {
    let ctx = TestContext::new();
    let lifecycle = manager(&ctx);
    lifecycle
        .provision(InstanceSpec::from_image("c1", "alpine"), &ctx.options, &ctx.cancel)
        .await
        .unwrap();

    let mut second = lifecycle
        .create_instance(InstanceSpec::from_image("c1", "alpine"))
        .await
        .unwrap();
    let err = second.wait(Timeout::Infinite, &ctx.cancel).await.unwrap_err();
    assert!(matches!(err, CorralError::RemoteFailure { .. }));
}

// ============================================================================
// TIMEOUT / CANCELLATION TESTS
// ============================================================================

#[tokio::test]
async fn create_timeout_cancels_remote_operation() {
    let ctx = TestContext::with_config(corral_test_utils::SimulatedConfig {
        create_delay: std::time::Duration::from_secs(30),
        ..Default::default()
    });
    let mut create = manager(&ctx)
        .create_instance(InstanceSpec::from_image("slow", "alpine"))
        .await
        .unwrap();

    let err = create
        .wait(Timeout::from_millis(50), &ctx.cancel)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(ctx.service.calls().cancel, 1);
    assert_eq!(ctx.service.cancelled(), vec![create.tracker().id().clone()]);

    // Waiting again on an abandoned tracker does not cancel a second time.
    let _ = create.wait(Timeout::from_millis(10), &ctx.cancel).await;
    assert_eq!(ctx.service.calls().cancel, 1);
}

#[tokio::test]
async fn cancel_signal_stops_provisioning() {
    let ctx = TestContext::with_config(corral_test_utils::SimulatedConfig {
        start_delay: std::time::Duration::from_secs(30),
        ..Default::default()
    });
    let lifecycle = manager(&ctx);
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let err = lifecycle
        .provision(InstanceSpec::from_image("c1", "alpine"), &ctx.options, &ctx.cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
    assert_eq!(ctx.service.calls().cancel, 1);
}

// ============================================================================
// STATE CHANGE TESTS
// ============================================================================

#[tokio::test]
async fn stop_and_restart_existing_instance() {
    let ctx = TestContext::new();
    ctx.service.seed_instance("web", InstanceState::Running);
    let lifecycle = manager(&ctx);
    let instance = CreatedInstance::assume_existing("web");

    let mut stop = lifecycle
        .stop_instance(&instance, Timeout::from_secs(10), true)
        .await
        .unwrap();
    stop.wait(Timeout::Infinite, &ctx.cancel).await.unwrap();
    assert_eq!(lifecycle.state(&instance).await.unwrap(), InstanceState::Stopped);

    let mut restart = lifecycle
        .restart_instance(&instance, Timeout::Infinite, false)
        .await
        .unwrap();
    restart.wait(Timeout::Infinite, &ctx.cancel).await.unwrap();
    assert_eq!(lifecycle.state(&instance).await.unwrap(), InstanceState::Running);
    assert_eq!(ctx.service.calls().update_state, 2);
}

#[tokio::test]
async fn start_of_missing_instance_fails() {
    let ctx = TestContext::new();
    let lifecycle = manager(&ctx);
    let ghost = CreatedInstance::assume_existing("ghost");

    let mut start = lifecycle
        .start_instance(&ghost, Timeout::Infinite)
        .await
        .unwrap();
    let err = start.wait(Timeout::Infinite, &ctx.cancel).await.unwrap_err();
    assert!(matches!(err, CorralError::RemoteFailure { .. }));
    assert_eq!(lifecycle.state(&ghost).await.unwrap(), InstanceState::Unknown);
}
