//! Session client lifecycle against the scripted mock transport

use std::sync::Arc;
use std::time::Duration;

use chatlink_core::{AuthConfig, ResourceConfig, SessionConfig, TransportEvent};
use chatlink_harness::{FixedResourceGuard, MockTransportConfig, MockTransportFactory, StartBehavior};
use chatlink_runtime::{
    AuthHandshake, AuthOutcome, AutoReconnect, InitError, InitOutcome, SessionClient,
    SessionState, TransportError,
};

fn session_with(factory: &MockTransportFactory, config: SessionConfig) -> Arc<SessionClient> {
    SessionClient::new(
        config,
        ResourceConfig::testing(),
        Arc::new(factory.clone()),
        Arc::new(FixedResourceGuard::relaxed()),
    )
}

fn reconnecting() -> SessionConfig {
    SessionConfig {
        auto_reconnect: true,
        ..SessionConfig::testing()
    }
}

async fn wait_for_state(session: &SessionClient, target: SessionState) {
    let mut states = session.subscribe_state();
    tokio::time::timeout(Duration::from_secs(30), states.wait_for(|s| *s == target))
        .await
        .expect("state not reached in time")
        .expect("session dropped");
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn test_initialize_reaches_ready() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, SessionConfig::testing());

    assert_eq!(session.initialize(false).await.unwrap(), InitOutcome::Started);
    wait_for_state(&session, SessionState::Ready).await;

    let status = session.status();
    assert!(status.connected);
    assert!(status.has_handle);
    assert_eq!(status.attempts_made, 0);
    assert_eq!(status.handle_generation, 1);
    assert_eq!(status.stats.handles_created, 1);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["connected"], true);
    assert_eq!(json["state"], "Ready");
}

#[tokio::test(start_paused = true)]
async fn test_initialize_while_ready_reuses_handle() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, SessionConfig::testing());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;

    assert_eq!(
        session.initialize(false).await.unwrap(),
        InitOutcome::AlreadyActive
    );
    assert_eq!(factory.stats().creations, 1);
    assert!(session.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_initialize_is_single_flight() {
    let factory = MockTransportFactory::new(MockTransportConfig {
        start_latency: Duration::from_millis(50),
        ..MockTransportConfig::instant()
    });
    let session = session_with(&factory, SessionConfig::testing());

    let (first, second) = tokio::join!(session.initialize(false), session.initialize(false));
    assert_eq!(first.unwrap(), InitOutcome::Started);
    assert_eq!(second.unwrap(), InitOutcome::InProgress);
    assert_eq!(factory.stats().creations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_startup_failures_exhaust_budget_then_cool_down() {
    let factory = MockTransportFactory::always_ready();
    let crash = StartBehavior::Fail(TransportError::StartupFailed {
        reason: "browser exited during launch".into(),
    });
    factory.script_starts(vec![crash; 3]);
    let session = session_with(&factory, SessionConfig::testing());

    for attempt in 1..=2 {
        let err = session.initialize(false).await.unwrap_err();
        assert!(matches!(err, InitError::Startup { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.attempts_made(), attempt);
    }

    let err = session.initialize(false).await.unwrap_err();
    assert!(matches!(err, InitError::Startup { .. }));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.attempts_made(), 3);
    assert!(session.status().cooldown_pending);

    // Nothing is constructed while cooling down.
    let err = session.initialize(false).await.unwrap_err();
    assert!(matches!(
        err,
        InitError::AttemptsExhausted {
            attempts: 3,
            max_attempts: 3
        }
    ));
    assert_eq!(factory.stats().creations, 3);
    assert!(factory.handles().iter().all(|h| h.is_destroyed()));

    // The cool-down resets the budget and retries on its own.
    wait_for_state(&session, SessionState::Ready).await;
    assert_eq!(factory.stats().creations, 4);
    assert_eq!(session.attempts_made(), 0);
    assert!(!session.status().cooldown_pending);
    assert_eq!(session.status().stats.cooldowns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_startup_timeout_counts_as_failure() {
    let factory = MockTransportFactory::always_ready();
    factory.set_default_start(StartBehavior::Hang);
    let session = session_with(&factory, SessionConfig::testing());

    let err = session.initialize(false).await.unwrap_err();
    assert_eq!(err, InitError::StartupTimeout { duration_ms: 500 });
    assert_eq!(session.attempts_made(), 1);
    assert!(!session.status().has_handle);
    assert!(factory.latest_handle().unwrap().is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_counts_as_failure() {
    let factory = MockTransportFactory::always_ready();
    factory.script_create_failures([TransportError::other("chromium not found")]);
    let session = session_with(&factory, SessionConfig::testing());

    let err = session.initialize(false).await.unwrap_err();
    assert!(matches!(err, InitError::Create { .. }));
    assert_eq!(session.attempts_made(), 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_events_from_replaced_handle_are_ignored() {
    let factory = MockTransportFactory::requiring_qr("2@first");
    let session = session_with(&factory, SessionConfig::testing());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::AwaitingAuth).await;
    let old = factory.latest_handle().unwrap();

    assert_eq!(session.initialize(true).await.unwrap(), InitOutcome::Started);
    assert!(old.is_destroyed());
    assert_eq!(factory.stats().creations, 2);

    old.emit(TransportEvent::Ready);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.state(), SessionState::AwaitingAuth);
    assert_eq!(session.status().handle_generation, 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reset_releases_handle() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, SessionConfig::testing());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;

    session.reset();
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(!session.status().has_handle);

    let handle = factory.latest_handle().unwrap();
    eventually(|| handle.is_destroyed()).await;
}

#[tokio::test(start_paused = true)]
async fn test_memory_pressure_pauses_initialization() {
    let factory = MockTransportFactory::always_ready();
    let guard = Arc::new(FixedResourceGuard::pressured());
    let resources = ResourceConfig::testing();
    let session = SessionClient::new(
        SessionConfig::testing(),
        resources.clone(),
        Arc::new(factory.clone()),
        guard.clone(),
    );

    let started = tokio::time::Instant::now();
    session.initialize(false).await.unwrap();

    assert!(started.elapsed() >= resources.throttle_pause);
    assert_eq!(guard.reclaim_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_schedules_reconnect_when_enabled() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, reconnecting());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;

    let first = factory.latest_handle().unwrap();
    first.emit(TransportEvent::Disconnected("NAVIGATION".into()));

    eventually(|| session.is_ready() && session.status().handle_generation == 2).await;
    assert!(first.is_destroyed());
    assert_eq!(session.status().stats.disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_without_auto_reconnect_stays_down() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, SessionConfig::testing());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;

    factory
        .latest_handle()
        .unwrap()
        .emit(TransportEvent::Disconnected("LOGOUT".into()));
    wait_for_state(&session, SessionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(factory.stats().creations, 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_transport_fault_rebuilds_after_fault_cooldown() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, reconnecting());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;

    let started = tokio::time::Instant::now();
    factory
        .latest_handle()
        .unwrap()
        .emit(TransportEvent::Fault(TransportError::TargetClosed));

    eventually(|| session.is_ready() && session.status().handle_generation == 2).await;
    assert!(started.elapsed() >= reconnecting().fault_cooldown);
    assert_eq!(session.status().stats.faults, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fault_while_awaiting_scan_rebuilds_handle() {
    let factory = MockTransportFactory::requiring_qr("2@scan-me");
    let session = session_with(&factory, reconnecting());
    let auth = AuthHandshake::new(session.clone(), AuthConfig::testing());

    let outcome = auth.request_auth().await.unwrap();
    assert!(matches!(outcome, AuthOutcome::Qr(_)));
    assert_eq!(session.state(), SessionState::AwaitingAuth);
    assert_eq!(
        session.status().auto_reconnect,
        AutoReconnect::SuspendedForAuth
    );

    let started = tokio::time::Instant::now();
    let first = factory.latest_handle().unwrap();
    first.emit(TransportEvent::Fault(TransportError::TargetClosed));

    eventually(|| {
        session.state() == SessionState::AwaitingAuth && session.status().handle_generation == 2
    })
    .await;
    assert!(started.elapsed() >= reconnecting().fault_cooldown);
    assert!(first.is_destroyed());
    assert_eq!(factory.stats().creations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_destroy_waits_longer_and_discards_handle() {
    let factory = MockTransportFactory::new(MockTransportConfig {
        destroy_fails: true,
        ..MockTransportConfig::instant()
    });
    let config = SessionConfig::testing();
    let session = session_with(&factory, config.clone());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;
    let first = factory.latest_handle().unwrap();

    let started = tokio::time::Instant::now();
    let reinit = tokio::spawn({
        let session = session.clone();
        async move { session.initialize(true).await }
    });
    eventually(|| first.is_destroyed()).await;
    assert!(!session.status().has_handle);

    assert_eq!(reinit.await.unwrap().unwrap(), InitOutcome::Started);
    assert!(started.elapsed() >= config.failure_grace);
    assert_eq!(session.status().handle_generation, 2);
    assert_eq!(factory.stats().creations, 2);
    assert_eq!(factory.stats().destroys, 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_destroy_is_abandoned_after_timeout() {
    let config = SessionConfig::testing();
    let factory = MockTransportFactory::new(MockTransportConfig {
        destroy_latency: config.teardown_timeout * 4,
        ..MockTransportConfig::instant()
    });
    let session = session_with(&factory, config.clone());

    session.initialize(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;
    let first = factory.latest_handle().unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(
        session.initialize(true).await.unwrap(),
        InitOutcome::Started
    );

    assert!(started.elapsed() >= config.teardown_timeout + config.failure_grace);
    assert!(started.elapsed() < config.teardown_timeout * 4);
    // The timed-out destroy never finished, yet the handle was replaced.
    assert!(!first.is_destroyed());
    assert_eq!(session.status().handle_generation, 2);
    assert!(session.status().has_handle);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_initialize() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, SessionConfig::testing());

    session.initialize(false).await.unwrap();
    session.shutdown().await;

    assert_eq!(session.initialize(false).await, Err(InitError::Closed));
    assert!(factory.latest_handle().unwrap().is_destroyed());
    assert!(session.handle().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_messages_reach_receiver() {
    let factory = MockTransportFactory::always_ready();
    let session = session_with(&factory, SessionConfig::testing());
    let mut inbound = session.take_inbound_receiver().unwrap();
    assert!(session.take_inbound_receiver().is_none());

    session.initialize(false).await.unwrap();
    factory
        .latest_handle()
        .unwrap()
        .deliver_incoming("5215550001@c.us", "hola");

    let message = inbound.recv().await.unwrap();
    assert_eq!(message.from.as_str(), "5215550001@c.us");
    assert_eq!(message.body, "hola");
}
