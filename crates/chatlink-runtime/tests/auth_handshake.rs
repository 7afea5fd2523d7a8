//! QR handshake behavior

use std::sync::Arc;
use std::time::Duration;

use chatlink_core::{AuthConfig, ResourceConfig, SessionConfig};
use chatlink_harness::{FixedResourceGuard, MockTransportConfig, MockTransportFactory, StartBehavior};
use chatlink_runtime::{
    AuthError, AuthHandshake, AuthOutcome, AutoReconnect, InitError, QrCode, SessionClient,
    SessionState, TransportError,
};

fn handshake(factory: &MockTransportFactory, config: SessionConfig) -> Arc<AuthHandshake> {
    let session = SessionClient::new(
        config,
        ResourceConfig::testing(),
        Arc::new(factory.clone()),
        Arc::new(FixedResourceGuard::relaxed()),
    );
    Arc::new(AuthHandshake::new(session, AuthConfig::testing()))
}

#[tokio::test(start_paused = true)]
async fn test_request_returns_pairing_code() {
    let factory = MockTransportFactory::requiring_qr("2@pairing-code");
    let auth = handshake(&factory, SessionConfig::testing());

    let outcome = auth.request_auth().await.unwrap();

    assert_eq!(outcome, AuthOutcome::Qr(QrCode::new("2@pairing-code")));
    assert!(auth.pending_request().is_none());
    assert_eq!(factory.stats().creations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_request_is_busy() {
    let factory = MockTransportFactory::new(MockTransportConfig {
        start_latency: Duration::from_millis(50),
        ..MockTransportConfig::instant()
    });
    factory.set_default_start(StartBehavior::RequireQr {
        code: "2@slow".into(),
    });
    let auth = handshake(&factory, SessionConfig::testing());

    let first = tokio::spawn({
        let auth = auth.clone();
        async move { auth.request_auth().await }
    });
    while auth.pending_request().is_none() {
        tokio::task::yield_now().await;
    }

    assert_eq!(auth.request_auth().await.unwrap(), AuthOutcome::Busy);

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome, AuthOutcome::Qr(QrCode::new("2@slow")));
    assert!(auth.pending_request().is_none());
    assert_eq!(factory.stats().creations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ready_session_needs_no_code() {
    let factory = MockTransportFactory::always_ready();
    let auth = handshake(&factory, SessionConfig::testing());
    let session = auth.session().clone();

    session.initialize(false).await.unwrap();
    let mut states = session.subscribe_state();
    states
        .wait_for(|s| *s == SessionState::Ready)
        .await
        .unwrap();

    assert_eq!(auth.request_auth().await.unwrap(), AuthOutcome::NotNeeded);
    assert_eq!(factory.stats().creations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stored_credentials_authenticate_without_code() {
    let factory = MockTransportFactory::always_ready();
    let auth = handshake(&factory, SessionConfig::testing());

    assert_eq!(auth.request_auth().await.unwrap(), AuthOutcome::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_and_releases_slot() {
    let factory = MockTransportFactory::always_ready();
    factory.set_default_start(StartBehavior::Hang);
    let auth = handshake(&factory, SessionConfig::testing());

    let started = tokio::time::Instant::now();
    assert_eq!(auth.request_auth().await.unwrap(), AuthOutcome::TimedOut);
    assert!(started.elapsed() >= AuthConfig::testing().timeout);
    assert!(auth.pending_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_initialization_failure_is_reported() {
    let factory = MockTransportFactory::always_ready();
    factory.script_create_failures([TransportError::other("chromium not found")]);
    let auth = handshake(&factory, SessionConfig::testing());

    let err = auth.request_auth().await.unwrap_err();
    assert!(matches!(err, AuthError::Init(InitError::Create { .. })));
    assert!(auth.pending_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_auto_reconnect_suspended_until_ready() {
    let factory = MockTransportFactory::always_ready();
    factory.set_default_start(StartBehavior::QrThenReady {
        code: "2@scan-me".into(),
        scan_delay: Duration::from_millis(30),
    });
    let config = SessionConfig {
        auto_reconnect: true,
        ..SessionConfig::testing()
    };
    let auth = handshake(&factory, config);
    let session = auth.session().clone();

    let outcome = auth.request_auth().await.unwrap();
    assert_eq!(outcome, AuthOutcome::Qr(QrCode::new("2@scan-me")));
    assert_eq!(session.status().auto_reconnect, AutoReconnect::SuspendedForAuth);

    let mut states = session.subscribe_state();
    states
        .wait_for(|s| *s == SessionState::Ready)
        .await
        .unwrap();
    assert_eq!(session.status().auto_reconnect, AutoReconnect::Enabled);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_request_restores_auto_reconnect() {
    let factory = MockTransportFactory::always_ready();
    factory.set_default_start(StartBehavior::Hang);
    let config = SessionConfig {
        auto_reconnect: true,
        ..SessionConfig::testing()
    };
    let auth = handshake(&factory, config);

    assert_eq!(auth.request_auth().await.unwrap(), AuthOutcome::TimedOut);
    assert_eq!(
        auth.session().status().auto_reconnect,
        AutoReconnect::Enabled
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_restores_auto_reconnect() {
    let factory = MockTransportFactory::always_ready();
    factory.script_create_failures([TransportError::other("chromium not found")]);
    let config = SessionConfig {
        auto_reconnect: true,
        ..SessionConfig::testing()
    };
    let auth = handshake(&factory, config);

    assert!(auth.request_auth().await.is_err());
    assert_eq!(
        auth.session().status().auto_reconnect,
        AutoReconnect::Enabled
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_keeps_explicit_disable() {
    let factory = MockTransportFactory::always_ready();
    factory.set_default_start(StartBehavior::Hang);
    let auth = handshake(&factory, SessionConfig::testing());

    assert_eq!(auth.request_auth().await.unwrap(), AuthOutcome::TimedOut);
    assert_eq!(
        auth.session().status().auto_reconnect,
        AutoReconnect::Disabled
    );
}
