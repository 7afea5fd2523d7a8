//! Session client for the chatlink runtime
//!
//! `SessionClient` owns the single transport handle, pumps its events through
//! the [`ConnectionManager`] and carries out the resulting effects: tearing
//! handles down, arming reconnect and cool-down timers, and fanning QR codes
//! out to waiting handshakes.
//!
//! Locking: `inner` is a short-lived `std::sync::Mutex` that is never held
//! across an `.await`. All waiting happens on tokio timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chatlink_core::{
    AuditEntry, IncomingMessage, InitError, QrCode, ResourceConfig, ResourceGuard,
    SessionConfig, SessionEffect, SessionEvent, SessionState, TransportError, TransportEvent,
    TransportEventReceiver, TransportFactory, TransportHandle,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{AutoReconnect, ConnectionManager, SessionStats};

const AUTH_SIGNAL_CAPACITY: usize = 16;

// ----------------------------------------------------------------------------
// Public Types
// ----------------------------------------------------------------------------

/// Result of a successful `initialize()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitOutcome {
    /// A live handle already exists and `force` was not set
    AlreadyActive,
    /// Another initialization is running; this call did nothing
    InProgress,
    /// A new handle was created and started
    Started,
}

/// Authentication progress broadcast to QR handshakes and displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    Qr(QrCode),
    Authenticated,
}

/// How a handle teardown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Clean,
    Failed,
}

/// Snapshot returned by [`SessionClient::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub state: SessionState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub auto_reconnect: AutoReconnect,
    pub has_handle: bool,
    pub handle_generation: u64,
    pub cooldown_pending: bool,
    pub stats: SessionStats,
}

// ----------------------------------------------------------------------------
// Internal State
// ----------------------------------------------------------------------------

struct ActiveHandle {
    generation: u64,
    transport: Arc<dyn TransportHandle>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct Timer {
    seq: u64,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    /// Replace any pending timer, returning the sequence number for the new one
    fn rearm(&mut self) -> u64 {
        self.cancel();
        self.seq
    }

    fn cancel(&mut self) {
        self.seq += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Called by the timer task when it fires; false if it was superseded
    fn claim(&mut self, seq: u64) -> bool {
        if self.seq != seq {
            return false;
        }
        self.task = None;
        true
    }
}

struct SessionInner {
    manager: ConnectionManager,
    handle: Option<ActiveHandle>,
    generation: u64,
    reinit_timer: Timer,
    cooldown_timer: Timer,
    closed: bool,
}

/// Resets the single-flight flag when an initialization ends, however it ends
struct InitFlight {
    client: Arc<SessionClient>,
}

impl InitFlight {
    fn acquire(client: Arc<SessionClient>) -> Option<Self> {
        client
            .initializing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { client })
    }
}

impl Drop for InitFlight {
    fn drop(&mut self) {
        self.client.initializing.store(false, Ordering::Release);
    }
}

// ----------------------------------------------------------------------------
// Session Client
// ----------------------------------------------------------------------------

/// Owner of the transport handle and the session state machine
pub struct SessionClient {
    config: SessionConfig,
    resources: ResourceConfig,
    factory: Arc<dyn TransportFactory>,
    guard: Arc<dyn ResourceGuard>,
    inner: Mutex<SessionInner>,
    initializing: AtomicBool,
    state_tx: watch::Sender<SessionState>,
    auth_tx: broadcast::Sender<AuthSignal>,
    inbound_tx: mpsc::UnboundedSender<IncomingMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
    this: Weak<SessionClient>,
}

impl SessionClient {
    pub fn new(
        config: SessionConfig,
        resources: ResourceConfig,
        factory: Arc<dyn TransportFactory>,
        guard: Arc<dyn ResourceGuard>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        let (auth_tx, _) = broadcast::channel(AUTH_SIGNAL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(config.clone());

        Arc::new_cyclic(|this| Self {
            config,
            resources,
            factory,
            guard,
            inner: Mutex::new(SessionInner {
                manager,
                handle: None,
                generation: 0,
                reinit_timer: Timer::default(),
                cooldown_timer: Timer::default(),
                closed: false,
            }),
            initializing: AtomicBool::new(false),
            state_tx,
            auth_tx,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Whether the transport is usable for delivery
    pub fn is_ready(&self) -> bool {
        self.state_tx.borrow().is_ready()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current handle, if any. It may be torn down at any later point.
    pub fn handle(&self) -> Option<Arc<dyn TransportHandle>> {
        self.lock().handle.as_ref().map(|h| h.transport.clone())
    }

    pub fn attempts_made(&self) -> u32 {
        self.lock().manager.attempts_made()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        let state = inner.manager.state();
        SessionStatus {
            connected: state.is_ready(),
            state,
            attempts_made: inner.manager.attempts_made(),
            max_attempts: inner.manager.max_attempts(),
            auto_reconnect: inner.manager.auto_reconnect(),
            has_handle: inner.handle.is_some(),
            handle_generation: inner.generation,
            cooldown_pending: inner.manager.cooldown_pending(),
            stats: inner.manager.stats().clone(),
        }
    }

    pub fn audit_trail(&self, limit: usize) -> Vec<AuditEntry> {
        self.lock().manager.recent_audit_entries(limit)
    }

    /// Receive QR codes and authentication notices
    pub fn subscribe_auth(&self) -> broadcast::Receiver<AuthSignal> {
        self.auth_tx.subscribe()
    }

    /// Take the inbound message receiver (can only be called once)
    pub fn take_inbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<IncomingMessage>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    // ------------------------------------------------------------------------
    // Controls
    // ------------------------------------------------------------------------

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.lock().manager.set_auto_reconnect(enabled);
    }

    pub(crate) fn suspend_auto_reconnect(&self) {
        self.lock().manager.suspend_for_auth();
    }

    pub(crate) fn resume_auto_reconnect(&self) {
        self.lock().manager.resume_after_auth();
    }

    /// Clear the retry budget and return to `Uninitialized`
    pub fn reset(&self) {
        info!("Manual session reset requested");
        self.apply(None, SessionEvent::ManualReset);
    }

    /// Mark the handle unusable after a fault seen outside the event stream
    pub fn invalidate_handle(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "Invalidating transport handle");
        self.apply(None, SessionEvent::HandleInvalidated { reason });
    }

    /// Stop timers and release the handle; later `initialize()` calls fail
    pub async fn shutdown(&self) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.reinit_timer.cancel();
            inner.cooldown_timer.cancel();
        }
        if let Some(outcome) = self.teardown_handle().await {
            debug!(?outcome, "Transport handle released on shutdown");
        }
        info!("Session client shut down");
    }

    // ------------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------------

    /// Create and start a transport handle
    ///
    /// Returns immediately when a live handle exists (unless `force`) or when
    /// another initialization is in flight. The procedure itself runs on its
    /// own task, so dropping the returned future does not abandon a half-built
    /// handle.
    pub async fn initialize(&self, force: bool) -> Result<InitOutcome, InitError> {
        let client = self.this.upgrade().ok_or(InitError::Closed)?;
        {
            let inner = self.lock();
            if inner.closed {
                return Err(InitError::Closed);
            }
            if !force && inner.handle.is_some() {
                debug!("Transport handle already active");
                return Ok(InitOutcome::AlreadyActive);
            }
        }

        let Some(flight) = InitFlight::acquire(client) else {
            debug!("Initialization already in progress");
            return Ok(InitOutcome::InProgress);
        };

        tokio::spawn(async move {
            let client = flight.client.clone();
            let result = client.run_initialize(force).await;
            drop(flight);
            result
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Initialization task failed");
            Err(InitError::Startup {
                source: TransportError::other(format!("initialization task failed: {e}")),
            })
        })
    }

    async fn run_initialize(&self, force: bool) -> Result<InitOutcome, InitError> {
        let attempts = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(InitError::Closed);
            }
            if !force && inner.handle.is_some() {
                return Ok(InitOutcome::AlreadyActive);
            }
            if inner.manager.budget_exhausted() {
                let attempts = inner.manager.attempts_made();
                let max_attempts = inner.manager.max_attempts();
                error!(attempts, max_attempts, "Initialization attempts exhausted");
                self.apply_locked(&mut inner, None, SessionEvent::AttemptsExhausted);
                return Err(InitError::AttemptsExhausted {
                    attempts,
                    max_attempts,
                });
            }
            self.apply_locked(&mut inner, None, SessionEvent::InitializeRequested { force });
            inner.manager.attempts_made()
        };
        info!(
            attempt = attempts + 1,
            max_attempts = self.config.max_attempts,
            force,
            "Initializing transport session"
        );

        if self.guard.should_throttle() {
            warn!(
                pause_ms = self.resources.throttle_pause.as_millis() as u64,
                "High memory usage detected, pausing before initialization"
            );
            self.guard.request_reclaim();
            tokio::time::sleep(self.resources.throttle_pause).await;
        }

        match self.teardown_handle().await {
            Some(TeardownOutcome::Clean) => tokio::time::sleep(self.config.release_grace).await,
            Some(TeardownOutcome::Failed) => tokio::time::sleep(self.config.failure_grace).await,
            None => {}
        }

        if attempts > 0 {
            let delay = self.config.backoff.delay(attempts);
            info!(
                attempt = attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "Backing off before reinitialization"
            );
            tokio::time::sleep(delay).await;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = match self.factory.create(events_tx).await {
            Ok(transport) => transport,
            Err(source) => {
                error!(error = %source, "Failed to create transport handle");
                self.apply(
                    None,
                    SessionEvent::StartupFailed {
                        reason: source.to_string(),
                    },
                );
                return Err(InitError::Create { source });
            }
        };

        let generation = self.attach_handle(transport.clone(), events_rx)?;

        match tokio::time::timeout(self.config.startup_timeout, transport.start()).await {
            Ok(Ok(())) => {
                info!(generation, "Transport startup completed");
                self.apply(Some(generation), SessionEvent::StartupSucceeded);
                Ok(InitOutcome::Started)
            }
            Ok(Err(source)) => {
                error!(generation, error = %source, "Transport startup failed");
                self.fail_startup(generation, source.to_string()).await;
                Err(InitError::Startup { source })
            }
            Err(_) => {
                let duration_ms = self.config.startup_timeout.as_millis() as u64;
                error!(generation, duration_ms, "Transport startup timed out");
                self.fail_startup(generation, format!("startup timed out after {duration_ms}ms"))
                    .await;
                Err(InitError::StartupTimeout { duration_ms })
            }
        }
    }

    fn attach_handle(
        &self,
        transport: Arc<dyn TransportHandle>,
        events: TransportEventReceiver,
    ) -> Result<u64, InitError> {
        let mut inner = self.lock();
        if inner.closed {
            drop(inner);
            spawn_destroy(transport, self.config.teardown_timeout);
            return Err(InitError::Closed);
        }
        inner.generation += 1;
        let generation = inner.generation;
        let pump = tokio::spawn(pump_events(self.this.clone(), generation, events));
        inner.handle = Some(ActiveHandle {
            generation,
            transport,
            pump,
        });
        inner.manager.stats_mut().handles_created += 1;
        debug!(generation, "Transport handle attached");
        Ok(generation)
    }

    async fn fail_startup(&self, generation: u64, reason: String) {
        let current = self.lock().handle.as_ref().map(|h| h.generation);
        if current == Some(generation) {
            if let Some(outcome) = self.teardown_handle().await {
                debug!(generation, ?outcome, "Failed handle torn down");
            }
        }
        self.apply(None, SessionEvent::StartupFailed { reason });
    }

    /// Detach the current handle, stop its event pump and destroy it
    ///
    /// The handle is discarded whether or not `destroy()` succeeds.
    pub async fn teardown_handle(&self) -> Option<TeardownOutcome> {
        let active = self.lock().handle.take()?;
        active.pump.abort();
        info!(generation = active.generation, "Tearing down transport handle");
        Some(destroy_with_timeout(active.transport, self.config.teardown_timeout).await)
    }

    // ------------------------------------------------------------------------
    // Event Handling
    // ------------------------------------------------------------------------

    fn on_transport_event(&self, generation: u64, event: TransportEvent) {
        let session_event = match event {
            TransportEvent::Message(message) => {
                if self.is_current(generation) {
                    debug!(from = %message.from, "Inbound message received");
                    if self.inbound_tx.send(message).is_err() {
                        debug!("Inbound receiver dropped, message discarded");
                    }
                }
                return;
            }
            TransportEvent::Qr(code) => SessionEvent::QrReceived { code },
            TransportEvent::Ready => SessionEvent::Ready,
            TransportEvent::Authenticated => SessionEvent::Authenticated,
            TransportEvent::AuthFailure(reason) => {
                error!(generation, %reason, "Transport authentication failure");
                SessionEvent::AuthFailure { reason }
            }
            TransportEvent::Disconnected(reason) => {
                warn!(generation, %reason, "Transport disconnected");
                SessionEvent::Disconnected { reason }
            }
            TransportEvent::Fault(error) => {
                warn!(generation, %error, "Transport fault reported");
                SessionEvent::TransportFault { error }
            }
        };
        self.apply(Some(generation), session_event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().handle.as_ref().map(|h| h.generation) == Some(generation)
    }

    fn apply(&self, origin: Option<u64>, event: SessionEvent) {
        let mut inner = self.lock();
        self.apply_locked(&mut inner, origin, event);
    }

    /// Run an event through the state machine and carry out its effects
    ///
    /// Events from a handle other than the current one are discarded.
    fn apply_locked(&self, inner: &mut SessionInner, origin: Option<u64>, event: SessionEvent) {
        if let Some(generation) = origin {
            let current = inner.handle.as_ref().map(|h| h.generation);
            if current != Some(generation) {
                debug!(
                    generation,
                    event = event.name(),
                    "Discarding event from stale handle"
                );
                return;
            }
        }

        let transition = match inner.manager.process_event(event) {
            Ok(transition) => transition,
            Err(e) => {
                debug!(error = %e, "Session event ignored");
                return;
            }
        };
        debug!(
            from = %transition.audit_entry.from_state,
            to = %transition.new_state,
            event = %transition.audit_entry.event,
            "Session state transition"
        );
        self.state_tx.send_replace(transition.new_state);

        for effect in transition.effects {
            self.execute_effect(inner, effect);
        }
    }

    fn execute_effect(&self, inner: &mut SessionInner, effect: SessionEffect) {
        match effect {
            SessionEffect::TeardownHandle => {
                if let Some(active) = inner.handle.take() {
                    active.pump.abort();
                    debug!(generation = active.generation, "Releasing invalidated handle");
                    spawn_destroy(active.transport, self.config.teardown_timeout);
                }
            }
            SessionEffect::ScheduleReinit { delay } => {
                if inner.closed {
                    return;
                }
                info!(delay_ms = delay.as_millis() as u64, "Scheduling reinitialization");
                let seq = inner.reinit_timer.rearm();
                let this = self.this.clone();
                inner.reinit_timer.task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(client) = this.upgrade() else { return };
                    if !client.lock().reinit_timer.claim(seq) {
                        return;
                    }
                    match client.initialize(false).await {
                        Ok(outcome) => debug!(?outcome, "Scheduled reinitialization finished"),
                        Err(e) => warn!(error = %e, "Scheduled reinitialization failed"),
                    }
                }));
            }
            SessionEffect::ScheduleCooldown { delay } => {
                if inner.closed {
                    return;
                }
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    "Retry budget exhausted, cooling down"
                );
                let seq = inner.cooldown_timer.rearm();
                let this = self.this.clone();
                inner.cooldown_timer.task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(client) = this.upgrade() else { return };
                    let mut inner = client.lock();
                    if !inner.cooldown_timer.claim(seq) {
                        return;
                    }
                    info!("Cool-down elapsed, resetting retry budget");
                    client.apply_locked(&mut inner, None, SessionEvent::CooldownElapsed);
                }));
            }
            SessionEffect::CancelTimers => {
                inner.reinit_timer.cancel();
                inner.cooldown_timer.cancel();
            }
            SessionEffect::ForwardQr { code } => {
                info!("QR code received, waiting for scan");
                // No receivers simply means nobody is waiting for a code.
                let _ = self.auth_tx.send(AuthSignal::Qr(QrCode::new(code)));
            }
            SessionEffect::NotifyAuthenticated => {
                info!("Transport authenticated");
                let _ = self.auth_tx.send(AuthSignal::Authenticated);
            }
            SessionEffect::ResetAttempts
            | SessionEffect::IncrementAttempts
            | SessionEffect::RestoreAutoReconnect => {}
        }
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("state", &self.state())
            .field("initializing", &self.initializing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

async fn pump_events(client: Weak<SessionClient>, generation: u64, mut events: TransportEventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        client.on_transport_event(generation, event);
    }
    debug!(generation, "Transport event stream ended");
}

async fn destroy_with_timeout(
    transport: Arc<dyn TransportHandle>,
    timeout: Duration,
) -> TeardownOutcome {
    match tokio::time::timeout(timeout, transport.destroy()).await {
        Ok(Ok(())) => TeardownOutcome::Clean,
        Ok(Err(e)) => {
            warn!(error = %e, "Transport destroy failed, discarding handle");
            TeardownOutcome::Failed
        }
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Transport destroy timed out, discarding handle"
            );
            TeardownOutcome::Failed
        }
    }
}

fn spawn_destroy(transport: Arc<dyn TransportHandle>, timeout: Duration) {
    tokio::spawn(async move {
        let outcome = destroy_with_timeout(transport, timeout).await;
        debug!(?outcome, "Background teardown finished");
    });
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
