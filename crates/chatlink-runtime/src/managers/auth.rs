//! QR authentication handshake
//!
//! A single-flight, timed request for a pairing code layered on the session
//! client's authentication signals.

use std::sync::{Arc, Mutex, PoisonError};

use chatlink_core::{AuthConfig, AuthError, QrCode};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::session::{AuthSignal, SessionClient};

/// How an accepted or rejected authentication request ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthOutcome {
    /// Pairing code to show to the user
    Qr(QrCode),
    /// Session is already ready
    NotNeeded,
    /// Stored credentials were accepted before any code was produced
    Authenticated,
    /// Another request is pending
    Busy,
    /// No code or authentication within the timeout
    TimedOut,
}

/// Correlation slot for the single pending request
type PendingSlot = Mutex<Option<Uuid>>;

/// Releases the pending slot on every exit path, including cancellation
struct AuthTicket<'a> {
    slot: &'a PendingSlot,
    token: Uuid,
}

impl<'a> AuthTicket<'a> {
    fn acquire(slot: &'a PendingSlot) -> Option<Self> {
        let mut pending = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_some() {
            return None;
        }
        let token = Uuid::new_v4();
        *pending = Some(token);
        Some(Self { slot, token })
    }
}

impl Drop for AuthTicket<'_> {
    fn drop(&mut self) {
        let mut pending = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if *pending == Some(self.token) {
            *pending = None;
        }
    }
}

/// Suspends auto-reconnect for one handshake and lifts it on drop
///
/// A handshake that hands out a code keeps the suspension until the session
/// reaches Ready.
struct ReconnectSuspension<'a> {
    session: &'a SessionClient,
    hold_until_ready: bool,
}

impl<'a> ReconnectSuspension<'a> {
    fn begin(session: &'a SessionClient) -> Self {
        session.suspend_auto_reconnect();
        Self {
            session,
            hold_until_ready: false,
        }
    }
}

impl Drop for ReconnectSuspension<'_> {
    fn drop(&mut self) {
        if !self.hold_until_ready {
            self.session.resume_auto_reconnect();
        }
    }
}

pub struct AuthHandshake {
    session: Arc<SessionClient>,
    config: AuthConfig,
    pending: PendingSlot,
}

impl AuthHandshake {
    pub fn new(session: Arc<SessionClient>, config: AuthConfig) -> Self {
        Self {
            session,
            config,
            pending: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    /// Token of the request currently waiting, if any
    pub fn pending_request(&self) -> Option<Uuid> {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Force a fresh handle and wait for its pairing code
    ///
    /// Resolves on the first of: a QR code, an authentication event, or the
    /// timeout. Auto-reconnect is suspended while the request runs; after a
    /// code is handed out it stays suspended until the session becomes ready.
    pub async fn request_auth(&self) -> Result<AuthOutcome, AuthError> {
        let Some(ticket) = AuthTicket::acquire(&self.pending) else {
            warn!("Authentication request already pending");
            return Ok(AuthOutcome::Busy);
        };

        if self.session.is_ready() {
            info!("Session already authenticated");
            return Ok(AuthOutcome::NotNeeded);
        }

        info!(request = %ticket.token, "Starting QR authentication");
        let mut suspension = ReconnectSuspension::begin(&self.session);

        // Subscribe before initializing so an early code is not missed.
        let mut signals = self.session.subscribe_auth();
        let init = self.session.initialize(true);
        tokio::pin!(init);
        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);
        let mut init_done = false;

        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Ok(AuthSignal::Qr(code)) => {
                        info!(request = %ticket.token, "QR code delivered to requester");
                        suspension.hold_until_ready = true;
                        return Ok(AuthOutcome::Qr(code));
                    }
                    Ok(AuthSignal::Authenticated) => {
                        info!(request = %ticket.token, "Authenticated without a new QR code");
                        return Ok(AuthOutcome::Authenticated);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Authentication signals lagged");
                    }
                    Err(RecvError::Closed) => return Err(AuthError::SessionClosed),
                },
                result = &mut init, if !init_done => {
                    init_done = true;
                    match result {
                        Ok(outcome) => debug!(?outcome, "Handshake initialization finished"),
                        Err(e) => {
                            warn!(request = %ticket.token, error = %e, "Handshake initialization failed");
                            return Err(AuthError::Init(e));
                        }
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        request = %ticket.token,
                        timeout_ms = self.config.timeout.as_millis() as u64,
                        "Authentication request timed out"
                    );
                    return Ok(AuthOutcome::TimedOut);
                }
            }
        }
    }
}
