//! Session State Machine
//!
//! Pure transition function for the transport session lifecycle. The session
//! client feeds every observed event through [`SessionState::transition`] and
//! then applies the returned effects; nothing in this module touches the
//! transport, timers or locks.

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::errors::{StateTransitionError, TransportError};
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of the single transport session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport handle exists
    #[default]
    Uninitialized,
    /// Handle under construction
    Initializing,
    /// Handle exists and waits for a QR scan
    AwaitingAuth,
    /// Transport usable for delivery
    Ready,
    /// Handle invalidated by a disconnect or a fault
    Disconnected,
    /// Attempt ceiling reached; waiting for cool-down or manual reset
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Initializing => "Initializing",
            SessionState::AwaitingAuth => "AwaitingAuth",
            SessionState::Ready => "Ready",
            SessionState::Disconnected => "Disconnected",
            SessionState::Failed => "Failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// States in which a live transport handle may be attached
    pub fn may_hold_handle(&self) -> bool {
        matches!(
            self,
            SessionState::Initializing | SessionState::AwaitingAuth | SessionState::Ready
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// `initialize()` passed its guards and is about to build a handle
    InitializeRequested { force: bool },
    /// `initialize()` found the retry budget spent
    AttemptsExhausted,
    /// Transport `start()` completed
    StartupSucceeded,
    /// Transport `start()` failed or timed out
    StartupFailed { reason: String },
    /// Transport produced a pairing code
    QrReceived { code: String },
    /// Transport is ready for delivery
    Ready,
    /// Transport accepted the pairing
    Authenticated,
    /// Transport rejected stored credentials
    AuthFailure { reason: String },
    /// Transport reported a disconnect
    Disconnected { reason: String },
    /// Transport reported a fault that invalidates the handle
    TransportFault { error: TransportError },
    /// A collaborator observed a fault while using the handle
    HandleInvalidated { reason: String },
    /// Exhaustion cool-down timer fired
    CooldownElapsed,
    /// Operator reset
    ManualReset,
}

impl SessionEvent {
    /// Stable event name for audit and logs (never includes payloads)
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::InitializeRequested { force: true } => "InitializeRequested(force)",
            SessionEvent::InitializeRequested { force: false } => "InitializeRequested",
            SessionEvent::AttemptsExhausted => "AttemptsExhausted",
            SessionEvent::StartupSucceeded => "StartupSucceeded",
            SessionEvent::StartupFailed { .. } => "StartupFailed",
            SessionEvent::QrReceived { .. } => "QrReceived",
            SessionEvent::Ready => "Ready",
            SessionEvent::Authenticated => "Authenticated",
            SessionEvent::AuthFailure { .. } => "AuthFailure",
            SessionEvent::Disconnected { .. } => "Disconnected",
            SessionEvent::TransportFault { .. } => "TransportFault",
            SessionEvent::HandleInvalidated { .. } => "HandleInvalidated",
            SessionEvent::CooldownElapsed => "CooldownElapsed",
            SessionEvent::ManualReset => "ManualReset",
        }
    }
}

// ----------------------------------------------------------------------------
// Effects
// ----------------------------------------------------------------------------

/// Side effects the session client must carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Detach and destroy the current handle, if any
    TeardownHandle,
    /// Clear the retry budget
    ResetAttempts,
    /// Count one failed initialization
    IncrementAttempts,
    /// Run `initialize()` after the delay
    ScheduleReinit { delay: Duration },
    /// Arm the exhaustion cool-down timer
    ScheduleCooldown { delay: Duration },
    /// Cancel pending reinit and cool-down timers
    CancelTimers,
    /// Hand a pairing code to waiting handshakes and the display channel
    ForwardQr { code: String },
    /// Tell waiting handshakes the pairing succeeded
    NotifyAuthenticated,
    /// Re-enable auto-reconnect suspended by a handshake
    RestoreAutoReconnect,
}

// ----------------------------------------------------------------------------
// Transition Context
// ----------------------------------------------------------------------------

/// Snapshot of the client-owned values a transition depends on
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub auto_reconnect: bool,
    pub cooldown_pending: bool,
    pub backoff: BackoffPolicy,
    pub exhausted_cooldown: Duration,
    pub fault_cooldown: Duration,
}

impl TransitionContext {
    fn cooldown_effect(&self) -> Option<SessionEffect> {
        (!self.cooldown_pending).then_some(SessionEffect::ScheduleCooldown {
            delay: self.exhausted_cooldown,
        })
    }
}

// ----------------------------------------------------------------------------
// Transition Results
// ----------------------------------------------------------------------------

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: SessionState,
    pub effects: Vec<SessionEffect>,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub from_state: SessionState,
    pub to_state: SessionState,
    pub event: String,
    pub effects_count: usize,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl SessionState {
    /// Process an event and compute the next state plus its effects
    pub fn transition(
        self,
        event: SessionEvent,
        ctx: &TransitionContext,
    ) -> Result<StateTransition, StateTransitionError> {
        use SessionState::*;

        let event_name = event.name();

        let (new_state, effects) = match (self, event) {
            (Failed, SessionEvent::InitializeRequested { .. }) => {
                return Err(invalid(self, event_name, "retry budget spent, wait for cool-down"));
            }
            (_, SessionEvent::InitializeRequested { .. }) => (Initializing, Vec::new()),

            (_, SessionEvent::AttemptsExhausted) => {
                (Failed, ctx.cooldown_effect().into_iter().collect::<Vec<_>>())
            }

            (Initializing | AwaitingAuth | Ready, SessionEvent::StartupSucceeded) => {
                (self, vec![SessionEffect::ResetAttempts])
            }

            (Initializing | AwaitingAuth | Ready | Disconnected, SessionEvent::StartupFailed { .. }) => {
                let attempts_after = ctx.attempts_made.saturating_add(1);
                let mut effects = vec![
                    SessionEffect::IncrementAttempts,
                    SessionEffect::TeardownHandle,
                ];
                if attempts_after >= ctx.max_attempts {
                    effects.extend(ctx.cooldown_effect());
                    (Failed, effects)
                } else {
                    if ctx.auto_reconnect {
                        effects.push(SessionEffect::ScheduleReinit {
                            delay: ctx.backoff.delay(attempts_after),
                        });
                    }
                    (Disconnected, effects)
                }
            }

            (Uninitialized | Initializing | AwaitingAuth, SessionEvent::QrReceived { code }) => {
                (AwaitingAuth, vec![SessionEffect::ForwardQr { code }])
            }

            (Initializing | AwaitingAuth | Ready, SessionEvent::Ready) => (
                Ready,
                vec![
                    SessionEffect::ResetAttempts,
                    SessionEffect::RestoreAutoReconnect,
                ],
            ),

            (state, SessionEvent::Authenticated) => {
                (state, vec![SessionEffect::NotifyAuthenticated])
            }

            (state, SessionEvent::AuthFailure { .. }) => (state, Vec::new()),

            (Initializing | AwaitingAuth | Ready, SessionEvent::Disconnected { .. }) => {
                let mut effects = vec![SessionEffect::TeardownHandle];
                if ctx.auto_reconnect && ctx.attempts_made < ctx.max_attempts {
                    effects.push(SessionEffect::ScheduleReinit {
                        delay: ctx.backoff.delay(ctx.attempts_made),
                    });
                }
                (Disconnected, effects)
            }

            (
                Initializing | AwaitingAuth | Ready | Disconnected,
                SessionEvent::TransportFault { .. },
            ) => {
                // A handle that never reached Ready is always rebuilt.
                let mut effects = vec![SessionEffect::TeardownHandle];
                if self != Ready || ctx.auto_reconnect {
                    effects.push(SessionEffect::ScheduleReinit {
                        delay: ctx.fault_cooldown,
                    });
                }
                (Disconnected, effects)
            }

            (
                Initializing | AwaitingAuth | Ready | Disconnected,
                SessionEvent::HandleInvalidated { .. },
            ) => (Disconnected, vec![SessionEffect::TeardownHandle]),

            (Failed, SessionEvent::CooldownElapsed) => (
                Uninitialized,
                vec![
                    SessionEffect::ResetAttempts,
                    SessionEffect::ScheduleReinit {
                        delay: Duration::ZERO,
                    },
                ],
            ),

            (_, SessionEvent::ManualReset) => (
                Uninitialized,
                vec![
                    SessionEffect::CancelTimers,
                    SessionEffect::TeardownHandle,
                    SessionEffect::ResetAttempts,
                ],
            ),

            (state, event) => {
                return Err(invalid(
                    state,
                    event.name(),
                    "event not valid in this state",
                ));
            }
        };

        let audit_entry = AuditEntry {
            timestamp: Timestamp::now(),
            from_state: self,
            to_state: new_state,
            event: event_name.to_string(),
            effects_count: effects.len(),
        };

        Ok(StateTransition {
            new_state,
            effects,
            audit_entry,
        })
    }
}

fn invalid(from: SessionState, event: &str, reason: &str) -> StateTransitionError {
    StateTransitionError::InvalidTransition {
        from_state: from.name().to_string(),
        event: event.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(attempts_made: u32, auto_reconnect: bool) -> TransitionContext {
        TransitionContext {
            attempts_made,
            max_attempts: 3,
            auto_reconnect,
            cooldown_pending: false,
            backoff: BackoffPolicy::default(),
            exhausted_cooldown: Duration::from_secs(300),
            fault_cooldown: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_qr_then_ready() {
        let c = ctx(1, true);
        let t = SessionState::Uninitialized
            .transition(SessionEvent::InitializeRequested { force: false }, &c)
            .unwrap();
        assert_eq!(t.new_state, SessionState::Initializing);

        let t = t
            .new_state
            .transition(SessionEvent::QrReceived { code: "2@abc".into() }, &c)
            .unwrap();
        assert_eq!(t.new_state, SessionState::AwaitingAuth);
        assert_eq!(
            t.effects,
            vec![SessionEffect::ForwardQr {
                code: "2@abc".into()
            }]
        );

        let t = t.new_state.transition(SessionEvent::Ready, &c).unwrap();
        assert_eq!(t.new_state, SessionState::Ready);
        assert!(t.effects.contains(&SessionEffect::ResetAttempts));
        assert_eq!(t.audit_entry.from_state, SessionState::AwaitingAuth);
        assert_eq!(t.audit_entry.effects_count, 2);
    }

    #[test]
    fn test_disconnect_schedules_backoff_only_with_auto_reconnect() {
        let t = SessionState::Ready
            .transition(
                SessionEvent::Disconnected {
                    reason: "NAVIGATION".into(),
                },
                &ctx(0, true),
            )
            .unwrap();
        assert_eq!(t.new_state, SessionState::Disconnected);
        assert_eq!(
            t.effects,
            vec![
                SessionEffect::TeardownHandle,
                SessionEffect::ScheduleReinit {
                    delay: Duration::from_secs(5)
                }
            ]
        );

        let t = SessionState::Ready
            .transition(
                SessionEvent::Disconnected {
                    reason: "LOGOUT".into(),
                },
                &ctx(0, false),
            )
            .unwrap();
        assert_eq!(t.effects, vec![SessionEffect::TeardownHandle]);
    }

    #[test]
    fn test_fault_uses_flat_cooldown() {
        let t = SessionState::Ready
            .transition(
                SessionEvent::TransportFault {
                    error: TransportError::TargetClosed,
                },
                &ctx(2, true),
            )
            .unwrap();
        assert_eq!(t.new_state, SessionState::Disconnected);
        assert!(t.effects.contains(&SessionEffect::ScheduleReinit {
            delay: Duration::from_secs(30)
        }));
    }

    #[test]
    fn test_fault_before_ready_recovers_without_auto_reconnect() {
        let fault = || SessionEvent::TransportFault {
            error: TransportError::TargetClosed,
        };
        for state in [SessionState::Initializing, SessionState::AwaitingAuth] {
            let t = state.transition(fault(), &ctx(0, false)).unwrap();
            assert_eq!(
                t.effects,
                vec![
                    SessionEffect::TeardownHandle,
                    SessionEffect::ScheduleReinit {
                        delay: Duration::from_secs(30)
                    }
                ]
            );
        }

        let t = SessionState::Ready.transition(fault(), &ctx(0, false)).unwrap();
        assert_eq!(t.effects, vec![SessionEffect::TeardownHandle]);
    }

    #[test]
    fn test_startup_failure_at_ceiling_fails() {
        let t = SessionState::Initializing
            .transition(
                SessionEvent::StartupFailed {
                    reason: "timeout".into(),
                },
                &ctx(2, true),
            )
            .unwrap();
        assert_eq!(t.new_state, SessionState::Failed);
        assert!(t.effects.contains(&SessionEffect::IncrementAttempts));
        assert!(t.effects.contains(&SessionEffect::ScheduleCooldown {
            delay: Duration::from_secs(300)
        }));

        let t = SessionState::Initializing
            .transition(
                SessionEvent::StartupFailed {
                    reason: "timeout".into(),
                },
                &ctx(0, false),
            )
            .unwrap();
        assert_eq!(t.new_state, SessionState::Disconnected);
        assert!(!t
            .effects
            .iter()
            .any(|e| matches!(e, SessionEffect::ScheduleReinit { .. })));
    }

    #[test]
    fn test_pending_cooldown_is_not_rearmed() {
        let mut c = ctx(3, true);
        c.cooldown_pending = true;
        let t = SessionState::Failed
            .transition(SessionEvent::AttemptsExhausted, &c)
            .unwrap();
        assert_eq!(t.new_state, SessionState::Failed);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_failed_rejects_initialize_until_cooldown() {
        let c = ctx(3, true);
        assert!(SessionState::Failed
            .transition(SessionEvent::InitializeRequested { force: true }, &c)
            .is_err());

        let t = SessionState::Failed
            .transition(SessionEvent::CooldownElapsed, &c)
            .unwrap();
        assert_eq!(t.new_state, SessionState::Uninitialized);
        assert_eq!(t.effects[0], SessionEffect::ResetAttempts);
    }

    #[test]
    fn test_stale_events_are_rejected() {
        let c = ctx(0, true);
        assert!(SessionState::Ready
            .transition(SessionEvent::QrReceived { code: "x".into() }, &c)
            .is_err());
        assert!(SessionState::Uninitialized
            .transition(SessionEvent::Ready, &c)
            .is_err());
        let err = SessionState::Failed
            .transition(
                SessionEvent::Disconnected {
                    reason: "late".into(),
                },
                &c,
            )
            .unwrap_err();
        assert!(err.to_string().contains("Failed"));
    }

    #[test]
    fn test_manual_reset_from_any_state() {
        let c = ctx(3, false);
        for state in [
            SessionState::Failed,
            SessionState::Ready,
            SessionState::Disconnected,
        ] {
            let t = state.transition(SessionEvent::ManualReset, &c).unwrap();
            assert_eq!(t.new_state, SessionState::Uninitialized);
            assert!(t.effects.contains(&SessionEffect::CancelTimers));
        }
    }
}
