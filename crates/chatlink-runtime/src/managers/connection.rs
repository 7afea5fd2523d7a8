//! Session state bookkeeping for the chatlink runtime
//!
//! The ConnectionManager holds the current [`SessionState`], the retry budget,
//! the auto-reconnect switch and the audit trail. It runs every event through
//! the pure transition function and applies the bookkeeping effects itself;
//! effects that need the transport or timers are left to the session client.

use std::collections::VecDeque;

use chatlink_core::{
    AuditEntry, SessionConfig, SessionEffect, SessionEvent, SessionState, StateTransition,
    StateTransitionError, TransitionContext,
};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Auto-reconnect Switch
// ----------------------------------------------------------------------------

/// Whether disconnects and faults schedule a reinitialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoReconnect {
    Enabled,
    Disabled,
    /// Turned off by a QR handshake; restored when the session becomes ready
    SuspendedForAuth,
}

impl AutoReconnect {
    pub fn is_enabled(&self) -> bool {
        matches!(self, AutoReconnect::Enabled)
    }
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct ConnectionManager {
    config: SessionConfig,
    state: SessionState,
    attempts_made: u32,
    auto_reconnect: AutoReconnect,
    cooldown_pending: bool,
    audit_trail: VecDeque<AuditEntry>,
    stats: SessionStats,
}

impl ConnectionManager {
    pub fn new(config: SessionConfig) -> Self {
        let auto_reconnect = if config.auto_reconnect {
            AutoReconnect::Enabled
        } else {
            AutoReconnect::Disabled
        };
        Self {
            config,
            state: SessionState::Uninitialized,
            attempts_made: 0,
            auto_reconnect,
            cooldown_pending: false,
            audit_trail: VecDeque::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether the retry budget is spent
    pub fn budget_exhausted(&self) -> bool {
        self.attempts_made >= self.config.max_attempts
    }

    pub fn auto_reconnect(&self) -> AutoReconnect {
        self.auto_reconnect
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = if enabled {
            AutoReconnect::Enabled
        } else {
            AutoReconnect::Disabled
        };
    }

    /// Pause auto-reconnect while a QR handshake is in flight
    pub fn suspend_for_auth(&mut self) {
        if self.auto_reconnect == AutoReconnect::Enabled {
            self.auto_reconnect = AutoReconnect::SuspendedForAuth;
        }
    }

    /// Lift a handshake suspension; an explicit `Disabled` is left alone
    pub fn resume_after_auth(&mut self) {
        if self.auto_reconnect == AutoReconnect::SuspendedForAuth {
            self.auto_reconnect = AutoReconnect::Enabled;
        }
    }

    pub fn cooldown_pending(&self) -> bool {
        self.cooldown_pending
    }

    pub fn context(&self) -> TransitionContext {
        TransitionContext {
            attempts_made: self.attempts_made,
            max_attempts: self.config.max_attempts,
            auto_reconnect: self.auto_reconnect.is_enabled(),
            cooldown_pending: self.cooldown_pending,
            backoff: self.config.backoff,
            exhausted_cooldown: self.config.exhausted_cooldown,
            fault_cooldown: self.config.fault_cooldown,
        }
    }

    /// Process a session event and update state
    pub fn process_event(
        &mut self,
        event: SessionEvent,
    ) -> Result<StateTransition, StateTransitionError> {
        let ctx = self.context();
        self.stats.record_event(&event);
        let clears_cooldown = matches!(event, SessionEvent::CooldownElapsed);

        let transition = match self.state.transition(event, &ctx) {
            Ok(transition) => transition,
            Err(e) => {
                self.stats.rejected_events += 1;
                return Err(e);
            }
        };

        self.state = transition.new_state;
        if clears_cooldown {
            self.cooldown_pending = false;
        }
        for effect in &transition.effects {
            match effect {
                SessionEffect::ResetAttempts => self.attempts_made = 0,
                SessionEffect::IncrementAttempts => {
                    self.attempts_made = self.attempts_made.saturating_add(1)
                }
                SessionEffect::RestoreAutoReconnect => self.resume_after_auth(),
                SessionEffect::ScheduleCooldown { .. } => {
                    self.cooldown_pending = true;
                    self.stats.cooldowns += 1;
                }
                SessionEffect::CancelTimers => self.cooldown_pending = false,
                _ => {}
            }
        }

        self.audit_trail.push_back(transition.audit_entry.clone());
        self.stats.state_transitions += 1;
        while self.audit_trail.len() > self.config.audit_capacity.max(1) {
            self.audit_trail.pop_front();
        }

        Ok(transition)
    }

    /// Get recent audit entries, oldest first
    pub fn recent_audit_entries(&self, limit: usize) -> Vec<AuditEntry> {
        let skip = self.audit_trail.len().saturating_sub(limit);
        self.audit_trail.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Counters for session lifecycle activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Transport handles constructed
    pub handles_created: u64,
    /// Initializations whose startup failed or timed out
    pub startups_failed: u64,
    /// Transport faults observed (reported or found by delivery)
    pub faults: u64,
    /// Disconnect events
    pub disconnects: u64,
    /// Exhaustion cool-downs armed
    pub cooldowns: u64,
    /// Applied state transitions
    pub state_transitions: u64,
    /// Events rejected as invalid for the current state
    pub rejected_events: u64,
}

impl SessionStats {
    fn record_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StartupFailed { .. } => self.startups_failed += 1,
            SessionEvent::TransportFault { .. } | SessionEvent::HandleInvalidated { .. } => {
                self.faults += 1
            }
            SessionEvent::Disconnected { .. } => self.disconnects += 1,
            _ => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
