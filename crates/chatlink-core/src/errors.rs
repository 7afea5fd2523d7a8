//! Error types for the chatlink session manager
//!
//! Transport failures are classified here so the session client and the
//! delivery pipeline can decide between tearing the handle down and a plain
//! retry. Higher-level errors always keep the original transport error as their
//! `source`.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Class of failure that means the transport handle itself is unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Browser protocol desynchronized
    Protocol,
    /// Automation target (page) closed underneath the client
    TargetClosed,
    /// Browser session closed
    SessionClosed,
    /// Underlying connection closed
    ConnectionClosed,
    /// Network-level failure while the page was loading
    Network,
}

/// Errors reported by a transport handle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },
    #[error("Target closed")]
    TargetClosed,
    #[error("Session closed")]
    SessionClosed,
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },
    #[error("Network failure: {reason}")]
    Network { reason: String },
    #[error("Transport startup failed: {reason}")]
    StartupFailed { reason: String },
    #[error("Send rejected: {reason}")]
    SendRejected { reason: String },
    #[error("{message}")]
    Other { message: String },
}

impl TransportError {
    /// Classify a free-form error message coming from a browser bridge
    ///
    /// Automation libraries only report these failures as strings, so the
    /// match is on the well-known message prefixes.
    pub fn from_message<T: Into<String>>(message: T) -> Self {
        let message = message.into();
        if message.contains("Protocol error") {
            TransportError::Protocol { reason: message }
        } else if message.contains("Target closed") {
            TransportError::TargetClosed
        } else if message.contains("Session closed") {
            TransportError::SessionClosed
        } else if message.contains("Connection closed") {
            TransportError::ConnectionClosed { reason: message }
        } else if message.contains("net::") {
            TransportError::Network { reason: message }
        } else {
            TransportError::Other { message }
        }
    }

    /// Fault class, if this error invalidates the handle
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            TransportError::Protocol { .. } => Some(FaultKind::Protocol),
            TransportError::TargetClosed => Some(FaultKind::TargetClosed),
            TransportError::SessionClosed => Some(FaultKind::SessionClosed),
            TransportError::ConnectionClosed { .. } => Some(FaultKind::ConnectionClosed),
            TransportError::Network { .. } => Some(FaultKind::Network),
            TransportError::StartupFailed { .. }
            | TransportError::SendRejected { .. }
            | TransportError::Other { .. } => None,
        }
    }

    /// Whether the handle must be torn down after this error
    pub fn is_fault(&self) -> bool {
        self.fault_kind().is_some()
    }

    /// Create a generic transport error with a message
    pub fn other<T: Into<String>>(message: T) -> Self {
        TransportError::Other {
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Initialization Errors
// ----------------------------------------------------------------------------

/// Errors returned by `SessionClient::initialize`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("Initialization attempts exhausted ({attempts}/{max_attempts}), waiting for cool-down")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
    #[error("Transport startup timed out after {duration_ms}ms")]
    StartupTimeout { duration_ms: u64 },
    #[error("Transport startup failed: {source}")]
    Startup { source: TransportError },
    #[error("Transport handle could not be created: {source}")]
    Create { source: TransportError },
    #[error("Session client has been shut down")]
    Closed,
}

// ----------------------------------------------------------------------------
// Authentication Errors
// ----------------------------------------------------------------------------

/// Errors returned by the QR handshake
///
/// `Busy` and `TimedOut` are not errors; they are reported through
/// `AuthOutcome` so callers can tell them apart from real failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Session initialization failed during authentication: {0}")]
    Init(#[from] InitError),
    #[error("Session client shut down while waiting for authentication")]
    SessionClosed,
}

// ----------------------------------------------------------------------------
// Delivery Errors
// ----------------------------------------------------------------------------

/// Errors returned by `DeliveryPipeline::send`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Session not ready after {attempts} attempts")]
    NotReady { attempts: u32 },
    #[error("Delivery to {destination} failed after {attempts} attempts: {source}")]
    DeliveryExhausted {
        destination: String,
        attempts: u32,
        source: TransportError,
    },
}

impl SendError {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            SendError::NotReady { attempts } => *attempts,
            SendError::DeliveryExhausted { attempts, .. } => *attempts,
        }
    }
}

// ----------------------------------------------------------------------------
// State Machine Errors
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from_state} on event {event}: {reason}")]
    InvalidTransition {
        from_state: String,
        event: String,
        reason: String,
    },
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the chatlink crates
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatlinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Initialization error: {0}")]
    Init(#[from] InitError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Delivery error: {0}")]
    Send(#[from] SendError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = core::result::Result<T, ChatlinkError>;
pub type ChatlinkResult<T> = Result<T>;
