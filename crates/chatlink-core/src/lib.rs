//! Chatlink Core
//!
//! Foundational types for the chatlink session manager: the session state
//! machine, retry and memory-pressure policies, transport traits, error types
//! and configuration. The `chatlink-runtime` crate drives these against a live
//! transport.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backoff;
pub mod config;
pub mod errors;
#[cfg(feature = "qr-render")]
pub mod qr;
pub mod resource;
pub mod state;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backoff::BackoffPolicy;
pub use config::{AuthConfig, ChatlinkConfig, DeliveryConfig, ResourceConfig, SessionConfig};
pub use errors::{
    AuthError, ChatlinkError, ChatlinkResult, ConfigError, FaultKind, InitError, Result,
    SendError, StateTransitionError, TransportError,
};
#[cfg(feature = "qr-render")]
pub use qr::QrRenderError;
pub use resource::{MemorySample, ProcessResourceGuard, ResourceGuard};
pub use state::{
    AuditEntry, SessionEffect, SessionEvent, SessionState, StateTransition, TransitionContext,
};
pub use transport::{
    TransportEvent, TransportEventReceiver, TransportEventSender, TransportFactory,
    TransportHandle,
};
pub use types::{ChatId, IncomingMessage, QrCode, Receipt, Timestamp};
