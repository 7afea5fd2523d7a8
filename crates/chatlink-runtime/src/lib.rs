//! Chatlink Runtime Engine
//!
//! This crate drives the `chatlink-core` state machine against a live
//! transport:
//! - `SessionClient`: owns the transport handle and applies state transitions
//! - `AuthHandshake`: single-flight QR request with timeout
//! - `DeliveryPipeline`: bounded-retry outbound delivery
//! - `MessageHandler`: replies to inbound messages
//! - `RuntimeBuilder` / `RuntimeHandle`: wiring and shutdown

pub mod builder;
pub mod handler;
pub mod managers;

pub use builder::{RuntimeBuilder, RuntimeHandle};
pub use handler::{MessageHandler, ResponseGenerator, DEFAULT_APOLOGY};
pub use managers::*;

// Re-export core types for convenience
pub use chatlink_core::{
    AuthError, ChatId, ChatlinkConfig, ChatlinkError, ChatlinkResult, IncomingMessage, InitError,
    QrCode, Receipt, SendError, SessionState, TransportError,
};
