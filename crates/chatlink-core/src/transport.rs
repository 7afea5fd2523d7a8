//! Transport abstraction for the browser-backed messaging client
//!
//! A [`TransportFactory`] builds one [`TransportHandle`] per initialization.
//! Handles report lifecycle changes and inbound messages through the event
//! sender supplied at construction; the session client owns the receiving end.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::types::{ChatId, IncomingMessage, Receipt};

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Events emitted by a transport handle
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Pairing code available for scanning
    Qr(String),
    /// Client is connected and usable
    Ready,
    /// Pairing accepted
    Authenticated,
    /// Stored credentials rejected
    AuthFailure(String),
    /// Client lost its connection
    Disconnected(String),
    /// Message received from the network
    Message(IncomingMessage),
    /// Browser-level failure (closed page, protocol desync, network error)
    Fault(TransportError),
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Qr(_) => "qr",
            TransportEvent::Ready => "ready",
            TransportEvent::Authenticated => "authenticated",
            TransportEvent::AuthFailure(_) => "auth_failure",
            TransportEvent::Disconnected(_) => "disconnected",
            TransportEvent::Message(_) => "message",
            TransportEvent::Fault(_) => "fault",
        }
    }
}

/// Sending half handed to every new transport handle
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half owned by the session client
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// One browser-backed client instance
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Launch the browser and load the messaging client
    async fn start(&self) -> Result<(), TransportError>;

    /// Close the browser and release its profile directory
    async fn destroy(&self) -> Result<(), TransportError>;

    /// Send a text message
    async fn send_message(&self, to: &ChatId, body: &str) -> Result<Receipt, TransportError>;
}

/// Builds transport handles wired to an event sender
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        events: TransportEventSender,
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}
