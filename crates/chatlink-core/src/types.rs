//! Shared value types for the chatlink session manager
//!
//! Identifiers, QR payloads, delivery receipts and inbound messages that flow
//! between the transport, the session client and its collaborators.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Chat Identifier
// ----------------------------------------------------------------------------

/// Address of a conversation on the messaging network (e.g. `5215550001@c.us`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(String);

impl ChatId {
    /// Create a chat identifier from any string-like value
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChatId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ----------------------------------------------------------------------------
// QR Code
// ----------------------------------------------------------------------------

/// Raw pairing code emitted by the transport while it waits for a scan
///
/// The string is the opaque payload the phone app expects to read; rendering
/// helpers live in [`crate::qr`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode(String);

impl QrCode {
    pub fn new<T: Into<String>>(code: T) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for QrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Receipt
// ----------------------------------------------------------------------------

/// Acknowledgement returned by the transport's send primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transport-assigned message identifier
    pub message_id: String,
    /// Conversation the message was delivered to
    pub destination: ChatId,
    /// Time the transport accepted the message
    pub accepted_at: Timestamp,
}

impl Receipt {
    pub fn new<T: Into<String>>(message_id: T, destination: ChatId) -> Self {
        Self {
            message_id: message_id.into(),
            destination,
            accepted_at: Timestamp::now(),
        }
    }
}

// ----------------------------------------------------------------------------
// Incoming Message
// ----------------------------------------------------------------------------

/// Message received from the network through the transport's message event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Sender, also used as the reply destination
    pub from: ChatId,
    /// Text body
    pub body: String,
}

impl IncomingMessage {
    pub fn new<F: Into<ChatId>, B: Into<String>>(from: F, body: B) -> Self {
        Self {
            from: from.into(),
            body: body.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Wall-clock time in milliseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time; falls back to zero if the clock is before 1970
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}
