//! Stateful managers for the chatlink runtime
//!
//! The session client owns the transport handle; the handshake and the
//! delivery pipeline borrow it through an `Arc`.

pub mod auth;
pub mod connection;
pub mod delivery;
pub mod session;

pub use auth::{AuthHandshake, AuthOutcome};
pub use connection::{AutoReconnect, ConnectionManager, SessionStats};
pub use delivery::{DeliveryPipeline, DeliveryStatistics};
pub use session::{AuthSignal, InitOutcome, SessionClient, SessionStatus, TeardownOutcome};
