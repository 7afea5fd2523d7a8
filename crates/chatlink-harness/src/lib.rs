//! Chatlink Harness - Test Doubles for Session Management
//!
//! Stand-ins for the pieces of a chatlink deployment that touch the outside
//! world, so the runtime can be exercised without a browser:
//!
//! - **MockTransportFactory**: scripted handles that emit QR codes, become
//!   ready, crash on startup or fault on send
//! - **FixedResourceGuard**: a memory guard whose readings the test controls
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chatlink_harness::{FixedResourceGuard, MockTransportFactory, StartBehavior};
//!
//! let factory = MockTransportFactory::always_ready();
//! factory.script_starts([StartBehavior::RequireQr { code: "2@abc".into() }]);
//! let guard = Arc::new(FixedResourceGuard::relaxed());
//! ```

pub mod mock_transport;
pub mod resource;

pub use mock_transport::{
    MockTransportConfig, MockTransportFactory, MockTransportHandle, MockTransportSnapshot,
    MockTransportStats, SendBehavior, StartBehavior,
};
pub use resource::FixedResourceGuard;
