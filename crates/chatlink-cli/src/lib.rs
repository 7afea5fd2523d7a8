//! Chatlink CLI library
//!
//! Command-line front end for the chatlink session manager. It drives the
//! runtime against the simulated transport from `chatlink-harness`, which is
//! handy for exercising reconnect, QR and delivery behavior by hand.

pub mod bot;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use bot::EchoGenerator;
pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, Scenario};
pub use error::{CliError, Result};
