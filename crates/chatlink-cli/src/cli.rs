//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

use crate::config::Scenario;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override the simulated transport scenario
    #[arg(long, value_enum)]
    pub scenario: Option<Scenario>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the session and print its status
    Status,
    /// Request a pairing code and render it
    Auth {
        /// Print an SVG data URL instead of a terminal rendering
        #[arg(long)]
        svg: bool,
    },
    /// Send a single message and exit
    Send {
        /// Destination chat address (e.g. 5215550001@c.us)
        #[arg(short, long)]
        to: String,
        /// Message content
        message: String,
    },
    /// Answer inbound messages until interrupted
    Run {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Read `<chat-id> <text>` lines from stdin as simulated inbound messages
        #[arg(long)]
        stdin: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}
