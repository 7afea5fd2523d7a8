//! Chatlink CLI entry point

use clap::Parser;
use tracing::{error, info};

use chatlink_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(scenario) = cli.scenario {
        config.simulation.scenario = scenario;
    }

    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    info!("Chatlink CLI exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
