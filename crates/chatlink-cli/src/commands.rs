//! Command handlers for the chatlink CLI

use std::sync::Arc;
use std::time::Duration;

use chatlink_core::{ChatId, SessionState};
use chatlink_harness::MockTransportFactory;
use chatlink_runtime::{AuthOutcome, AuthSignal, RuntimeBuilder, RuntimeHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bot::EchoGenerator;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Status => Self::handle_status_command(&config).await,
            Commands::Auth { svg } => Self::handle_auth_command(&config, svg).await,
            Commands::Send { to, message } => {
                Self::handle_send_command(&config, to, message).await
            }
            Commands::Run { duration, stdin } => {
                Self::handle_run_command(&config, duration, stdin).await
            }
            Commands::Config => Self::handle_config_command(&config),
        }
    }

    /// Handle the status command
    async fn handle_status_command(config: &AppConfig) -> Result<()> {
        let (mut runtime, _factory) = start_runtime(config, false, false).await?;

        if let Err(e) = runtime.session().initialize(false).await {
            warn!("Initialization failed: {}", e);
        }
        let settle = Duration::from_secs(config.auth.timeout_secs.max(1));
        let mut states = runtime.session().subscribe_state();
        let settled = tokio::time::timeout(
            settle,
            states.wait_for(|state| *state != SessionState::Initializing),
        )
        .await
        .is_ok();
        if !settled {
            debug!("Session still initializing after {:?}", settle);
        }

        println!("{}", serde_json::to_string_pretty(&runtime.status())?);
        runtime.shutdown().await;
        Ok(())
    }

    /// Handle the auth command
    async fn handle_auth_command(config: &AppConfig, svg: bool) -> Result<()> {
        let (mut runtime, _factory) = start_runtime(config, false, false).await?;
        let result = Self::authenticate(&runtime, config, svg).await;
        runtime.shutdown().await;
        result
    }

    async fn authenticate(runtime: &RuntimeHandle, config: &AppConfig, svg: bool) -> Result<()> {
        let timeout = Duration::from_secs(config.auth.timeout_secs);
        match runtime.request_auth().await? {
            AuthOutcome::Qr(code) => {
                if svg {
                    println!("{}", code.to_svg_data_url()?);
                } else {
                    println!("Scan this code with the phone app:");
                    println!("{}", code.render_terminal()?);
                }

                info!("Waiting up to {}s for the code to be scanned", timeout.as_secs());
                let mut states = runtime.session().subscribe_state();
                let scanned = tokio::time::timeout(
                    timeout,
                    states.wait_for(|state| *state == SessionState::Ready),
                )
                .await
                .is_ok();
                if scanned {
                    println!("Authenticated");
                    Ok(())
                } else {
                    Err(CliError::Auth(format!(
                        "code not scanned within {}s",
                        timeout.as_secs()
                    )))
                }
            }
            AuthOutcome::NotNeeded => {
                println!("Session already authenticated");
                Ok(())
            }
            AuthOutcome::Authenticated => {
                println!("Authenticated with stored credentials");
                Ok(())
            }
            AuthOutcome::Busy => Err(CliError::Auth(
                "another authentication request is pending".to_string(),
            )),
            AuthOutcome::TimedOut => Err(CliError::Auth(format!(
                "no pairing code within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Handle the send command
    async fn handle_send_command(config: &AppConfig, to: String, message: String) -> Result<()> {
        let (mut runtime, _factory) = start_runtime(config, false, false).await?;
        let destination = ChatId::new(to);

        let result = runtime.send(&destination, &message).await;
        debug!("Delivery statistics: {:?}", runtime.delivery().statistics());
        runtime.shutdown().await;

        let receipt = result?;
        println!("{}", serde_json::to_string_pretty(&receipt)?);
        Ok(())
    }

    /// Handle the run command
    async fn handle_run_command(
        config: &AppConfig,
        duration: Option<u64>,
        stdin: bool,
    ) -> Result<()> {
        let (mut runtime, factory) = start_runtime(config, true, true).await?;
        let display = tokio::spawn(display_auth_signals(runtime.session().subscribe_auth()));
        let injector = stdin.then(|| tokio::spawn(inject_stdin_messages(factory.clone())));

        match duration {
            Some(secs) => {
                info!("Answering messages for {}s", secs);
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            None => {
                info!("Answering messages... Press Ctrl+C to stop");
                tokio::signal::ctrl_c().await?;
            }
        }

        if let Some(injector) = injector {
            injector.abort();
        }
        display.abort();
        runtime.shutdown().await;

        println!("{}", serde_json::to_string_pretty(&runtime.status())?);
        println!(
            "{}",
            serde_json::to_string_pretty(&runtime.delivery().statistics())?
        );
        Ok(())
    }

    /// Handle the config command
    fn handle_config_command(config: &AppConfig) -> Result<()> {
        print!("{}", config.to_toml()?);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Build the runtime over the configured simulated transport
async fn start_runtime(
    config: &AppConfig,
    answer_messages: bool,
    initialize_on_start: bool,
) -> Result<(RuntimeHandle, MockTransportFactory)> {
    let factory = config.simulation.factory();
    let mut builder = RuntimeBuilder::new(Arc::new(factory.clone()))
        .with_config(config.to_chatlink_config()?)
        .initialize_on_start(initialize_on_start || config.session.initialize_on_start);
    if answer_messages {
        builder = builder.with_response_generator(Arc::new(EchoGenerator::default()));
    }
    let runtime = builder.build_and_start().await?;
    Ok((runtime, factory))
}

async fn display_auth_signals(mut signals: tokio::sync::broadcast::Receiver<AuthSignal>) {
    loop {
        match signals.recv().await {
            Ok(AuthSignal::Qr(code)) => match code.render_terminal() {
                Ok(rendered) => println!("Scan this code with the phone app:\n{rendered}"),
                Err(e) => warn!("Cannot render QR code: {}", e),
            },
            Ok(AuthSignal::Authenticated) => println!("Authenticated"),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

/// Feed `<chat-id> <text>` lines to the current simulated handle
async fn inject_stdin_messages(factory: MockTransportFactory) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some((from, text)) = line.trim().split_once(' ') else {
            warn!("Expected `<chat-id> <text>`, got {:?}", line);
            continue;
        };
        let delivered = factory
            .latest_handle()
            .is_some_and(|handle| handle.deliver_incoming(from, text));
        if !delivered {
            warn!("No live transport handle, message from {} dropped", from);
        }
    }
}
