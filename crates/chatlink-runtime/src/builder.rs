//! Runtime Builder API
//!
//! Wires the session client, the QR handshake, the delivery pipeline and the
//! inbound message dispatcher around a transport factory, and hands back a
//! [`RuntimeHandle`] that owns them.

use std::sync::Arc;

use chatlink_core::{
    AuthError, ChatId, ChatlinkConfig, ChatlinkResult, ProcessResourceGuard, Receipt,
    ResourceGuard, SendError, TransportFactory,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handler::{MessageHandler, ResponseGenerator};
use crate::managers::{AuthHandshake, AuthOutcome, DeliveryPipeline, SessionClient, SessionStatus};

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a chatlink runtime
pub struct RuntimeBuilder {
    config: ChatlinkConfig,
    factory: Arc<dyn TransportFactory>,
    guard: Option<Arc<dyn ResourceGuard>>,
    generator: Option<Arc<dyn ResponseGenerator>>,
}

impl RuntimeBuilder {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config: ChatlinkConfig::default(),
            factory,
            guard: None,
            generator: None,
        }
    }

    pub fn with_config(mut self, config: ChatlinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the process memory guard
    pub fn with_resource_guard(mut self, guard: Arc<dyn ResourceGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Answer inbound messages with this generator
    pub fn with_response_generator(mut self, generator: Arc<dyn ResponseGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Start the first initialization in the background once built
    pub fn initialize_on_start(mut self, enabled: bool) -> Self {
        self.config.initialize_on_start = enabled;
        self
    }

    /// Build and start the runtime
    pub async fn build_and_start(self) -> ChatlinkResult<RuntimeHandle> {
        self.config.validate()?;
        info!("Building chatlink runtime");

        let guard = self
            .guard
            .unwrap_or_else(|| Arc::new(ProcessResourceGuard::new(&self.config.resources)));
        let session = SessionClient::new(
            self.config.session.clone(),
            self.config.resources.clone(),
            self.factory,
            guard,
        );
        let auth = Arc::new(AuthHandshake::new(session.clone(), self.config.auth.clone()));
        let delivery = Arc::new(DeliveryPipeline::new(
            session.clone(),
            self.config.delivery.clone(),
        ));

        let dispatcher = self.generator.and_then(|generator| {
            let mut inbound = session.take_inbound_receiver()?;
            let handler = Arc::new(MessageHandler::new(generator, delivery.clone()));
            Some(tokio::spawn(async move {
                while let Some(message) = inbound.recv().await {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let from = message.from.clone();
                        match handler.handle_incoming(message).await {
                            Ok(Some(receipt)) => {
                                debug!(%from, message_id = %receipt.message_id, "Reply sent")
                            }
                            Ok(None) => {}
                            Err(e) => error!(%from, error = %e, "Failed to reply"),
                        }
                    });
                }
                debug!("Inbound dispatcher stopped");
            }))
        });

        let initializer = self.config.initialize_on_start.then(|| {
            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.initialize(false).await {
                    warn!(error = %e, "Initial session startup failed");
                }
            })
        });

        info!("Chatlink runtime started");

        Ok(RuntimeHandle {
            session,
            auth,
            delivery,
            dispatcher,
            initializer,
            running: true,
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running chatlink runtime
pub struct RuntimeHandle {
    session: Arc<SessionClient>,
    auth: Arc<AuthHandshake>,
    delivery: Arc<DeliveryPipeline>,
    dispatcher: Option<JoinHandle<()>>,
    initializer: Option<JoinHandle<()>>,
    running: bool,
}

impl RuntimeHandle {
    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    pub fn auth(&self) -> &Arc<AuthHandshake> {
        &self.auth
    }

    pub fn delivery(&self) -> &Arc<DeliveryPipeline> {
        &self.delivery
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub async fn request_auth(&self) -> Result<AuthOutcome, AuthError> {
        self.auth.request_auth().await
    }

    pub async fn send(&self, destination: &ChatId, payload: &str) -> Result<Receipt, SendError> {
        self.delivery.send(destination, payload).await
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Shutdown the runtime gracefully
    pub async fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        info!("Shutting down chatlink runtime");

        if let Some(initializer) = self.initializer.take() {
            initializer.abort();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        self.session.shutdown().await;

        self.running = false;
        info!("Chatlink runtime shut down");
    }
}
