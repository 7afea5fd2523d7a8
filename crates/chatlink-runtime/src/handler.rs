//! Inbound message handling
//!
//! Replies to each inbound message with whatever the response generator
//! produces, sent back through the delivery pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chatlink_core::{ChatId, IncomingMessage, Receipt, SendError};
use tracing::{debug, info, warn};

use crate::managers::DeliveryPipeline;

/// Reply sent when the generator fails
pub const DEFAULT_APOLOGY: &str =
    "Lo siento, ha ocurrido un error al procesar tu mensaje. Por favor, inténtalo de nuevo más tarde.";

/// Produces a reply for a user's message
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// `user_id` is the sender's chat address and keys any conversation history
    async fn generate(&self, user_id: &ChatId, text: &str) -> anyhow::Result<String>;
}

pub struct MessageHandler {
    generator: Arc<dyn ResponseGenerator>,
    delivery: Arc<DeliveryPipeline>,
    apology: String,
}

impl MessageHandler {
    pub fn new(generator: Arc<dyn ResponseGenerator>, delivery: Arc<DeliveryPipeline>) -> Self {
        Self {
            generator,
            delivery,
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }

    pub fn with_apology(mut self, apology: impl Into<String>) -> Self {
        self.apology = apology.into();
        self
    }

    /// Generate a reply and deliver it; `Ok(None)` when there was nothing to send
    pub async fn handle_incoming(
        &self,
        message: IncomingMessage,
    ) -> Result<Option<Receipt>, SendError> {
        info!(from = %message.from, "Processing inbound message");

        let reply = match self.generator.generate(&message.from, &message.body).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(from = %message.from, error = %e, "Response generation failed, sending apology");
                self.apology.clone()
            }
        };

        if reply.trim().is_empty() {
            debug!(from = %message.from, "Empty reply, nothing to send");
            return Ok(None);
        }

        self.delivery.send(&message.from, &reply).await.map(Some)
    }
}
