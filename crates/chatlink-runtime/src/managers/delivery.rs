//! Outbound message delivery for the chatlink runtime
//!
//! `DeliveryPipeline::send` pushes one message through the session client with
//! bounded retries. Transport faults invalidate the handle and force a fresh
//! one; any other error is retried against the same handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chatlink_core::{ChatId, DeliveryConfig, Receipt, SendError, TransportError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::session::SessionClient;

// ----------------------------------------------------------------------------
// Delivery Pipeline
// ----------------------------------------------------------------------------

pub struct DeliveryPipeline {
    session: Arc<SessionClient>,
    config: DeliveryConfig,
    stats: DeliveryCounters,
}

impl DeliveryPipeline {
    pub fn new(session: Arc<SessionClient>, config: DeliveryConfig) -> Self {
        Self {
            session,
            config,
            stats: DeliveryCounters::default(),
        }
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    pub fn statistics(&self) -> DeliveryStatistics {
        self.stats.snapshot()
    }

    /// Deliver `payload` to `destination`, at least once, best effort
    pub async fn send(&self, destination: &ChatId, payload: &str) -> Result<Receipt, SendError> {
        let max_attempts = self.config.max_attempts();
        let mut retry = 0u32;

        loop {
            let attempt = retry + 1;

            if !self.session.is_ready() || self.session.handle().is_none() {
                warn!(
                    %destination,
                    attempt,
                    max_attempts,
                    "Session not ready, initializing before send"
                );
                self.kick_initialize().await;

                if !self.wait_until_ready().await {
                    if retry < self.config.max_retries {
                        retry += 1;
                        let wait = self.config.not_ready_delay(retry);
                        warn!(
                            %destination,
                            retry,
                            wait_ms = wait.as_millis() as u64,
                            "Session still not ready, retrying later"
                        );
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    error!(%destination, attempts = attempt, "Session never became ready");
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(SendError::NotReady { attempts: attempt });
                }
            }

            let result = match self.session.handle() {
                Some(handle) => handle.send_message(destination, payload).await,
                // Torn down between the readiness check and the send.
                None => Err(TransportError::SessionClosed),
            };

            let error = match result {
                Ok(receipt) => {
                    info!(%destination, attempt, message_id = %receipt.message_id, "Message delivered");
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    return Ok(receipt);
                }
                Err(error) => error,
            };

            error!(%destination, attempt, max_attempts, %error, "Send attempt failed");

            let fault = error.is_fault();
            if fault {
                self.stats.faults.fetch_add(1, Ordering::Relaxed);
                self.session.invalidate_handle(error.to_string());
            }

            if retry >= self.config.max_retries {
                error!(%destination, attempts = attempt, "All delivery attempts failed");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return Err(SendError::DeliveryExhausted {
                    destination: destination.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }
            retry += 1;
            self.stats.retries.fetch_add(1, Ordering::Relaxed);

            if fault {
                let wait = self.config.fault_delay(retry);
                warn!(
                    %destination,
                    retry,
                    wait_ms = wait.as_millis() as u64,
                    "Transport fault during send, recreating session"
                );
                tokio::time::sleep(wait).await;
                self.kick_initialize().await;
            } else {
                let wait = self.config.error_delay(retry);
                warn!(
                    %destination,
                    retry,
                    wait_ms = wait.as_millis() as u64,
                    "Retrying send"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }

    async fn kick_initialize(&self) {
        match self.session.initialize(false).await {
            Ok(outcome) => debug!(?outcome, "Initialization requested by delivery"),
            Err(e) => warn!(error = %e, "Initialization requested by delivery failed"),
        }
    }

    /// Poll readiness, re-initializing whenever the handle disappears
    async fn wait_until_ready(&self) -> bool {
        let mut polls = 0;
        while !self.session.is_ready() && polls < self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;
            polls += 1;
            debug!(polls, max_polls = self.config.max_polls, "Waiting for session readiness");
            if self.session.handle().is_none() {
                warn!("Transport handle lost while waiting, reinitializing");
                self.kick_initialize().await;
            }
        }
        self.session.is_ready()
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DeliveryCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    faults: AtomicU64,
}

impl DeliveryCounters {
    fn snapshot(&self) -> DeliveryStatistics {
        DeliveryStatistics {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Delivery statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatistics {
    pub sent: u64,
    pub failed: u64,
    pub retries: u64,
    pub faults: u64,
}
