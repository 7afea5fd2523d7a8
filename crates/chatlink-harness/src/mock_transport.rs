//! Mock Transport for Testing
//!
//! A scripted stand-in for the headless-browser client. Each handle created by
//! [`MockTransportFactory`] pops its startup behavior from a shared script, and
//! every send pops the next scripted result, so tests can reproduce QR flows,
//! startup crashes and protocol faults deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chatlink_core::{
    ChatId, IncomingMessage, Receipt, TransportError, TransportEvent, TransportEventSender,
    TransportFactory, TransportHandle,
};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

// ----------------------------------------------------------------------------
// Mock Transport Configuration
// ----------------------------------------------------------------------------

/// What a handle does when `start()` is called
#[derive(Debug, Clone, PartialEq)]
pub enum StartBehavior {
    /// Stored credentials are valid: emit `authenticated` then `ready`
    Ready,
    /// Emit a pairing code and wait for a scan that never comes
    RequireQr { code: String },
    /// Emit a pairing code, then authenticate after the simulated scan delay
    QrThenReady { code: String, scan_delay: Duration },
    /// Fail the startup with this error
    Fail(TransportError),
    /// Never complete
    Hang,
}

/// What a `send_message()` call returns
#[derive(Debug, Clone, PartialEq)]
pub enum SendBehavior {
    Succeed,
    Fail(TransportError),
    /// Raise a protocol fault with the given probability
    Flaky { fault_rate: f64 },
}

/// Configuration for mock transport behavior
#[derive(Debug, Clone)]
pub struct MockTransportConfig {
    /// Time `start()` takes before emitting events
    pub start_latency: Duration,
    /// Time each send takes
    pub send_latency: Duration,
    /// Time `destroy()` takes
    pub destroy_latency: Duration,
    /// Whether `destroy()` reports an error
    pub destroy_fails: bool,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            start_latency: Duration::from_millis(1),
            send_latency: Duration::from_millis(1),
            destroy_latency: Duration::from_millis(1),
            destroy_fails: false,
        }
    }
}

impl MockTransportConfig {
    /// No artificial delays
    pub fn instant() -> Self {
        Self {
            start_latency: Duration::ZERO,
            send_latency: Duration::ZERO,
            destroy_latency: Duration::ZERO,
            destroy_fails: false,
        }
    }

    /// Latencies resembling a real browser startup, for demos
    pub fn realistic() -> Self {
        Self {
            start_latency: Duration::from_millis(1500),
            send_latency: Duration::from_millis(150),
            destroy_latency: Duration::from_millis(300),
            destroy_fails: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockTransportStats {
    pub creations: AtomicU64,
    pub create_failures: AtomicU64,
    pub starts: AtomicU64,
    pub destroys: AtomicU64,
    pub sends_attempted: AtomicU64,
    pub sends_succeeded: AtomicU64,
}

/// Point-in-time copy of [`MockTransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockTransportSnapshot {
    pub creations: u64,
    pub create_failures: u64,
    pub starts: u64,
    pub destroys: u64,
    pub sends_attempted: u64,
    pub sends_succeeded: u64,
}

impl MockTransportStats {
    pub fn snapshot(&self) -> MockTransportSnapshot {
        MockTransportSnapshot {
            creations: self.creations.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
            destroys: self.destroys.load(Ordering::Relaxed),
            sends_attempted: self.sends_attempted.load(Ordering::Relaxed),
            sends_succeeded: self.sends_succeeded.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Shared Script State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct Script {
    starts: VecDeque<StartBehavior>,
    default_start: StartBehavior,
    sends: VecDeque<SendBehavior>,
    default_send: SendBehavior,
    create_failures: VecDeque<TransportError>,
    delivered: Vec<(ChatId, String)>,
}

#[derive(Debug)]
struct Shared {
    config: MockTransportConfig,
    script: Mutex<Script>,
    stats: MockTransportStats,
}

impl Shared {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Mock Transport Factory
// ----------------------------------------------------------------------------

/// Factory producing scripted mock handles
#[derive(Debug, Clone)]
pub struct MockTransportFactory {
    shared: Arc<Shared>,
    handles: Arc<Mutex<Vec<Arc<MockTransportHandle>>>>,
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new(MockTransportConfig::default())
    }
}

impl MockTransportFactory {
    pub fn new(config: MockTransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                script: Mutex::new(Script {
                    starts: VecDeque::new(),
                    default_start: StartBehavior::Ready,
                    sends: VecDeque::new(),
                    default_send: SendBehavior::Succeed,
                    create_failures: VecDeque::new(),
                    delivered: Vec::new(),
                }),
                stats: MockTransportStats::default(),
            }),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handles always start with valid stored credentials
    pub fn always_ready() -> Self {
        Self::new(MockTransportConfig::instant())
    }

    /// Handles always wait for a QR scan
    pub fn requiring_qr(code: impl Into<String>) -> Self {
        let factory = Self::new(MockTransportConfig::instant());
        factory.set_default_start(StartBehavior::RequireQr { code: code.into() });
        factory
    }

    /// Queue behaviors for the next `start()` calls, one per handle
    pub fn script_starts<I: IntoIterator<Item = StartBehavior>>(&self, behaviors: I) {
        self.shared.script().starts.extend(behaviors);
    }

    pub fn set_default_start(&self, behavior: StartBehavior) {
        self.shared.script().default_start = behavior;
    }

    /// Queue results for the next sends, across all handles
    pub fn script_sends<I: IntoIterator<Item = SendBehavior>>(&self, behaviors: I) {
        self.shared.script().sends.extend(behaviors);
    }

    pub fn set_default_send(&self, behavior: SendBehavior) {
        self.shared.script().default_send = behavior;
    }

    /// Make the next `create()` calls fail
    pub fn script_create_failures<I: IntoIterator<Item = TransportError>>(&self, errors: I) {
        self.shared.script().create_failures.extend(errors);
    }

    pub fn stats(&self) -> MockTransportSnapshot {
        self.shared.stats.snapshot()
    }

    /// Every handle created so far, oldest first
    pub fn handles(&self) -> Vec<Arc<MockTransportHandle>> {
        self.handles_guard().clone()
    }

    pub fn latest_handle(&self) -> Option<Arc<MockTransportHandle>> {
        self.handles_guard().last().cloned()
    }

    fn handles_guard(&self) -> MutexGuard<'_, Vec<Arc<MockTransportHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages accepted by any handle, in order
    pub fn delivered(&self) -> Vec<(ChatId, String)> {
        self.shared.script().delivered.clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        events: TransportEventSender,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let start = {
            let mut script = self.shared.script();
            if let Some(error) = script.create_failures.pop_front() {
                self.shared.stats.create_failures.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }
            match script.starts.pop_front() {
                Some(start) => start,
                None => script.default_start.clone(),
            }
        };
        let id = self.shared.stats.creations.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Arc::new(MockTransportHandle {
            id,
            start,
            events,
            destroyed: AtomicBool::new(false),
            shared: self.shared.clone(),
        });
        self.handles_guard().push(handle.clone());
        debug!(id, "Mock transport handle created");
        Ok(handle)
    }
}

// ----------------------------------------------------------------------------
// Mock Transport Handle
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockTransportHandle {
    id: u64,
    start: StartBehavior,
    events: TransportEventSender,
    destroyed: AtomicBool,
    shared: Arc<Shared>,
}

impl MockTransportHandle {
    /// 1-based creation order
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Push an event as if the browser had raised it; false once the session stopped listening
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Simulate a message arriving from the network
    pub fn deliver_incoming(&self, from: impl Into<ChatId>, body: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(IncomingMessage::new(from, body)))
    }

    fn next_send(&self) -> SendBehavior {
        let mut script = self.shared.script();
        match script.sends.pop_front() {
            Some(send) => send,
            None => script.default_send.clone(),
        }
    }
}

#[async_trait]
impl TransportHandle for MockTransportHandle {
    async fn start(&self) -> Result<(), TransportError> {
        self.shared.stats.starts.fetch_add(1, Ordering::Relaxed);
        sleep(self.shared.config.start_latency).await;

        match &self.start {
            StartBehavior::Ready => {
                self.emit(TransportEvent::Authenticated);
                self.emit(TransportEvent::Ready);
                Ok(())
            }
            StartBehavior::RequireQr { code } => {
                self.emit(TransportEvent::Qr(code.clone()));
                Ok(())
            }
            StartBehavior::QrThenReady { code, scan_delay } => {
                self.emit(TransportEvent::Qr(code.clone()));
                let events = self.events.clone();
                let scan_delay = *scan_delay;
                tokio::spawn(async move {
                    sleep(scan_delay).await;
                    info!("Simulated QR scan completed");
                    let _ = events.send(TransportEvent::Authenticated);
                    let _ = events.send(TransportEvent::Ready);
                });
                Ok(())
            }
            StartBehavior::Fail(error) => Err(error.clone()),
            StartBehavior::Hang => std::future::pending().await,
        }
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.shared.stats.destroys.fetch_add(1, Ordering::Relaxed);
        sleep(self.shared.config.destroy_latency).await;
        self.destroyed.store(true, Ordering::Release);
        if self.shared.config.destroy_fails {
            return Err(TransportError::other("browser process did not exit"));
        }
        Ok(())
    }

    async fn send_message(&self, to: &ChatId, body: &str) -> Result<Receipt, TransportError> {
        let attempt = self.shared.stats.sends_attempted.fetch_add(1, Ordering::Relaxed) + 1;
        sleep(self.shared.config.send_latency).await;

        if self.is_destroyed() {
            return Err(TransportError::SessionClosed);
        }

        let outcome = match self.next_send() {
            SendBehavior::Succeed => Ok(()),
            SendBehavior::Fail(error) => Err(error),
            SendBehavior::Flaky { fault_rate } => {
                if fastrand::f64() < fault_rate {
                    Err(TransportError::from_message(
                        "Protocol error (Runtime.callFunctionOn): Target closed.",
                    ))
                } else {
                    Ok(())
                }
            }
        };
        outcome?;

        self.shared.stats.sends_succeeded.fetch_add(1, Ordering::Relaxed);
        self.shared
            .script()
            .delivered
            .push((to.clone(), body.to_string()));
        Ok(Receipt::new(format!("mock-{}-{attempt}", self.id), to.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_scripted_start_and_sends() {
        let factory = MockTransportFactory::always_ready();
        factory.script_starts([StartBehavior::RequireQr { code: "2@x".into() }]);
        factory.script_sends([SendBehavior::Fail(TransportError::TargetClosed)]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = factory.create(tx).await.unwrap();
        handle.start().await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Qr("2@x".into())));

        let to = ChatId::new("1@c.us");
        assert_eq!(
            handle.send_message(&to, "hi").await,
            Err(TransportError::TargetClosed)
        );
        let receipt = handle.send_message(&to, "hi").await.unwrap();
        assert_eq!(receipt.destination, to);
        assert_eq!(factory.delivered(), vec![(to, "hi".to_string())]);

        let stats = factory.stats();
        assert_eq!(stats.creations, 1);
        assert_eq!(stats.sends_attempted, 2);
        assert_eq!(stats.sends_succeeded, 1);
    }

    #[tokio::test]
    async fn test_default_start_emits_ready() {
        let factory = MockTransportFactory::always_ready();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = factory.create(tx).await.unwrap();
        handle.start().await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Authenticated));
        assert_eq!(rx.recv().await, Some(TransportEvent::Ready));
    }

    #[tokio::test]
    async fn test_destroyed_handle_rejects_sends() {
        let factory = MockTransportFactory::new(MockTransportConfig {
            destroy_fails: true,
            ..MockTransportConfig::instant()
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = factory.create(tx).await.unwrap();
        assert!(handle.destroy().await.is_err());
        assert_eq!(
            handle.send_message(&ChatId::new("1@c.us"), "late").await,
            Err(TransportError::SessionClosed)
        );
        assert!(factory.latest_handle().unwrap().is_destroyed());
    }

    #[tokio::test]
    async fn test_create_failures_are_consumed() {
        let factory = MockTransportFactory::always_ready();
        factory.script_create_failures([TransportError::other("no chromium")]);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(factory.create(tx.clone()).await.is_err());
        assert!(factory.create(tx).await.is_ok());
        assert_eq!(factory.stats().create_failures, 1);
        assert_eq!(factory.handles().len(), 1);
    }
}
