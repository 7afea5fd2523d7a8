//! Chatlink CLI Configuration Management
//!
//! Configuration is read from a TOML file (`--config`, or
//! `<config dir>/chatlink/config.toml` when present) and falls back to the
//! session manager defaults for anything left out. Durations are written as
//! plain integers with their unit in the key name.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chatlink_core::{
    AuthConfig, BackoffPolicy, ChatlinkConfig, DeliveryConfig, ResourceConfig, SessionConfig,
};
use chatlink_harness::{MockTransportConfig, MockTransportFactory, SendBehavior, StartBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the chatlink CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSettings,
    pub resources: ResourceSettings,
    pub auth: AuthSettings,
    pub delivery: DeliverySettings,
    pub simulation: SimulationSettings,
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_max_ms: u64,
    pub startup_timeout_secs: u64,
    pub exhausted_cooldown_secs: u64,
    pub fault_cooldown_secs: u64,
    pub teardown_timeout_secs: u64,
    pub release_grace_ms: u64,
    pub failure_grace_ms: u64,
    pub auto_reconnect: bool,
    pub audit_capacity: usize,
    /// Start the first initialization as soon as the runtime is built
    pub initialize_on_start: bool,
}

/// Memory-pressure throttling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    pub memory_threshold_mb: u64,
    pub throttle_pause_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub timeout_secs: u64,
}

/// Outbound delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub not_ready_base_delay_ms: u64,
    pub fault_base_delay_ms: u64,
    pub error_step_delay_ms: u64,
}

/// Behavior of the simulated transport the CLI drives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub scenario: Scenario,
    /// Pairing code emitted by the QR scenarios
    pub qr_code: String,
    /// Time until the simulated phone scans the code
    pub scan_delay_ms: u64,
    /// Probability of a protocol fault per send in the flaky scenario
    pub fault_rate: f64,
    /// Use browser-like startup and send latencies
    pub realistic_latency: bool,
}

/// Simulated transport scenario
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Stored credentials are valid
    #[default]
    Ready,
    /// A pairing code is shown and never scanned
    Qr,
    /// A pairing code is shown and scanned after a delay
    QrThenReady,
    /// Ready, but sends fault at random
    Flaky,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

const MIB: u64 = 1024 * 1024;

impl Default for SessionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            max_attempts: session.max_attempts,
            backoff_base_ms: session.backoff.base_delay.as_millis() as u64,
            backoff_factor: session.backoff.factor,
            backoff_max_ms: session.backoff.max_delay.as_millis() as u64,
            startup_timeout_secs: session.startup_timeout.as_secs(),
            exhausted_cooldown_secs: session.exhausted_cooldown.as_secs(),
            fault_cooldown_secs: session.fault_cooldown.as_secs(),
            teardown_timeout_secs: session.teardown_timeout.as_secs(),
            release_grace_ms: session.release_grace.as_millis() as u64,
            failure_grace_ms: session.failure_grace.as_millis() as u64,
            auto_reconnect: session.auto_reconnect,
            audit_capacity: session.audit_capacity,
            initialize_on_start: false,
        }
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        let resources = ResourceConfig::default();
        Self {
            memory_threshold_mb: resources.memory_threshold_bytes / MIB,
            throttle_pause_secs: resources.throttle_pause.as_secs(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            timeout_secs: AuthConfig::default().timeout.as_secs(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        let delivery = DeliveryConfig::default();
        Self {
            max_retries: delivery.max_retries,
            poll_interval_ms: delivery.poll_interval.as_millis() as u64,
            max_polls: delivery.max_polls,
            not_ready_base_delay_ms: delivery.not_ready_base_delay.as_millis() as u64,
            fault_base_delay_ms: delivery.fault_base_delay.as_millis() as u64,
            error_step_delay_ms: delivery.error_step_delay.as_millis() as u64,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            scenario: Scenario::Ready,
            qr_code: "2@chatlink-simulated-pairing-code".to_string(),
            scan_delay_ms: 3000,
            fault_rate: 0.2,
            realistic_latency: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Conversion
// ----------------------------------------------------------------------------

impl AppConfig {
    /// `<config dir>/chatlink/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatlink").join("config.toml"))
    }

    /// Load from an explicit path, else the default path if it exists, else defaults
    pub fn load(explicit: Option<&str>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading configuration from: {}", path);
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(path)
            }
            _ => {
                info!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Convert to the session manager configuration, validating it
    pub fn to_chatlink_config(&self) -> Result<ChatlinkConfig> {
        let s = &self.session;
        let d = &self.delivery;
        let config = ChatlinkConfig {
            session: SessionConfig {
                max_attempts: s.max_attempts,
                backoff: BackoffPolicy {
                    base_delay: Duration::from_millis(s.backoff_base_ms),
                    factor: s.backoff_factor,
                    max_delay: Duration::from_millis(s.backoff_max_ms),
                },
                startup_timeout: Duration::from_secs(s.startup_timeout_secs),
                exhausted_cooldown: Duration::from_secs(s.exhausted_cooldown_secs),
                fault_cooldown: Duration::from_secs(s.fault_cooldown_secs),
                teardown_timeout: Duration::from_secs(s.teardown_timeout_secs),
                release_grace: Duration::from_millis(s.release_grace_ms),
                failure_grace: Duration::from_millis(s.failure_grace_ms),
                auto_reconnect: s.auto_reconnect,
                audit_capacity: s.audit_capacity,
            },
            resources: ResourceConfig {
                memory_threshold_bytes: self.resources.memory_threshold_mb.saturating_mul(MIB),
                throttle_pause: Duration::from_secs(self.resources.throttle_pause_secs),
            },
            auth: AuthConfig {
                timeout: Duration::from_secs(self.auth.timeout_secs),
            },
            delivery: DeliveryConfig {
                max_retries: d.max_retries,
                poll_interval: Duration::from_millis(d.poll_interval_ms),
                max_polls: d.max_polls,
                not_ready_base_delay: Duration::from_millis(d.not_ready_base_delay_ms),
                fault_base_delay: Duration::from_millis(d.fault_base_delay_ms),
                error_step_delay: Duration::from_millis(d.error_step_delay_ms),
            },
            initialize_on_start: s.initialize_on_start,
        };
        config
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(config)
    }
}

impl SimulationSettings {
    /// Build the mock transport factory for this scenario
    pub fn factory(&self) -> MockTransportFactory {
        let latency = if self.realistic_latency {
            MockTransportConfig::realistic()
        } else {
            MockTransportConfig::default()
        };
        let factory = MockTransportFactory::new(latency);
        match self.scenario {
            Scenario::Ready => {}
            Scenario::Qr => factory.set_default_start(StartBehavior::RequireQr {
                code: self.qr_code.clone(),
            }),
            Scenario::QrThenReady => factory.set_default_start(StartBehavior::QrThenReady {
                code: self.qr_code.clone(),
                scan_delay: Duration::from_millis(self.scan_delay_ms),
            }),
            Scenario::Flaky => factory.set_default_send(SendBehavior::Flaky {
                fault_rate: self.fault_rate.clamp(0.0, 1.0),
            }),
        }
        factory
    }
}
