//! Centralized Configuration Management
//!
//! Every timer, ceiling and threshold used by the session client, the QR
//! handshake and the delivery pipeline lives here, with production defaults and
//! a `testing()` preset that shrinks the waits to milliseconds.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Lifecycle limits for the transport handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Failed initializations tolerated before entering the cool-down
    pub max_attempts: u32,
    /// Delay policy between initializations
    pub backoff: BackoffPolicy,
    /// Upper bound for the transport's own startup sequence
    pub startup_timeout: Duration,
    /// Wait after the attempt ceiling before the budget resets
    pub exhausted_cooldown: Duration,
    /// Flat wait before recovering from a transport fault
    pub fault_cooldown: Duration,
    /// Bounded wait for a graceful `destroy()`
    pub teardown_timeout: Duration,
    /// Pause after a clean teardown so the browser releases its profile
    pub release_grace: Duration,
    /// Longer pause after a failed teardown
    pub failure_grace: Duration,
    /// Reinitialize automatically after disconnects and faults
    pub auto_reconnect: bool,
    /// Number of audit entries retained
    pub audit_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff: BackoffPolicy::default(),
            startup_timeout: Duration::from_secs(300),
            exhausted_cooldown: Duration::from_secs(300),
            fault_cooldown: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(10),
            release_grace: Duration::from_secs(10),
            failure_grace: Duration::from_secs(15),
            auto_reconnect: true,
            audit_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Create configuration optimized for testing (fast timers)
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::testing(),
            startup_timeout: Duration::from_millis(500),
            exhausted_cooldown: Duration::from_secs(5),
            fault_cooldown: Duration::from_millis(50),
            teardown_timeout: Duration::from_millis(50),
            release_grace: Duration::from_millis(5),
            failure_grace: Duration::from_millis(10),
            auto_reconnect: false,
            audit_capacity: 64,
        }
    }
}

// ----------------------------------------------------------------------------
// Resource Configuration
// ----------------------------------------------------------------------------

/// Memory-pressure throttling applied before each initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Usage above which initialization pauses first
    pub memory_threshold_bytes: u64,
    /// Pause applied when throttling
    pub throttle_pause: Duration,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_threshold_bytes: 256 * 1024 * 1024,
            throttle_pause: Duration::from_secs(15),
        }
    }
}

impl ResourceConfig {
    pub fn testing() -> Self {
        Self {
            memory_threshold_bytes: 256 * 1024 * 1024,
            throttle_pause: Duration::from_millis(20),
        }
    }
}

// ----------------------------------------------------------------------------
// Authentication Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How long a QR request waits for a code or an authentication event
    pub timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

impl AuthConfig {
    pub fn testing() -> Self {
        Self {
            timeout: Duration::from_millis(200),
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Configuration
// ----------------------------------------------------------------------------

/// Configuration for outbound delivery and retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Interval between readiness polls
    pub poll_interval: Duration,
    /// Readiness polls per attempt
    pub max_polls: u32,
    /// Base of `base * 2^retry` after the session failed to become ready
    pub not_ready_base_delay: Duration,
    /// Base of `base * 2^retry` after a transport fault
    pub fault_base_delay: Duration,
    /// Step of `step * retry` after any other send error
    pub error_step_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            poll_interval: Duration::from_secs(2),
            max_polls: 15,
            not_ready_base_delay: Duration::from_secs(5),
            fault_base_delay: Duration::from_secs(5),
            error_step_delay: Duration::from_secs(3),
        }
    }
}

impl DeliveryConfig {
    /// Create configuration optimized for testing (fast retries)
    pub fn testing() -> Self {
        Self {
            max_retries: 3,
            poll_interval: Duration::from_millis(5),
            max_polls: 4,
            not_ready_base_delay: Duration::from_millis(5),
            fault_base_delay: Duration::from_millis(5),
            error_step_delay: Duration::from_millis(3),
        }
    }

    /// Total attempts a single send may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait after the session failed to become ready
    pub fn not_ready_delay(&self, retry: u32) -> Duration {
        exponential(self.not_ready_base_delay, retry)
    }

    /// Wait after a transport fault
    pub fn fault_delay(&self, retry: u32) -> Duration {
        exponential(self.fault_base_delay, retry)
    }

    /// Wait after a non-fault send error
    pub fn error_delay(&self, retry: u32) -> Duration {
        self.error_step_delay.saturating_mul(retry)
    }
}

fn exponential(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for one chatlink session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatlinkConfig {
    pub session: SessionConfig,
    pub resources: ResourceConfig,
    pub auth: AuthConfig,
    pub delivery: DeliveryConfig,
    /// Start the first initialization when the runtime starts
    #[serde(default)]
    pub initialize_on_start: bool,
}

impl ChatlinkConfig {
    pub fn testing() -> Self {
        Self {
            session: SessionConfig::testing(),
            resources: ResourceConfig::testing(),
            auth: AuthConfig::testing(),
            delivery: DeliveryConfig::testing(),
            initialize_on_start: false,
        }
    }

    /// Reject values that would disable retries or invert the backoff
    pub fn validate(&self) -> Result<(), ConfigError> {
        let backoff = &self.session.backoff;
        if self.session.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "session.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if !backoff.factor.is_finite() || backoff.factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "session.backoff.factor",
                reason: format!("must be a finite value >= 1.0, got {}", backoff.factor),
            });
        }
        if backoff.max_delay < backoff.base_delay {
            return Err(ConfigError::Invalid {
                field: "session.backoff.max_delay",
                reason: "must not be shorter than base_delay".into(),
            });
        }
        if self.session.startup_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "session.startup_timeout",
                reason: "must be non-zero".into(),
            });
        }
        if self.auth.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "auth.timeout",
                reason: "must be non-zero".into(),
            });
        }
        if self.delivery.max_polls == 0 || self.delivery.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "delivery.max_polls",
                reason: "readiness polling needs at least one non-zero interval".into(),
            });
        }
        Ok(())
    }
}
