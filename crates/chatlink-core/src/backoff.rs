//! Exponential backoff for session reinitialization
//!
//! `delay(attempt) = min(base_delay * factor^(attempt - 1), max_delay)`

use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Pure retry-delay policy consulted before every reinitialization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per additional attempt
    pub factor: f64,
    /// Upper bound on any delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            factor: 1.5,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            factor,
            max_delay,
        }
    }

    /// Fast policy for tests
    pub fn testing() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            factor: 2.0,
            max_delay: Duration::from_millis(80),
        }
    }

    /// Delay to apply before the given attempt (1-based; 0 is treated as 1)
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.max(1) - 1;
        let base_ms = self.base_delay.as_millis() as f64;
        let cap_ms = self.max_delay.as_millis() as f64;
        // Clamp the exponent so huge attempt counts saturate at the cap
        // instead of overflowing to infinity.
        let multiplier = self.factor.max(1.0).powi(exponent.min(1024) as i32);
        let delay_ms = (base_ms * multiplier).min(cap_ms);
        Duration::from_millis(delay_ms as u64)
    }

    /// First attempt number whose delay equals the cap
    pub fn attempts_to_cap(&self) -> u32 {
        let mut attempt = 1;
        while self.delay(attempt) < self.max_delay && attempt < 1024 {
            attempt += 1;
        }
        attempt
    }
}
