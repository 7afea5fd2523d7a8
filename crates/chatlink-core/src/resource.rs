//! Memory-pressure guard consulted before every session (re)initialization
//!
//! Headless browsers leak. Before building a fresh transport handle the
//! session client asks the guard whether the process is above its memory
//! threshold; if so it pauses and issues a reclaim hint first.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::ResourceConfig;

/// Point-in-time memory reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Resident set size in bytes
    pub resident_bytes: u64,
    /// Threshold in effect when the sample was taken
    pub threshold_bytes: u64,
}

impl MemorySample {
    pub fn exceeds_threshold(&self) -> bool {
        self.resident_bytes > self.threshold_bytes
    }
}

/// Memory inspection seam used by the session client
pub trait ResourceGuard: Send + Sync {
    /// Sample current usage, `None` where unsupported
    fn sample(&self) -> Option<MemorySample>;

    /// Whether usage currently exceeds the configured threshold
    fn should_throttle(&self) -> bool {
        self.sample().is_some_and(|s| s.exceeds_threshold())
    }

    /// Best-effort hint to release memory. Never blocks and never fails.
    fn request_reclaim(&self);
}

// ----------------------------------------------------------------------------
// Process Resource Guard
// ----------------------------------------------------------------------------

/// Guard backed by the resident set size of the current process
#[derive(Debug, Clone)]
pub struct ProcessResourceGuard {
    threshold_bytes: u64,
}

impl ProcessResourceGuard {
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            threshold_bytes: config.memory_threshold_bytes,
        }
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    #[cfg(target_os = "linux")]
    fn resident_bytes() -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_status_resident(&status)
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_bytes() -> Option<u64> {
        None
    }
}

impl ResourceGuard for ProcessResourceGuard {
    fn sample(&self) -> Option<MemorySample> {
        let sample = Self::resident_bytes().map(|resident_bytes| MemorySample {
            resident_bytes,
            threshold_bytes: self.threshold_bytes,
        });
        if sample.is_none() {
            debug!("Process memory usage unavailable on this platform");
        }
        sample
    }

    fn request_reclaim(&self) {
        // No portable way to force the allocator or the browser to return
        // memory; the caller's pause is what gives it time to settle.
        trace!("Memory reclaim requested");
    }
}

/// Resident bytes from the `VmRSS` line of `/proc/<pid>/status`
///
/// The kernel reports the value in kB whatever the page size.
pub fn parse_status_resident(status: &str) -> Option<u64> {
    let rss = status.lines().find_map(|line| line.strip_prefix("VmRSS:"))?;
    let mut fields = rss.split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") => Some(value.saturating_mul(1024)),
        _ => None,
    }
}
