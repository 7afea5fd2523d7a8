//! Resource guard with a settable resident size

use std::sync::atomic::{AtomicU64, Ordering};

use chatlink_core::{MemorySample, ResourceGuard};

/// Reports whatever resident size the test sets
#[derive(Debug)]
pub struct FixedResourceGuard {
    resident_bytes: AtomicU64,
    threshold_bytes: u64,
    reclaims: AtomicU64,
}

impl FixedResourceGuard {
    pub fn new(resident_bytes: u64, threshold_bytes: u64) -> Self {
        Self {
            resident_bytes: AtomicU64::new(resident_bytes),
            threshold_bytes,
            reclaims: AtomicU64::new(0),
        }
    }

    /// Always under the threshold
    pub fn relaxed() -> Self {
        Self::new(0, u64::MAX)
    }

    /// Always over the threshold
    pub fn pressured() -> Self {
        Self::new(u64::MAX, 0)
    }

    pub fn set_resident(&self, bytes: u64) {
        self.resident_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Number of reclaim hints received
    pub fn reclaim_count(&self) -> u64 {
        self.reclaims.load(Ordering::Relaxed)
    }
}

impl ResourceGuard for FixedResourceGuard {
    fn sample(&self) -> Option<MemorySample> {
        Some(MemorySample {
            resident_bytes: self.resident_bytes.load(Ordering::Relaxed),
            threshold_bytes: self.threshold_bytes,
        })
    }

    fn request_reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::Relaxed);
    }
}
