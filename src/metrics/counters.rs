use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Service counters exposed on `GET /metrics`.
///
/// Monotonically increasing, never reset, updated with relaxed atomics on
/// the hot path. There is no ordering guarantee between counters: a snapshot
/// taken mid-request may see `metrics_received` without the matching
/// `batches_processed`.
pub struct IngestCounters {
    metrics_received: AtomicU64,
    batches_processed: AtomicU64,
    validation_errors: AtomicU64,
    rate_limited_requests: AtomicU64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self {
            metrics_received: AtomicU64::new(0),
            batches_processed: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            rate_limited_requests: AtomicU64::new(0),
        }
    }

    /// Called once per accepted batch with its metric count.
    #[inline]
    pub fn add_metrics_received(&self, count: u64) {
        self.metrics_received.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_batches_processed(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Called on parse failures as well as validation failures.
    #[inline]
    pub fn inc_validation_errors(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_rate_limited(&self) {
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            metrics_received: self.metrics_received.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            rate_limited_requests: self.rate_limited_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for IngestCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counter values; the JSON body of `GET /metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub metrics_received: u64,
    pub batches_processed: u64,
    pub validation_errors: u64,
    pub rate_limited_requests: u64,
}
