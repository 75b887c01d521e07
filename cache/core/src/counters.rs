//! Per-tier operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters maintained by the in-memory tiers.
///
/// All counters are monotonic and updated with relaxed ordering; they
/// feed metrics, never control flow.
#[derive(Debug, Default)]
pub struct LayerCounters {
    /// Lookups that returned a live value.
    pub hits: AtomicU64,
    /// Lookups that found nothing (or only an expired entry).
    pub misses: AtomicU64,
    /// Writes that stored a value (admitted or replacing).
    pub insertions: AtomicU64,
    /// Writes declined by the admission policy.
    pub rejections: AtomicU64,
    /// Entries displaced to make room for a new value.
    pub evictions: AtomicU64,
    /// Entries removed because their deadline passed (on access or by
    /// the sweeper).
    pub expirations: AtomicU64,
    /// Hits on entries inside the soft-TTL window.
    pub soft_ttl_hits: AtomicU64,
}

impl LayerCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            soft_ttl_hits: self.soft_ttl_hits.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`LayerCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Lookups that returned a live value.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Writes that stored a value.
    pub insertions: u64,
    /// Writes declined by admission.
    pub rejections: u64,
    /// Entries displaced by eviction.
    pub evictions: u64,
    /// Entries removed by expiry.
    pub expirations: u64,
    /// Hits inside the soft-TTL window.
    pub soft_ttl_hits: u64,
}

impl CounterSnapshot {
    /// Hit rate over all lookups, or 0.0 with no traffic.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
