//! Read-only view of manager telemetry.

use crate::manager::CacheManager;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Telemetry for a single key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyMetrics {
    /// Hits recorded for this key.
    pub access_count: u64,
    /// Times this key was copied into a faster tier.
    pub promotion_count: u64,
    /// Background refreshes completed for this key.
    pub early_refresh_count: u64,
    /// Time since the value was last produced by the loader or a set;
    /// `None` if it never was.
    pub last_refresh_age: Option<Duration>,
    /// Last observed operation latency, filled in by the
    /// instrumentation wrapper.
    pub last_latency_ms: Option<f64>,
}

/// Immutable point-in-time view of per-key and aggregate counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot<K> {
    /// Per-key telemetry.
    pub keys: HashMap<K, KeyMetrics>,
    /// Keys with a miss-load currently in flight.
    pub inflight_keys: Vec<K>,
    /// Total hits across all tiers.
    pub total_hits: u64,
    /// Total full misses.
    pub total_misses: u64,
    /// Total promotion writes issued.
    pub total_promotions: u64,
    /// Total early refreshes completed.
    pub total_early_refreshes: u64,
    /// The `top_n` keys by access count, most accessed first.
    pub top_keys: Vec<(K, u64)>,
}

impl<K, V> CacheManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build a snapshot of current telemetry.
    ///
    /// Cost is one pass over the per-key maps; no global lock is taken,
    /// so counters may move while the snapshot is assembled.
    pub fn snapshot(&self, top_n: usize) -> MetricsSnapshot<K> {
        let inner = &self.inner;
        let now = inner.now_millis();

        let mut keys = HashMap::with_capacity(inner.keys.len());
        for entry in inner.keys.iter() {
            let state = entry.value();
            let last_refresh = state.last_refresh.load(Ordering::Relaxed);
            keys.insert(
                entry.key().clone(),
                KeyMetrics {
                    access_count: state.access_count.load(Ordering::Relaxed),
                    promotion_count: state.promotion_count.load(Ordering::Relaxed),
                    early_refresh_count: state.early_refresh_count.load(Ordering::Relaxed),
                    last_refresh_age: (last_refresh != 0)
                        .then(|| Duration::from_millis(now.saturating_sub(last_refresh))),
                    last_latency_ms: None,
                },
            );
        }

        let mut top_keys: Vec<(K, u64)> = keys
            .iter()
            .map(|(key, metrics)| (key.clone(), metrics.access_count))
            .collect();
        top_keys.sort_by(|a, b| b.1.cmp(&a.1));
        top_keys.truncate(top_n);

        MetricsSnapshot {
            keys,
            inflight_keys: inner.inflight.keys(),
            total_hits: inner.totals.hits.load(Ordering::Relaxed),
            total_misses: inner.totals.misses.load(Ordering::Relaxed),
            total_promotions: inner.totals.promotions.load(Ordering::Relaxed),
            total_early_refreshes: inner.totals.early_refreshes.load(Ordering::Relaxed),
            top_keys,
        }
    }
}
