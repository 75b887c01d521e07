//! Operation timing decorator.
//!
//! Wraps a [`CacheManager`] to time every operation with the monotonic
//! clock and feed an injected [`MetricsSink`]. The wrapper changes no
//! observable behavior of the manager.

use crate::error::{CacheError, WriteError};
use crate::manager::CacheManager;
use crate::snapshot::MetricsSnapshot;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

/// Metric name of the per-operation counter.
pub const OPERATIONS_TOTAL: &str = "cache_operations_total";
/// Metric name of the per-operation latency histogram.
pub const OPERATION_LATENCY_MS: &str = "cache_operation_latency_ms";

/// Destination for operation metrics.
///
/// Exporters (Prometheus, OpenTelemetry, ...) live outside this crate;
/// they adapt to this trait.
pub trait MetricsSink: Send + Sync {
    /// Count one occurrence of `op` under the metric `name`.
    fn increment_counter(&self, name: &'static str, op: &'static str);

    /// Record an observed latency for `op` under the metric `name`.
    fn record_latency_ms(&self, name: &'static str, op: &'static str, latency_ms: f64);
}

/// [`CacheManager`] decorator that measures operation latency.
pub struct InstrumentedManager<K, V> {
    manager: CacheManager<K, V>,
    sink: Arc<dyn MetricsSink>,
    last_latency: DashMap<K, f64>,
}

impl<K, V> InstrumentedManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wrap `manager`, reporting to `sink`.
    pub fn new(manager: CacheManager<K, V>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            manager,
            sink,
            last_latency: DashMap::new(),
        }
    }

    /// Timed [`CacheManager::get_or_add`].
    pub async fn get_or_add(&self, key: &K) -> Result<V, CacheError> {
        let started = Instant::now();
        let result = self.manager.get_or_add(key).await;
        self.observe("get_or_add", key, started);
        result
    }

    /// Timed [`CacheManager::set`].
    pub async fn set(&self, key: &K, value: V) -> Result<(), WriteError> {
        let started = Instant::now();
        let result = self.manager.set(key, value).await;
        self.observe("set", key, started);
        result
    }

    /// Timed [`CacheManager::remove`].
    pub async fn remove(&self, key: &K) -> bool {
        let started = Instant::now();
        let result = self.manager.remove(key).await;
        self.observe("remove", key, started);
        result
    }

    /// Snapshot augmented with the per-key latencies this wrapper has
    /// observed.
    pub fn snapshot(&self, top_n: usize) -> MetricsSnapshot<K> {
        let mut snapshot = self.manager.snapshot(top_n);
        for (key, metrics) in snapshot.keys.iter_mut() {
            if let Some(latency) = self.last_latency.get(key) {
                metrics.last_latency_ms = Some(*latency);
            }
        }
        snapshot
    }

    /// The wrapped manager.
    pub fn manager(&self) -> &CacheManager<K, V> {
        &self.manager
    }

    /// Unwrap, discarding the instrumentation.
    pub fn into_inner(self) -> CacheManager<K, V> {
        self.manager
    }

    fn observe(&self, op: &'static str, key: &K, started: Instant) {
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.sink.increment_counter(OPERATIONS_TOTAL, op);
        self.sink
            .record_latency_ms(OPERATION_LATENCY_MS, op, latency_ms);
        self.last_latency.insert(key.clone(), latency_ms);
    }
}
