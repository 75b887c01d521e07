//! Basic in-memory tier: a concurrent TTL map with a periodic sweeper.

use crate::counters::LayerCounters;
use crate::error::LayerResult;
use crate::item::CacheItem;
use crate::layer::CacheLayer;
use async_trait::async_trait;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Configuration for [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Tier name used in logs and metrics.
    pub name: String,
    /// Pre-sized capacity hint for the underlying map.
    pub initial_capacity: usize,
    /// How often the sweeper scans for expired entries.
    pub sweep_interval: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            initial_capacity: 1024,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct MemoryInner<K, V> {
    name: String,
    map: DashMap<K, CacheItem<V>>,
    counters: LayerCounters,
}

impl<K, V> MemoryInner<K, V>
where
    K: Eq + Hash,
{
    /// Drop every expired entry, returning how many were removed.
    fn sweep(&self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, item| !item.is_expired(now));
        let removed = before.saturating_sub(self.map.len());
        if removed > 0 {
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(layer = %self.name, removed, "expiry sweep");
        }
        removed
    }
}

/// A concurrent map from key to [`CacheItem`], with expiry enforced both
/// on access and by a background sweep.
///
/// This is the plain tier without admission control; see
/// [`TinyLfuCache`](crate::TinyLfuCache) for the frequency-gated variant.
pub struct MemoryCache<K, V> {
    inner: Arc<MemoryInner<K, V>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with default configuration.
    ///
    /// Must be called from within a tokio runtime; the expiry sweeper is
    /// spawned immediately.
    pub fn new() -> Self {
        Self::with_config(MemoryCacheConfig::default())
    }

    /// Create a cache with the given configuration.
    pub fn with_config(config: MemoryCacheConfig) -> Self {
        let inner = Arc::new(MemoryInner {
            name: config.name,
            map: DashMap::with_capacity(config.initial_capacity),
            counters: LayerCounters::new(),
        });
        let sweeper = Some(spawn_sweeper(
            Arc::downgrade(&inner),
            config.sweep_interval,
        ));
        Self { inner, sweeper }
    }

    /// Synchronous lookup. Expired entries are removed in place and
    /// reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        match self.inner.map.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value().value().clone();
                self.inner.counters.record_hit();
                Some(value)
            }
            Some(entry) => {
                drop(entry);
                self.inner
                    .map
                    .remove_if(key, |_, item| item.is_expired(now));
                self.inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.inner.counters.record_miss();
                None
            }
            None => {
                self.inner.counters.record_miss();
                None
            }
        }
    }

    /// Synchronous store; replaces any previous value.
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.inner.map.insert(key, CacheItem::new(value, ttl));
        self.inner.counters.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Synchronous removal. Returns whether a live entry was removed.
    pub fn remove_sync(&self, key: &K) -> bool {
        let now = Instant::now();
        match self.inner.map.remove(key) {
            Some((_, item)) => !item.is_expired(now),
            None => false,
        }
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    /// Operation counters for this tier.
    pub fn counters(&self) -> &LayerCounters {
        &self.inner.counters
    }

    /// Run one expiry sweep now, returning how many entries were
    /// removed. The background sweeper calls this on its interval.
    pub fn sweep_now(&self) -> usize {
        self.inner.sweep(Instant::now())
    }

    /// Stop the background sweeper. Entries still expire on access.
    pub fn close(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

impl<K, V> Default for MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for MemoryCache<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

fn spawn_sweeper<K, V>(
    inner: Weak<MemoryInner<K, V>>,
    interval: Duration,
) -> JoinHandle<()>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so a fresh cache
        // is not swept at construction time.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match inner.upgrade() {
                Some(inner) => {
                    inner.sweep(Instant::now());
                }
                None => break,
            }
        }
    })
}

#[async_trait]
impl<K, V> CacheLayer<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn try_get(&self, key: &K) -> LayerResult<Option<V>> {
        Ok(self.get(key))
    }

    async fn set(&self, key: &K, value: V, ttl: Duration) -> LayerResult<()> {
        self.insert(key.clone(), value, ttl);
        Ok(())
    }

    async fn remove(&self, key: &K) -> LayerResult<bool> {
        Ok(self.remove_sync(key))
    }
}
