//! W-TinyLFU in-memory tier.
//!
//! Extends the basic TTL map with a frequency-based admission policy:
//! a Count-Min Sketch tracks approximate access counts, a Bloom filter
//! flags first-seen keys, and writes of cold keys are admitted with a
//! probability that compares their frequency against a sampled eviction
//! victim. At capacity, eviction samples a handful of resident keys and
//! displaces the least frequent.

use crate::bloom::BloomFilter;
use crate::counters::LayerCounters;
use crate::error::LayerResult;
use crate::item::CacheItem;
use crate::layer::CacheLayer;
use crate::sketch::CountMinSketch;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Configuration for [`TinyLfuCache`].
#[derive(Debug, Clone)]
pub struct TinyLfuConfig {
    /// Tier name used in logs and metrics.
    pub name: String,
    /// Capacity that triggers eviction.
    pub max_size: usize,
    /// Count-Min Sketch row width.
    pub sketch_width: usize,
    /// Count-Min Sketch row count.
    pub sketch_depth: usize,
    /// Doorkeeper Bloom filter size in bits.
    pub bloom_bits: usize,
    /// Doorkeeper hash count.
    pub bloom_hashes: usize,
    /// Number of resident keys sampled per eviction.
    pub sample_size: usize,
    /// Whether the admission gate is applied to cold keys.
    pub admission: bool,
    /// How often the sketch is halved.
    pub decay_interval: Duration,
    /// How often the expiry sweeper runs.
    pub sweep_interval: Duration,
    /// Window before expiry in which hits are counted as soft-TTL hits.
    pub soft_ttl_window: Duration,
    /// Fixed seed for the sketch and doorkeeper; `None` picks a random
    /// seed. Tests pin this for reproducible placement.
    pub seed: Option<u64>,
}

impl Default for TinyLfuConfig {
    fn default() -> Self {
        Self::with_max_size(1000)
    }
}

impl TinyLfuConfig {
    /// Defaults for the given capacity: sketch 1000x5, doorkeeper sized
    /// at two bits per slot, five-way victim sampling, five-minute
    /// decay.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            name: "tinylfu".to_string(),
            max_size,
            sketch_width: 1000,
            sketch_depth: 5,
            bloom_bits: (max_size * 2).max(64),
            bloom_hashes: 5,
            sample_size: 5,
            admission: true,
            decay_interval: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            soft_ttl_window: Duration::from_secs(60),
            seed: None,
        }
    }
}

struct TinyLfuInner<K, V> {
    name: String,
    map: DashMap<K, CacheItem<V>>,
    sketch: CountMinSketch,
    doorkeeper: BloomFilter,
    counters: LayerCounters,
    max_size: usize,
    sample_size: usize,
    admission: bool,
    soft_ttl_window: Duration,
}

impl<K, V> TinyLfuInner<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Sample up to `sample_size` resident keys (with replacement) and
    /// return the one with the lowest sketch estimate. Ties keep the
    /// first minimum. `None` when the map is empty.
    fn sample_victim(&self) -> Option<(K, u32)> {
        let len = self.map.len();
        if len == 0 {
            return None;
        }

        let mut rng = rand::rng();
        let mut indices: Vec<usize> = (0..self.sample_size)
            .map(|_| rng.random_range(0..len))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut victim: Option<(K, u32)> = None;
        let mut wanted = indices.into_iter().peekable();
        for (pos, entry) in self.map.iter().enumerate() {
            match wanted.peek() {
                Some(&idx) if idx == pos => {
                    wanted.next();
                    let estimate = self.sketch.estimate(entry.key());
                    let lower = victim
                        .as_ref()
                        .map(|(_, freq)| estimate < *freq)
                        .unwrap_or(true);
                    if lower {
                        victim = Some((entry.key().clone(), estimate));
                    }
                }
                Some(_) => {}
                // Concurrent removals can shrink the map mid-iteration;
                // whatever was sampled so far is enough.
                None => break,
            }
        }
        victim
    }

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

/// In-memory tier with W-TinyLFU admission and sampled LFU eviction.
pub struct TinyLfuCache<K, V> {
    inner: Arc<TinyLfuInner<K, V>>,
    decay_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl<K, V> TinyLfuCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with default configuration (capacity 1000).
    ///
    /// Must be called from within a tokio runtime; the decay and sweep
    /// tasks are spawned immediately.
    pub fn new() -> Self {
        Self::with_config(TinyLfuConfig::default())
    }

    /// Create a cache with the given configuration.
    pub fn with_config(config: TinyLfuConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let inner = Arc::new(TinyLfuInner {
            name: config.name,
            map: DashMap::with_capacity(config.max_size),
            sketch: CountMinSketch::with_seed(config.sketch_width, config.sketch_depth, seed),
            doorkeeper: BloomFilter::with_seed(config.bloom_bits, config.bloom_hashes, seed),
            counters: LayerCounters::new(),
            max_size: config.max_size,
            sample_size: config.sample_size,
            admission: config.admission,
            soft_ttl_window: config.soft_ttl_window,
        });

        let decay_task = Some(spawn_decay(Arc::downgrade(&inner), config.decay_interval));
        let sweep_task = Some(spawn_sweep(Arc::downgrade(&inner), config.sweep_interval));

        Self {
            inner,
            decay_task,
            sweep_task,
        }
    }

    /// Store `value` under `key`, subject to admission and eviction.
    ///
    /// Returns whether the value was stored; a `false` means the
    /// admission policy declined the write and the cache is unchanged.
    pub fn insert(&self, key: K, value: V, ttl: Duration) -> bool {
        let inner = &self.inner;
        inner.sketch.increment(&key);

        // Cold keys pass a probabilistic gate comparing their frequency
        // against a sampled victim's. An empty cache admits everything.
        if inner.admission && !inner.doorkeeper.contains(&key) {
            inner.doorkeeper.insert(&key);
            if !inner.map.is_empty() {
                let f_new = inner.sketch.estimate(&key) as f64;
                let f_victim = inner
                    .sample_victim()
                    .map(|(_, freq)| freq as f64)
                    .unwrap_or(0.0);
                let p = f_new / (f_new + f_victim + 1.0);
                if rand::rng().random::<f64>() >= p {
                    inner.counters.rejections.fetch_add(1, Ordering::Relaxed);
                    trace!(layer = %inner.name, "admission declined cold key");
                    return false;
                }
            }
        }

        if inner.map.len() >= inner.max_size && !inner.map.contains_key(&key) {
            if let Some((victim, victim_freq)) = inner.sample_victim() {
                if inner.sketch.estimate(&key) < victim_freq {
                    inner.counters.rejections.fetch_add(1, Ordering::Relaxed);
                    trace!(layer = %inner.name, "candidate colder than sampled victim");
                    return false;
                }
                inner.map.remove(&victim);
                inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        inner.map.insert(key, CacheItem::new(value, ttl));
        inner.counters.insertions.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Store a value promoted from a slower tier, bypassing admission.
    ///
    /// The value already demonstrated demand below; it is inserted with
    /// its residual TTL. Eviction still fires when the cache is full.
    pub fn promote_insert(&self, key: K, value: V, remaining_ttl: Duration) {
        let inner = &self.inner;
        inner.sketch.increment(&key);
        inner.doorkeeper.insert(&key);

        if inner.map.len() >= inner.max_size && !inner.map.contains_key(&key) {
            if let Some((victim, _)) = inner.sample_victim() {
                inner.map.remove(&victim);
                inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        inner.map.insert(key, CacheItem::new(value, remaining_ttl));
        inner.counters.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Synchronous lookup. Records the access in the sketch, removes
    /// expired entries in place, and counts soft-TTL hits (entries
    /// within [`TinyLfuConfig::soft_ttl_window`] of expiry).
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = &self.inner;
        inner.sketch.increment(key);

        let now = Instant::now();
        match inner.map.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                if entry.expires_at() - now <= inner.soft_ttl_window {
                    inner.counters.soft_ttl_hits.fetch_add(1, Ordering::Relaxed);
                }
                let value = entry.value().value().clone();
                inner.counters.record_hit();
                Some(value)
            }
            Some(entry) => {
                drop(entry);
                inner.map.remove_if(key, |_, item| item.is_expired(now));
                inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
                inner.counters.record_miss();
                None
            }
            None => {
                inner.counters.record_miss();
                None
            }
        }
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

    /// Sketch estimate for a key, exposed for diagnostics and tests.
    pub fn frequency(&self, key: &K) -> u32 {
        self.inner.sketch.estimate(key)
    }

    /// Halve the sketch now. The background task calls this on its
    /// interval.
    pub fn decay_now(&self) {
        self.inner.sketch.decay();
    }

    /// Run one expiry sweep now, returning how many entries were
    /// removed.
    pub fn sweep_now(&self) -> usize {
        self.inner.sweep(Instant::now())
    }

    /// Stop the background decay and sweep tasks.
    pub fn close(&mut self) {
        if let Some(handle) = self.decay_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.sweep_task.take() {
            handle.abort();
        }
    }
}

impl<K, V> Default for TinyLfuCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for TinyLfuCache<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.decay_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.sweep_task.take() {
            handle.abort();
        }
    }
}

fn spawn_decay<K, V>(inner: Weak<TinyLfuInner<K, V>>, interval: Duration) -> JoinHandle<()>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match inner.upgrade() {
                Some(inner) => {
                    inner.sketch.decay();
                    trace!(layer = %inner.name, "sketch decay");
                }
                None => break,
            }
        }
    })
}

fn spawn_sweep<K, V>(inner: Weak<TinyLfuInner<K, V>>, interval: Duration) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
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
impl<K, V> CacheLayer<K, V> for TinyLfuCache<K, V>
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
        // Admission rejections are silent by contract.
        self.insert(key.clone(), value, ttl);
        Ok(())
    }

    async fn promote(&self, key: &K, value: V, remaining_ttl: Duration) -> LayerResult<()> {
        self.promote_insert(key.clone(), value, remaining_ttl);
        Ok(())
    }

    async fn remove(&self, key: &K) -> LayerResult<bool> {
        Ok(self.remove_sync(key))
    }
}
