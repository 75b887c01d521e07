//! The cache manager: cross-tier lookup, promotion, single-flight, and
//! per-key coordination state.

use crate::error::{BuildError, CacheError, WriteError};
use crate::events::CacheEvent;
use crate::flight::InflightMap;
use crate::loader::{Loader, PersistentStore};
use crate::task::spawn_logged;
use crate::write_policy::{WritePolicy, WriteThrough, DEFAULT_TTL};
use cascade_core::CacheLayer;
use dashmap::DashMap;
use futures::FutureExt;
use rand::Rng;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Which faster tiers receive a value after a hit in a slower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromotionPolicy {
    /// Hits are served in place; nothing is copied upward.
    None,
    /// Only the fastest tier receives the value.
    FirstLayerOnly,
    /// Every tier above the hit receives the value.
    #[default]
    AllHigherLayers,
}

/// Apply uniform `+/- fraction` jitter to a TTL.
///
/// With `fraction` zero (or a zero base) the TTL is returned untouched.
/// Jitter desynchronizes expiry across keys written at the same time.
pub(crate) fn jittered(base: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 || base.is_zero() {
        return base;
    }
    let u: f64 = rand::rng().random_range(-fraction..=fraction);
    base.mul_f64(1.0 + u)
}

/// Per-key coordination state, created lazily on first touch and
/// garbage-collected by the stale-key cleanup.
pub(crate) struct KeyState {
    /// Milliseconds since the manager epoch (offset by one so zero
    /// means "never refreshed").
    pub(crate) last_refresh: AtomicU64,
    /// Last access or creation, same encoding.
    pub(crate) last_touch: AtomicU64,
    /// Serializes loads and refreshes of this key.
    pub(crate) lock: Arc<tokio::sync::Mutex<()>>,
    pub(crate) access_count: AtomicU64,
    pub(crate) promotion_count: AtomicU64,
    pub(crate) early_refresh_count: AtomicU64,
}

impl KeyState {
    fn new(now: u64) -> Self {
        Self {
            last_refresh: AtomicU64::new(0),
            last_touch: AtomicU64::new(now),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            access_count: AtomicU64::new(0),
            promotion_count: AtomicU64::new(0),
            early_refresh_count: AtomicU64::new(0),
        }
    }
}

pub(crate) struct ManagerConfig {
    pub(crate) early_refresh_threshold: Duration,
    pub(crate) min_refresh_interval: Duration,
    pub(crate) max_concurrent_early_refreshes: usize,
    pub(crate) ttl_jitter_fraction: f64,
    pub(crate) promotion_policy: PromotionPolicy,
    pub(crate) stale_key_cleanup_interval: Duration,
    pub(crate) stale_threshold: Duration,
    pub(crate) max_retries: u32,
    pub(crate) retry_base_delay: Duration,
}

#[derive(Default)]
pub(crate) struct Totals {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) promotions: AtomicU64,
    pub(crate) early_refreshes: AtomicU64,
}

pub(crate) struct ManagerInner<K, V> {
    pub(crate) layers: Vec<Arc<dyn CacheLayer<K, V>>>,
    pub(crate) layer_ttls: Vec<Duration>,
    pub(crate) loader: Arc<dyn Loader<K, V>>,
    pub(crate) write_policy: Arc<dyn WritePolicy<K, V>>,
    pub(crate) persistent: Option<Arc<dyn PersistentStore<K, V>>>,
    pub(crate) keys: DashMap<K, Arc<KeyState>>,
    pub(crate) inflight: InflightMap<K, V>,
    pub(crate) refresh_slots: Arc<Semaphore>,
    pub(crate) events: Option<broadcast::Sender<CacheEvent<K>>>,
    pub(crate) totals: Totals,
    pub(crate) config: ManagerConfig,
    pub(crate) epoch: Instant,
}

impl<K, V> ManagerInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Milliseconds since the manager epoch, offset so zero is free to
    /// mean "never".
    pub(crate) fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Get or lazily create the coordination state for `key`.
    pub(crate) fn key_state(&self, key: &K) -> Arc<KeyState> {
        let now = self.now_millis();
        self.keys
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyState::new(now)))
            .clone()
    }

    /// Record that `key` was just produced by the loader or a `set`.
    pub(crate) fn stamp_refresh(&self, key: &K) {
        let now = self.now_millis();
        let state = self.key_state(key);
        state.last_refresh.store(now, Ordering::Relaxed);
        state.last_touch.store(now, Ordering::Relaxed);
    }

    /// Per-layer TTLs with fresh jitter applied.
    pub(crate) fn jittered_ttls(&self) -> Vec<Duration> {
        self.layer_ttls
            .iter()
            .map(|ttl| jittered(*ttl, self.config.ttl_jitter_fraction))
            .collect()
    }

    pub(crate) fn emit(&self, event: CacheEvent<K>) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    /// One retry loop around the loader followed by write propagation.
    /// This is the body of the shared single-flight future.
    async fn load_and_store(self: Arc<Self>, key: K) -> Result<V, CacheError> {
        let state = self.key_state(&key);
        let _guard = state.lock.clone().lock_owned().await;

        let mut attempt = 0;
        let value = loop {
            attempt += 1;
            match self.loader.load(&key).await {
                Ok(value) => break value,
                Err(e) if !e.is_terminal() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "load failed; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(CacheError::Load(e)),
            }
        };

        self.write_policy
            .write(
                &key,
                &value,
                &self.layers,
                self.persistent.clone(),
                &self.jittered_ttls(),
            )
            .await?;
        self.stamp_refresh(&key);
        Ok(value)
    }

    /// Remove per-key state whose last refresh (or, for keys never
    /// refreshed, last touch) predates the stale threshold.
    pub(crate) fn cleanup_stale_keys(&self) -> usize {
        let threshold_ms = self.config.stale_threshold.as_millis() as u64;
        let cutoff = self.now_millis().saturating_sub(threshold_ms);

        let stale: Vec<K> = self
            .keys
            .iter()
            .filter(|entry| {
                let refresh = entry.value().last_refresh.load(Ordering::Relaxed);
                let basis = if refresh != 0 {
                    refresh
                } else {
                    entry.value().last_touch.load(Ordering::Relaxed)
                };
                basis < cutoff
            })
            .map(|entry| entry.key().clone())
            .collect();

        for key in &stale {
            self.keys.remove(key);
            self.inflight.remove(key);
        }
        if !stale.is_empty() {
            debug!(removed = stale.len(), "stale key state cleaned up");
        }
        stale.len()
    }
}

/// Orchestrates an ordered stack of cache tiers in front of a loader.
///
/// Reads walk the tiers fastest first, promote hits upward, coalesce
/// concurrent misses into a single loader call, and schedule background
/// refreshes for values nearing expiry. Writes go through the
/// configured [`WritePolicy`].
///
/// Built with [`CacheManager::builder`].
pub struct CacheManager<K, V> {
    pub(crate) inner: Arc<ManagerInner<K, V>>,
    cleanup_task: Option<JoinHandle<()>>,
}

impl<K, V> CacheManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start building a manager.
    pub fn builder() -> CacheManagerBuilder<K, V> {
        CacheManagerBuilder::new()
    }

    /// Look up `key` across the tiers, falling back to the loader.
    ///
    /// Tier errors are logged and skipped. On a hit the value is
    /// promoted to faster tiers per the promotion policy and an early
    /// refresh may be scheduled. On a full miss, concurrent callers for
    /// the same key share one loader invocation and all observe its
    /// outcome.
    ///
    /// Dropping the returned future (timeout, select) abandons the wait
    /// without cancelling the shared load for other callers.
    pub async fn get_or_add(&self, key: &K) -> Result<V, CacheError> {
        let inner = &self.inner;

        for (i, layer) in inner.layers.iter().enumerate() {
            match layer.try_get(key).await {
                Ok(Some(value)) => {
                    let state = inner.key_state(key);
                    state.access_count.fetch_add(1, Ordering::Relaxed);
                    state.last_touch.store(inner.now_millis(), Ordering::Relaxed);
                    inner.totals.hits.fetch_add(1, Ordering::Relaxed);
                    inner.emit(CacheEvent::Hit {
                        key: key.clone(),
                        layer: i,
                    });

                    self.promote(key, &value, i, &state);
                    self.maybe_spawn_refresh(key);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(layer = layer.name(), error = %e, "tier lookup failed; falling through");
                }
            }
        }

        inner.totals.misses.fetch_add(1, Ordering::Relaxed);
        inner.emit(CacheEvent::Miss { key: key.clone() });

        let shared = inner.inflight.get_or_insert_with(key, || {
            let inner = inner.clone();
            let key = key.clone();
            async move {
                let result = inner.clone().load_and_store(key.clone()).await;
                // Always drop the entry so the next miss starts fresh;
                // waiters already hold their clone of this future.
                inner.inflight.remove(&key);
                result
            }
            .boxed()
        });
        shared.await
    }

    /// Write `value` through the configured policy with jittered TTLs.
    pub async fn set(&self, key: &K, value: V) -> Result<(), WriteError> {
        let inner = &self.inner;
        inner.stamp_refresh(key);
        inner
            .write_policy
            .write(
                key,
                &value,
                &inner.layers,
                inner.persistent.clone(),
                &inner.jittered_ttls(),
            )
            .await
    }

    /// Remove `key` from every tier and drop its coordination state.
    ///
    /// Tier failures are logged; the call reports whether any tier held
    /// a live entry.
    pub async fn remove(&self, key: &K) -> bool {
        let inner = &self.inner;
        let mut removed = false;
        for layer in &inner.layers {
            match layer.remove(key).await {
                Ok(was_present) => removed |= was_present,
                Err(e) => {
                    warn!(layer = layer.name(), error = %e, "tier removal failed");
                }
            }
        }
        inner.keys.remove(key);
        inner.inflight.remove(key);
        removed
    }

    /// Subscribe to cache events, if the manager was built with an
    /// event channel.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<CacheEvent<K>>> {
        self.inner.events.as_ref().map(|sender| sender.subscribe())
    }

    /// Run one stale-key cleanup pass now, returning how many keys were
    /// dropped. The background task calls this on its interval.
    pub fn cleanup_now(&self) -> usize {
        self.inner.cleanup_stale_keys()
    }

    /// Stop background work and wait for in-flight early refreshes to
    /// drain. New refreshes can no longer be scheduled afterwards.
    pub async fn close(&mut self) {
        if let Some(handle) = self.cleanup_task.take() {
            handle.abort();
        }
        let slots = self.inner.config.max_concurrent_early_refreshes as u32;
        if let Ok(permits) = self.inner.refresh_slots.clone().acquire_many_owned(slots).await {
            permits.forget();
        }
    }

    /// Copy a hit found in tier `hit_layer` into faster tiers,
    /// fire-and-forget.
    fn promote(&self, key: &K, value: &V, hit_layer: usize, state: &Arc<KeyState>) {
        let inner = &self.inner;
        let targets = match inner.config.promotion_policy {
            PromotionPolicy::None => 0..0,
            PromotionPolicy::FirstLayerOnly => 0..usize::from(hit_layer > 0),
            PromotionPolicy::AllHigherLayers => 0..hit_layer,
        };

        for j in targets {
            let layer = inner.layers[j].clone();
            let ttl = jittered(inner.layer_ttls[j], inner.config.ttl_jitter_fraction);
            let key = key.clone();
            let value = value.clone();

            state.promotion_count.fetch_add(1, Ordering::Relaxed);
            inner.totals.promotions.fetch_add(1, Ordering::Relaxed);
            inner.emit(CacheEvent::Promotion {
                key: key.clone(),
                layer: j,
            });

            spawn_logged("promotion", async move {
                layer.promote(&key, value, ttl).await
            });
        }
    }
}

impl<K, V> Drop for CacheManager<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_task.take() {
            handle.abort();
        }
    }
}

/// Builder for [`CacheManager`]; every knob has a default.
pub struct CacheManagerBuilder<K, V> {
    layers: Vec<Arc<dyn CacheLayer<K, V>>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
    write_policy: Option<Arc<dyn WritePolicy<K, V>>>,
    persistent: Option<Arc<dyn PersistentStore<K, V>>>,
    layer_ttls: Option<Vec<Duration>>,
    early_refresh_threshold: Duration,
    min_refresh_interval: Duration,
    max_concurrent_early_refreshes: usize,
    ttl_jitter_fraction: f64,
    promotion_policy: PromotionPolicy,
    stale_key_cleanup_interval: Duration,
    stale_threshold: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    event_capacity: Option<usize>,
}

impl<K, V> Default for CacheManagerBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheManagerBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            loader: None,
            write_policy: None,
            persistent: None,
            layer_ttls: None,
            early_refresh_threshold: Duration::from_secs(60),
            min_refresh_interval: Duration::from_secs(30),
            max_concurrent_early_refreshes: 10,
            ttl_jitter_fraction: 0.1,
            promotion_policy: PromotionPolicy::AllHigherLayers,
            stale_key_cleanup_interval: Duration::from_secs(600),
            stale_threshold: Duration::from_secs(3600),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            event_capacity: None,
        }
    }

    /// Append a tier. Tiers are consulted in insertion order, so add
    /// the fastest first.
    pub fn layer(mut self, layer: impl CacheLayer<K, V> + 'static) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    /// Append an already-shared tier.
    pub fn layer_arc(mut self, layer: Arc<dyn CacheLayer<K, V>>) -> Self {
        self.layers.push(layer);
        self
    }

    /// The loader consulted when every tier misses.
    pub fn loader(mut self, loader: impl Loader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Write policy; defaults to [`WriteThrough`] with a 5-minute TTL.
    pub fn write_policy(mut self, policy: impl WritePolicy<K, V> + 'static) -> Self {
        self.write_policy = Some(Arc::new(policy));
        self
    }

    /// Durable store written behind the cache. Without one, writes log
    /// a warning and succeed (see [`WriteThrough::require_persistence`]).
    pub fn persistent_store(mut self, store: impl PersistentStore<K, V> + 'static) -> Self {
        self.persistent = Some(Arc::new(store));
        self
    }

    /// Per-tier TTL overrides; missing entries use the policy TTL.
    pub fn layer_ttls(mut self, ttls: Vec<Duration>) -> Self {
        self.layer_ttls = Some(ttls);
        self
    }

    /// Soft-TTL window before hard expiry (default 1 min).
    pub fn early_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.early_refresh_threshold = threshold;
        self
    }

    /// Per-key refresh throttle (default 30 s).
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Global cap on concurrent early refreshes (default 10).
    pub fn max_concurrent_early_refreshes(mut self, max: usize) -> Self {
        self.max_concurrent_early_refreshes = max.max(1);
        self
    }

    /// Uniform TTL jitter fraction in `[0, 1]` (default 0.1). Values
    /// outside the range are clamped.
    pub fn ttl_jitter_fraction(mut self, fraction: f64) -> Self {
        self.ttl_jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Promotion policy (default: all higher tiers).
    pub fn promotion_policy(mut self, policy: PromotionPolicy) -> Self {
        self.promotion_policy = policy;
        self
    }

    /// Period of the stale-key state cleanup (default 10 min).
    pub fn stale_key_cleanup_interval(mut self, interval: Duration) -> Self {
        self.stale_key_cleanup_interval = interval;
        self
    }

    /// Age past which per-key state is garbage-collected (default 1 h).
    pub fn stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Loader attempts per miss (default 3).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// First backoff delay; doubles per attempt (default 100 ms).
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Enable the event broadcast channel with the given capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity.max(1));
        self
    }

    /// Build the manager and start its background cleanup task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<CacheManager<K, V>, BuildError> {
        if self.layers.is_empty() {
            return Err(BuildError::NoLayers);
        }
        let loader = self.loader.ok_or(BuildError::NoLoader)?;
        let write_policy = self
            .write_policy
            .unwrap_or_else(|| Arc::new(WriteThrough::new(DEFAULT_TTL)));

        let default_ttl = write_policy.default_ttl();
        let mut layer_ttls = self.layer_ttls.unwrap_or_default();
        layer_ttls.resize(self.layers.len(), default_ttl);

        let events = self
            .event_capacity
            .map(|capacity| broadcast::channel(capacity).0);

        let inner = Arc::new(ManagerInner {
            layers: self.layers,
            layer_ttls,
            loader,
            write_policy,
            persistent: self.persistent,
            keys: DashMap::new(),
            inflight: InflightMap::new(),
            refresh_slots: Arc::new(Semaphore::new(self.max_concurrent_early_refreshes)),
            events,
            totals: Totals::default(),
            config: ManagerConfig {
                early_refresh_threshold: self.early_refresh_threshold,
                min_refresh_interval: self.min_refresh_interval,
                max_concurrent_early_refreshes: self.max_concurrent_early_refreshes,
                ttl_jitter_fraction: self.ttl_jitter_fraction,
                promotion_policy: self.promotion_policy,
                stale_key_cleanup_interval: self.stale_key_cleanup_interval,
                stale_threshold: self.stale_threshold,
                max_retries: self.max_retries,
                retry_base_delay: self.retry_base_delay,
            },
            epoch: Instant::now(),
        });

        let cleanup_task = Some(spawn_cleanup(
            Arc::downgrade(&inner),
            inner.config.stale_key_cleanup_interval,
        ));

        Ok(CacheManager {
            inner,
            cleanup_task,
        })
    }
}

fn spawn_cleanup<K, V>(
    inner: Weak<ManagerInner<K, V>>,
    interval: Duration,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match inner.upgrade() {
                Some(inner) => {
                    inner.cleanup_stale_keys();
                }
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_bounds() {
        let base = Duration::from_secs(100);
        for _ in 0..1000 {
            let out = jittered(base, 0.1);
            assert!(out >= Duration::from_secs(90), "{out:?} below bound");
            assert!(out <= Duration::from_secs(110), "{out:?} above bound");
        }
    }

    #[test]
    fn zero_fraction_disables_jitter() {
        let base = Duration::from_secs(100);
        assert_eq!(jittered(base, 0.0), base);
    }
}
