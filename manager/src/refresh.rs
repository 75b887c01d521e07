//! Pro-active refresh of values nearing expiry.
//!
//! A hit on a key whose value has entered the soft-TTL window schedules
//! a background reload, so hot keys are re-populated before they expire
//! instead of paying a miss. Refreshes are throttled per key and capped
//! globally by a semaphore.

use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::manager::CacheManager;
use crate::task::spawn_logged;
use rand::Rng;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::time::Duration;

impl<K, V> CacheManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Schedule a background refresh of `key` if it is inside the
    /// soft-TTL window, not throttled, and a global refresh slot is
    /// free. Called on every hit; returns quickly in the common case.
    pub(crate) fn maybe_spawn_refresh(&self, key: &K) {
        let inner = &self.inner;

        let state = match inner.keys.get(key) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        let last = state.last_refresh.load(Ordering::Relaxed);
        if last == 0 {
            // Never produced by loader or set; nothing to refresh.
            return;
        }

        let age = Duration::from_millis(inner.now_millis().saturating_sub(last));
        let default_ttl = inner.write_policy.default_ttl();
        let soft_start = default_ttl.saturating_sub(inner.config.early_refresh_threshold);
        if age < soft_start {
            return;
        }
        if age < inner.config.min_refresh_interval {
            return;
        }

        // Global cap: silently skip when every slot is busy.
        let permit = match inner.refresh_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let inner = inner.clone();
        let key = key.clone();
        spawn_logged("early-refresh", async move {
            let _permit = permit;

            // Small start jitter so refreshes triggered by a burst of
            // hits do not stampede the loader at the same instant.
            let jitter_ms: u64 = rand::rng().random_range(0..=500);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

            let state = inner.key_state(&key);
            let _guard = state.lock.clone().lock_owned().await;

            // Re-check under the key lock: a refresh or miss-load that
            // completed while this task waited collapses this one.
            let last = state.last_refresh.load(Ordering::Relaxed);
            if last != 0 {
                let age = Duration::from_millis(inner.now_millis().saturating_sub(last));
                let soft_start = inner
                    .write_policy
                    .default_ttl()
                    .saturating_sub(inner.config.early_refresh_threshold);
                if age < soft_start || age < inner.config.min_refresh_interval {
                    return Ok(());
                }
            }

            let value = inner.loader.load(&key).await.map_err(CacheError::Load)?;
            inner
                .write_policy
                .write(
                    &key,
                    &value,
                    &inner.layers,
                    inner.persistent.clone(),
                    &inner.jittered_ttls(),
                )
                .await?;
            inner.stamp_refresh(&key);

            state.early_refresh_count.fetch_add(1, Ordering::Relaxed);
            inner.totals.early_refreshes.fetch_add(1, Ordering::Relaxed);
            inner.emit(CacheEvent::EarlyRefresh { key: key.clone() });
            Ok::<_, CacheError>(())
        });
    }
}
