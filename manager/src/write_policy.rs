//! Write propagation strategies.
//!
//! A write policy decides how a value reaches the cache tiers and the
//! persistent store. Write-through is synchronous end to end and treats
//! a persistence failure as fatal; write-behind acknowledges after the
//! fastest tier and fans the rest out in the background.

use crate::error::WriteError;
use crate::loader::PersistentStore;
use crate::task::spawn_logged;
use async_trait::async_trait;
use cascade_core::CacheLayer;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default TTL applied when a policy has no per-layer override (5 min).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Strategy for propagating a write across tiers and to persistence.
#[async_trait]
pub trait WritePolicy<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync + 'static,
{
    /// The base TTL this policy writes with. The manager uses it to
    /// reason about the soft-TTL window.
    fn default_ttl(&self) -> Duration;

    /// Propagate `value` to `layers` (fastest first) and the persistent
    /// store. `layer_ttls` carries one pre-jittered TTL per layer;
    /// missing entries fall back to [`default_ttl`](WritePolicy::default_ttl).
    async fn write(
        &self,
        key: &K,
        value: &V,
        layers: &[Arc<dyn CacheLayer<K, V>>],
        persistent: Option<Arc<dyn PersistentStore<K, V>>>,
        layer_ttls: &[Duration],
    ) -> Result<(), WriteError>;
}

/// Synchronous propagation to every tier, then the persistent store.
///
/// Individual tier failures are logged and skipped; a persistent-store
/// failure propagates to the caller because persistence is the source
/// of truth.
#[derive(Debug, Clone)]
pub struct WriteThrough {
    default_ttl: Duration,
    require_persistence: bool,
}

impl WriteThrough {
    /// Create a write-through policy with the given base TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            require_persistence: false,
        }
    }

    /// Treat a missing persistent store as an error instead of logging
    /// and succeeding.
    pub fn require_persistence(mut self, required: bool) -> Self {
        self.require_persistence = required;
        self
    }
}

impl Default for WriteThrough {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl<K, V> WritePolicy<K, V> for WriteThrough
where
    K: Send + Sync,
    V: Clone + Send + Sync + 'static,
{
    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn write(
        &self,
        key: &K,
        value: &V,
        layers: &[Arc<dyn CacheLayer<K, V>>],
        persistent: Option<Arc<dyn PersistentStore<K, V>>>,
        layer_ttls: &[Duration],
    ) -> Result<(), WriteError> {
        for (i, layer) in layers.iter().enumerate() {
            let ttl = layer_ttls.get(i).copied().unwrap_or(self.default_ttl);
            if let Err(e) = layer.set(key, value.clone(), ttl).await {
                warn!(layer = layer.name(), error = %e, "tier write failed; continuing");
            }
        }

        match persistent {
            Some(store) => store.write(key, value).await,
            None if self.require_persistence => Err(WriteError::NoPersistentStore),
            None => {
                warn!("no persistent store configured; write not persisted");
                Ok(())
            }
        }
    }
}

/// Synchronous write to the fastest tier only; remaining tiers and the
/// persistent store are updated in the background.
///
/// The synchronous path cannot fail on anything past tier 0. Concurrent
/// writes to the same key race last-writer-wins with no cross-write
/// ordering between tiers.
#[derive(Debug, Clone)]
pub struct WriteBehind {
    default_ttl: Duration,
}

impl WriteBehind {
    /// Create a write-behind policy with the given base TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }
}

impl Default for WriteBehind {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl<K, V> WritePolicy<K, V> for WriteBehind
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn write(
        &self,
        key: &K,
        value: &V,
        layers: &[Arc<dyn CacheLayer<K, V>>],
        persistent: Option<Arc<dyn PersistentStore<K, V>>>,
        layer_ttls: &[Duration],
    ) -> Result<(), WriteError> {
        if let Some(first) = layers.first() {
            let ttl = layer_ttls.first().copied().unwrap_or(self.default_ttl);
            if let Err(e) = first.set(key, value.clone(), ttl).await {
                warn!(layer = first.name(), error = %e, "tier write failed; continuing");
            }
        }

        let rest: Vec<Arc<dyn CacheLayer<K, V>>> = layers.iter().skip(1).cloned().collect();
        let ttls: Vec<Duration> = (1..layers.len())
            .map(|i| layer_ttls.get(i).copied().unwrap_or(self.default_ttl))
            .collect();
        let key = key.clone();
        let value = value.clone();

        spawn_logged("write-behind", async move {
            for (layer, ttl) in rest.iter().zip(ttls) {
                if let Err(e) = layer.set(&key, value.clone(), ttl).await {
                    warn!(layer = layer.name(), error = %e, "tier write failed; continuing");
                }
            }
            match persistent {
                Some(store) => store.write(&key, &value).await,
                None => Ok(()),
            }
        });

        Ok(())
    }
}
