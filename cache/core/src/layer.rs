//! The cache tier contract.
//!
//! Every storage tier, from the in-process W-TinyLFU cache down to a
//! remote key/value store, implements [`CacheLayer`]. The manager holds
//! tiers as `Arc<dyn CacheLayer<K, V>>` ordered fastest first and knows
//! nothing about what is behind the trait.

use crate::error::LayerResult;
use async_trait::async_trait;
use std::time::Duration;

/// A single storage tier in the cache hierarchy.
///
/// # Failure policy
///
/// `set` implementations should swallow internal errors where possible
/// (logging them) so that a slow or broken tier never fails a write
/// path outright; errors that do surface are logged and dropped by the
/// caller. `try_get` errors cause the manager to fall through to the
/// next tier.
///
/// # Thread safety
///
/// Tiers are shared across workers; implementations must be
/// `Send + Sync` and internally synchronized.
#[async_trait]
pub trait CacheLayer<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync + 'static,
{
    /// Short tier name for logs and metrics ("memory", "remote", ...).
    fn name(&self) -> &str;

    /// Look up `key`, returning the value if present and unexpired.
    ///
    /// Expired entries are removed on access and reported as a miss.
    async fn try_get(&self, key: &K) -> LayerResult<Option<V>>;

    /// Store `value` under `key` for at most `ttl`, replacing any
    /// previous value.
    ///
    /// Tiers with an admission policy may silently decline the write;
    /// `Ok(())` does not guarantee the value was stored.
    async fn set(&self, key: &K, value: V, ttl: Duration) -> LayerResult<()>;

    /// Store a value found in a slower tier.
    ///
    /// The value already demonstrated demand by being hit below, so
    /// tiers with an admission policy bypass it here. The default
    /// forwards to [`set`](CacheLayer::set), which is correct for tiers
    /// without admission.
    async fn promote(&self, key: &K, value: V, remaining_ttl: Duration) -> LayerResult<()> {
        self.set(key, value, remaining_ttl).await
    }

    /// Remove `key` from this tier. Returns whether a live entry was
    /// removed.
    async fn remove(&self, key: &K) -> LayerResult<bool>;
}
