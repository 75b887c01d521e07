//! The remote key/value tier.
//!
//! Adapts a [`RemoteStore`] to the [`CacheLayer`] contract: keys travel
//! as their `Display` form, values through the injected codec, and
//! every store call is wrapped in a bounded retry inside a circuit
//! breaker. When the breaker is open or retries are exhausted the tier
//! reports itself unavailable and the manager moves on.

use crate::breaker::CircuitBreaker;
use crate::codec::ValueCodec;
use crate::error::RemoteError;
use crate::store::RemoteStore;
use async_trait::async_trait;
use cascade_core::{CacheLayer, LayerError, LayerResult};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for [`RemoteLayer`].
#[derive(Debug, Clone)]
pub struct RemoteLayerConfig {
    /// Tier name used in logs and metrics.
    pub name: String,
    /// Total attempts per operation (first try included).
    pub retry_count: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Consecutive failed operations before the circuit opens.
    pub breaker_failures: u32,
    /// How long the circuit stays open before admitting a probe.
    pub breaker_cooldown: Duration,
    /// Optional namespace prepended to every key ("app:" -> "app:42").
    pub key_prefix: Option<String>,
}

impl Default for RemoteLayerConfig {
    fn default() -> Self {
        Self {
            name: "remote".to_string(),
            retry_count: 3,
            retry_delay: Duration::from_millis(50),
            breaker_failures: 5,
            breaker_cooldown: Duration::from_secs(30),
            key_prefix: None,
        }
    }
}

/// [`CacheLayer`] over a network key/value store.
pub struct RemoteLayer<S, C> {
    store: S,
    codec: C,
    breaker: CircuitBreaker,
    config: RemoteLayerConfig,
}

impl<S, C> RemoteLayer<S, C> {
    /// Wrap `store`, serializing values through `codec`.
    pub fn new(store: S, codec: C, config: RemoteLayerConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker_failures, config.breaker_cooldown);
        Self {
            store,
            codec,
            breaker,
            config,
        }
    }

    /// The breaker, exposed for diagnostics.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn storage_key(&self, key: &impl Display) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    /// Run `call` under the breaker with bounded retries on transient
    /// errors. Records exactly one breaker outcome per operation.
    async fn guarded<T, F, Fut>(&self, op: &'static str, mut call: F) -> LayerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        if !self.breaker.allow() {
            return Err(LayerError::unavailable("circuit open"));
        }

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match call().await {
                Ok(value) => break Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.retry_count => {
                    debug!(
                        layer = %self.config.name,
                        op,
                        attempt,
                        error = %e,
                        "remote call failed; retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(layer = %self.config.name, op, error = %e, "remote call gave up");
                Err(LayerError::unavailable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl<K, V, S, C> CacheLayer<K, V> for RemoteLayer<S, C>
where
    K: Display + Send + Sync,
    V: Send + Sync + 'static,
    S: RemoteStore,
    C: ValueCodec<V>,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn try_get(&self, key: &K) -> LayerResult<Option<V>> {
        let key = self.storage_key(key);
        let bytes = self.guarded("get", || self.store.get(&key)).await?;
        match bytes {
            Some(bytes) => {
                let value = self
                    .codec
                    .decode(&bytes)
                    .map_err(|e| LayerError::Codec(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &K, value: V, ttl: Duration) -> LayerResult<()> {
        let key = self.storage_key(key);
        let bytes = self
            .codec
            .encode(&value)
            .map_err(|e| LayerError::Codec(e.to_string()))?;
        self.guarded("set", || self.store.set(&key, bytes.clone(), ttl))
            .await
    }

    async fn remove(&self, key: &K) -> LayerResult<bool> {
        let key = self.storage_key(key);
        self.guarded("remove", || self.store.remove(&key)).await
    }
}
