//! Collaborator contracts: the loader and the persistent store.

use crate::error::{LoadError, WriteError};
use async_trait::async_trait;
use std::future::Future;

/// Produces the authoritative value for a key on a cache miss.
///
/// The manager retries failed loads with exponential backoff; a
/// [`LoadError::Terminal`] short-circuits the retries.
#[async_trait]
pub trait Loader<K, V>: Send + Sync {
    /// Load the value for `key` from the source of truth.
    async fn load(&self, key: &K) -> Result<V, LoadError>;
}

/// Async closures act as loaders, which keeps tests and simple callers
/// free of trait boilerplate.
#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for F
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
{
    async fn load(&self, key: &K) -> Result<V, LoadError> {
        (self)(key.clone()).await
    }
}

/// Writes a value to durable storage behind the cache.
#[async_trait]
pub trait PersistentStore<K, V>: Send + Sync {
    /// Persist `value` under `key`.
    async fn write(&self, key: &K, value: &V) -> Result<(), WriteError>;
}

/// Async closures act as persistent stores too.
#[async_trait]
impl<K, V, F, Fut> PersistentStore<K, V> for F
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(K, V) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), WriteError>> + Send + 'static,
{
    async fn write(&self, key: &K, value: &V) -> Result<(), WriteError> {
        (self)(key.clone(), value.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_is_a_loader() {
        let loader = |key: u32| async move { Ok::<_, LoadError>(key * 2) };
        let loader: &dyn Loader<u32, u32> = &loader;
        assert_eq!(loader.load(&21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn closure_is_a_persistent_store() {
        let store = |_key: u32, _value: String| async move { Ok::<_, WriteError>(()) };
        let store: &dyn PersistentStore<u32, String> = &store;
        store.write(&1, &"v".to_string()).await.unwrap();
    }
}
