//! Contract for the backing network key/value store.

use crate::error::RemoteError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// The narrow interface the remote tier needs from its network store.
///
/// A concrete client (Redis, memcached, a company-internal KV service)
/// is adapted to this trait outside this crate; the tier itself only
/// speaks string keys and opaque byte values.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError>;

    /// Store `value` under `key` with the given time-to-live.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), RemoteError>;

    /// Remove `key`. Returns whether a value was present.
    async fn remove(&self, key: &str) -> Result<bool, RemoteError>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), RemoteError> {
        (**self).set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<bool, RemoteError> {
        (**self).remove(key).await
    }
}
