//! Single-flight coalescing of concurrent miss-loads.
//!
//! Each missing key gets one shared lazy load; every concurrent caller
//! awaits a clone of the same future and observes the same outcome.
//! The entry is removed when the load completes, whatever the result,
//! so a failed load is retried by the next request rather than cached.

use crate::error::CacheError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::hash::Hash;

/// A load future shared between all callers waiting on one key.
pub(crate) type SharedLoad<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// Concurrent map of in-flight loads, one entry per missing key.
pub(crate) struct InflightMap<K, V> {
    map: DashMap<K, SharedLoad<V>>,
}

impl<K, V> InflightMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Return the in-flight load for `key`, installing the future built
    /// by `make` if there is none. The get-or-create is atomic: exactly
    /// one caller's `make` runs per generation of the entry.
    pub(crate) fn get_or_insert_with<F>(&self, key: &K, make: F) -> SharedLoad<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, CacheError>>,
    {
        match self.map.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let shared = make().shared();
                entry.insert(shared.clone());
                shared
            }
        }
    }

    /// Drop the entry for `key`. Called by the load itself on
    /// completion; callers already holding a clone are unaffected.
    pub(crate) fn remove(&self, key: &K) {
        self.map.remove(key);
    }

    /// Keys with a load currently in flight.
    pub(crate) fn keys(&self) -> Vec<K> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }
}
