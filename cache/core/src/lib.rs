//! Core cache tiers and the tier contract.
//!
//! This crate provides the building blocks of the tiered cache:
//!
//! - [`CacheLayer`]: the contract every storage tier implements
//! - [`CacheItem`]: a value paired with its expiry deadline
//! - [`MemoryCache`]: a concurrent TTL map with a periodic expiry sweep
//! - [`TinyLfuCache`]: the same map gated by a W-TinyLFU admission
//!   policy with sampled least-frequent eviction
//! - [`CountMinSketch`] and [`BloomFilter`]: the probabilistic
//!   structures behind the admission policy
//!
//! # Example
//!
//! ```ignore
//! use cascade_core::{TinyLfuCache, TinyLfuConfig};
//! use std::time::Duration;
//!
//! let cache = TinyLfuCache::with_config(TinyLfuConfig::with_max_size(10_000));
//! cache.insert("user:1", profile, Duration::from_secs(300));
//! if let Some(hit) = cache.get(&"user:1") {
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bloom;
mod counters;
mod error;
mod item;
mod layer;
mod memory;
mod sketch;
mod tinylfu;

pub use bloom::BloomFilter;
pub use counters::{CounterSnapshot, LayerCounters};
pub use error::{LayerError, LayerResult};
pub use item::CacheItem;
pub use layer::CacheLayer;
pub use memory::{MemoryCache, MemoryCacheConfig};
pub use sketch::CountMinSketch;
pub use tinylfu::{TinyLfuCache, TinyLfuConfig};
