//! Tiered read-through cache manager.
//!
//! Composes an ordered stack of [`CacheLayer`](cascade_core::CacheLayer)
//! tiers (fastest first) behind one [`CacheManager`] that provides:
//!
//! - cross-tier lookup with hit promotion to faster tiers
//! - single-flight coalescing of concurrent misses
//! - pluggable write propagation ([`WriteThrough`] / [`WriteBehind`])
//! - pro-active background refresh of values nearing expiry
//! - TTL jitter against synchronized expiry storms
//! - per-key and aggregate telemetry ([`MetricsSnapshot`]), with an
//!   optional timing decorator ([`InstrumentedManager`])
//!
//! # Example
//!
//! ```ignore
//! use cascade_core::{MemoryCache, TinyLfuCache};
//! use cascade_manager::{CacheManager, LoadError, WriteThrough};
//! use std::time::Duration;
//!
//! let manager = CacheManager::builder()
//!     .layer(TinyLfuCache::new())
//!     .layer_arc(remote_layer)
//!     .loader(|key: String| async move { fetch_from_db(&key).await })
//!     .write_policy(WriteThrough::new(Duration::from_secs(300)))
//!     .build()?;
//!
//! let value = manager.get_or_add(&"user:1".to_string()).await?;
//! ```

#![warn(clippy::all)]

mod error;
mod events;
mod flight;
mod instrument;
mod loader;
mod manager;
mod refresh;
mod snapshot;
mod task;
mod write_policy;

pub use error::{BuildError, CacheError, LoadError, WriteError};
pub use events::CacheEvent;
pub use instrument::{
    InstrumentedManager, MetricsSink, OPERATIONS_TOTAL, OPERATION_LATENCY_MS,
};
pub use loader::{Loader, PersistentStore};
pub use manager::{CacheManager, CacheManagerBuilder, PromotionPolicy};
pub use snapshot::{KeyMetrics, MetricsSnapshot};
pub use write_policy::{WriteBehind, WritePolicy, WriteThrough, DEFAULT_TTL};
