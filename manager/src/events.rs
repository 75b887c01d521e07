//! Cache lifecycle events.

/// Notable events emitted by the manager, delivered over a broadcast
/// channel to any subscriber. Lagging subscribers lose events; the
/// manager never blocks on delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    /// A lookup was served from the tier at `layer`.
    Hit {
        /// The requested key.
        key: K,
        /// Index of the serving tier (0 = fastest).
        layer: usize,
    },
    /// Every tier missed; the loader is about to be consulted.
    Miss {
        /// The requested key.
        key: K,
    },
    /// A value found in a slower tier was copied into a faster one.
    Promotion {
        /// The promoted key.
        key: K,
        /// Index of the destination tier.
        layer: usize,
    },
    /// A background refresh replaced a value nearing expiry.
    EarlyRefresh {
        /// The refreshed key.
        key: K,
    },
}
