//! Remote key/value tier for the tiered cache.
//!
//! This crate adapts any network key/value store to the
//! [`CacheLayer`](cascade_core::CacheLayer) contract:
//!
//! - [`RemoteStore`]: the narrow client interface a concrete store
//!   (Redis, memcached, ...) is adapted to
//! - [`ValueCodec`]: injected serialization between values and bytes
//! - [`CircuitBreaker`]: fail-fast gate after repeated store failures
//! - [`RemoteLayer`]: the tier itself, wiring retry and breaker around
//!   every store call

#![warn(missing_docs)]
#![warn(clippy::all)]

mod breaker;
mod codec;
mod error;
mod layer;
mod store;

pub use breaker::{BreakerState, CircuitBreaker};
pub use codec::{BytesCodec, StringCodec, ValueCodec};
pub use error::{CodecError, RemoteError};
pub use layer::{RemoteLayer, RemoteLayerConfig};
pub use store::RemoteStore;
