//! Error types for the remote tier.

use thiserror::Error;

/// Errors returned by a [`RemoteStore`](crate::RemoteStore)
/// implementation.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The operation did not complete in time.
    #[error("remote operation timed out")]
    Timeout,

    /// The connection was dropped mid-operation.
    #[error("connection reset")]
    ConnectionReset,

    /// Other transport failure.
    #[error("remote i/o error: {0}")]
    Io(String),

    /// The store refused the operation (bad key, value too large, ...).
    /// Not retried.
    #[error("remote store rejected operation: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionReset | Self::Io(_) => true,
            Self::Rejected(_) => false,
        }
    }
}

/// Errors from encoding or decoding a cached value.
#[derive(Debug, Clone, Error)]
#[error("codec error: {0}")]
pub struct CodecError(
    /// Human-readable cause.
    pub String,
);

impl CodecError {
    /// Build a codec error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}
