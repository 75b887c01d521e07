//! Error types for the manager and its collaborators.
//!
//! These are `Clone` because a miss-load is shared between every caller
//! waiting on the same key; all of them observe the same failure.

use thiserror::Error;

/// Failure reported by a [`Loader`](crate::Loader).
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Worth retrying (timeout, transient backend hiccup).
    #[error("transient load failure: {0}")]
    Transient(String),

    /// Retrying cannot help (key does not exist, permanent backend
    /// rejection). Surfaced immediately without further attempts.
    #[error("terminal load failure: {0}")]
    Terminal(String),
}

impl LoadError {
    /// Build a transient error from any displayable cause.
    pub fn transient(cause: impl std::fmt::Display) -> Self {
        Self::Transient(cause.to_string())
    }

    /// Build a terminal error from any displayable cause.
    pub fn terminal(cause: impl std::fmt::Display) -> Self {
        Self::Terminal(cause.to_string())
    }

    /// Whether retrying is pointless.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Failure of a write-policy invocation.
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    /// The persistent store rejected the write. Fatal under
    /// write-through, because persistence is the source of truth.
    #[error("persistent store write failed: {0}")]
    Persistence(String),

    /// A persistent store is required but none was configured.
    #[error("no persistent store configured")]
    NoPersistentStore,
}

impl WriteError {
    /// Build a persistence error from any displayable cause.
    pub fn persistence(cause: impl std::fmt::Display) -> Self {
        Self::Persistence(cause.to_string())
    }
}

/// Construction-time misconfiguration of the manager.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The manager needs at least one tier.
    #[error("at least one cache layer is required")]
    NoLayers,

    /// The manager needs a loader for the miss path.
    #[error("a loader is required")]
    NoLoader,
}

/// Anything `get_or_add` can surface to the caller.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The loader failed after exhausting its retries.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The write policy failed to propagate the loaded value.
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(!LoadError::transient("timeout").is_terminal());
        assert!(LoadError::terminal("no such row").is_terminal());
    }

    #[test]
    fn errors_travel_through_cache_error() {
        let err: CacheError = LoadError::terminal("gone").into();
        assert_eq!(err.to_string(), "terminal load failure: gone");

        let err: CacheError = WriteError::persistence("disk full").into();
        assert_eq!(err.to_string(), "persistent store write failed: disk full");
    }
}
