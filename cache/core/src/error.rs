//! Error types shared by every cache tier.

use thiserror::Error;

/// Errors surfaced by a cache tier.
///
/// Tier errors are recoverable from the manager's point of view: a failed
/// `try_get` falls through to the next tier and a failed `set` is logged
/// and dropped. Only the remote tier produces these in practice; the
/// in-memory tiers are infallible.
#[derive(Debug, Clone, Error)]
pub enum LayerError {
    /// The tier cannot serve requests right now (circuit open, retries
    /// exhausted, backing store gone).
    #[error("layer unavailable: {reason}")]
    Unavailable {
        /// Human-readable cause, for logs.
        reason: String,
    },

    /// Transport or storage failure inside the tier.
    #[error("layer i/o error: {0}")]
    Io(String),

    /// The stored bytes could not be decoded, or the value could not be
    /// encoded for storage.
    #[error("codec error: {0}")]
    Codec(String),
}

impl LayerError {
    /// Shorthand for a [`LayerError::Unavailable`] with the given reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Result alias for tier operations.
pub type LayerResult<T> = Result<T, LayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            LayerError::unavailable("circuit open").to_string(),
            "layer unavailable: circuit open"
        );
        assert_eq!(
            LayerError::Io("reset".into()).to_string(),
            "layer i/o error: reset"
        );
        assert_eq!(
            LayerError::Codec("bad utf-8".into()).to_string(),
            "codec error: bad utf-8"
        );
    }
}
