//! State manager error types.

use thiserror::Error;

/// Errors from shared-state operations.
///
/// Read paths swallow cache misses (they return empty values); errors here
/// are connectivity or serialization faults the caller should log.
#[derive(Debug, Error)]
pub enum StateError {
    /// Connecting to the external cache failed.
    #[error("cache connection failed: {0}")]
    ConnectionFailed(String),

    /// A cache command failed.
    #[error("cache command failed: {0}")]
    CommandFailed(String),

    /// A stored value did not deserialize.
    #[error("corrupt cache value at {key}: {detail}")]
    CorruptValue {
        /// The cache key.
        key: String,
        /// Parse failure detail.
        detail: String,
    },

    /// A broadcast payload did not serialize.
    #[error("broadcast encoding failed: {0}")]
    EncodingFailed(String),

    /// The backend is shut down.
    #[error("state manager closed")]
    Closed,
}

impl From<redis::RedisError> for StateError {
    fn from(error: redis::RedisError) -> Self {
        StateError::CommandFailed(error.to_string())
    }
}
