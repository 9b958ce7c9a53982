//! Error types for cache backend operations.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur during cache backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend cannot be reached.
    ///
    /// Callers must treat this as "the cache holds nothing usable",
    /// never as a successful miss that may be repopulated and trusted.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A counter key holds a value that is not a decimal integer.
    #[error("counter corrupt at key {key}: {message}")]
    CounterCorrupt {
        /// The counter key.
        key: String,
        /// Description of the corruption.
        message: String,
    },

    /// The key exceeds the backend's key length limit.
    #[error("key too long: {len} bytes (limit {limit})")]
    KeyTooLong {
        /// Length of the rejected key.
        len: usize,
        /// The backend's limit.
        limit: usize,
    },
}

impl BackendError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a counter corruption error.
    pub fn counter_corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CounterCorrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}
