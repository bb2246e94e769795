//! Cache error types
//!
//! Every backing-store fault collapses into [`CacheError::Store`]. The guard adds
//! its own policy failures (`WaitTimeout`, `LockDenied`) and wraps failures raised
//! by the caller's compute callback.

use std::time::Duration;
use thiserror::Error;

/// Boxed error accepted from compute callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Any failure from the backing store: connection, protocol, or (de)serialization
    #[error("Cache store error during {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    /// Waited longer than the configured bound for another holder to fill the key
    #[error("Timed out after {waited:?} waiting for cache fill of '{key}'")]
    WaitTimeout { key: String, waited: Duration },

    /// Fail-fast policy found the fill lock already held
    #[error("Cache fill lock for '{key}' is held by another caller")]
    LockDenied { key: String },

    /// The compute callback failed; the fill lock was released before returning
    #[error("Cache compute for '{key}' failed: {source}")]
    Compute {
        key: String,
        #[source]
        source: BoxError,
    },

    /// A payload collided with the reserved negative marker
    #[error("Refusing to cache reserved negative marker as a real value for '{key}'")]
    ReservedValue { key: String },
}

impl CacheError {
    /// Build a store error for the named operation
    pub fn store(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            operation,
            message: err.to_string(),
        }
    }

    /// True for faults raised by the backing store
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store { .. })
    }

    /// True for the two lock-contention outcomes
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. } | Self::LockDenied { .. })
    }

    /// Contention failures can be retried or degraded by the caller; store,
    /// compute and reserved-value failures need attention first.
    pub fn is_recoverable(&self) -> bool {
        self.is_timeout()
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
