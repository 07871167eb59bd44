//! Error taxonomy for the cache core.

use std::time::Duration;

use thiserror::Error;

/// Failures a caller of the cache core can observe.
///
/// `LockTimeout` and `OperationCancelled` are non-fatal: the caller is expected to render
/// uncached (timeout) or stop (cancellation) rather than report a server error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("invalid pattern: {reason}")]
    InvalidPattern { reason: String },
    #[error("timed out after {timeout:?} waiting for population lock on `{key}`")]
    LockTimeout { key: String, timeout: Duration },
    #[error("wait for population lock on `{key}` was cancelled")]
    OperationCancelled { key: String },
    #[error("{component} has been disposed")]
    ObjectDisposed { component: &'static str },
}

impl CacheError {
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn invalid_pattern(reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            reason: reason.into(),
        }
    }

    /// Whether the caller may carry on without the cache (render uncached).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Failure of [`CacheService::populate_once`](super::CacheService::populate_once).
#[derive(Debug, Error)]
pub enum PopulateError<E> {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("population factory failed: {0}")]
    Factory(E),
}

impl<E> PopulateError<E> {
    /// Returns the cache error, if this failure came from the cache core.
    pub fn as_cache_error(&self) -> Option<&CacheError> {
        match self {
            Self::Cache(err) => Some(err),
            Self::Factory(_) => None,
        }
    }
}
