//! Binary-level error type.

use thiserror::Error;

use crate::{cache::CacheError, config::LoadError, infra::error::InfraError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_errors_stay_transparent() {
        let err = AppError::from(CacheError::invalid_pattern("pattern must not be empty"));
        assert_eq!(err.to_string(), "invalid pattern: pattern must not be empty");
    }

    #[test]
    fn unexpected_carries_message() {
        let err = AppError::unexpected("soak task panicked");
        assert_eq!(err.to_string(), "unexpected error: soak task panicked");
    }
}
