//! Coordination store error types.

use thiserror::Error;

/// Errors from the shared coordination store.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for coordination store operations.
pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;
