//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed parameters: {0}")]
    MalformedParams(String),

    #[error("invalid thumbnail name: {0}")]
    InvalidThumbName(String),

    #[error("invalid thumbnail path: {0}")]
    InvalidFallbackPath(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("source image too large: {width}x{height} exceeds {max_area} pixel area")]
    SourceTooLarge {
        width: u32,
        height: u32,
        max_area: u64,
    },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
