//! Render error types.

use thiserror::Error;

/// Errors from a backend render attempt.
///
/// Three cases stay distinct because callers treat them differently: a
/// crashed external process, an internal failure inside the backend,
/// and a format the backend cannot handle. Unsupported formats are a
/// configuration-time concern and are never retried against a
/// different backend at runtime.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("backend exited with {status}: {stderr}")]
    ProcessFailed { status: i32, stderr: String },

    #[error("backend error: {0}")]
    Internal(String),

    #[error("unsupported format for this backend: {mime}")]
    UnsupportedFormat { mime: String },

    #[error("backend produced an empty output file")]
    EmptyOutput,

    #[error("cannot safely escape path: {0}")]
    UnsafePath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for render operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
