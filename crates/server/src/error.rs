//! Thumbnail error responses.
//!
//! Errors render as small HTML pages, uncacheable. Permission denials
//! vary on Cookie so caches never serve one user's denial to another.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::OnceLock;

/// Hostname advertised in the renderer-identity header, when enabled.
static RENDERER_IDENTITY: OnceLock<String> = OnceLock::new();

/// Enable the `X-Thumbwell-Renderer` header on every response this
/// process produces. Called once at startup when configured.
pub fn set_renderer_identity(host: impl Into<String>) {
    let _ = RENDERER_IDENTITY.set(host.into());
}

/// The advertised renderer identity, if enabled.
pub fn renderer_identity() -> Option<&'static str> {
    RENDERER_IDENTITY.get().map(String::as_str)
}

/// Thumbnail pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    #[error("the specified thumbnail parameters are not recognized: {0}")]
    MalformedRequest(String),

    #[error("access denied: you do not have permission to access the source file")]
    PermissionDenied,

    #[error("{0}")]
    NotFound(String),

    #[error("the image format cannot be scaled by the configured backend: {0}")]
    UnsupportedFormat(String),

    #[error("error generating thumbnail: {0}")]
    BackendFailure(String),

    #[error("this thumbnail has failed to render {0} times in a row; not retrying")]
    FailureLimitExceeded(u32),

    #[error("too many thumbnail renders; please retry later")]
    RateLimited,

    #[error("the rendering cluster is busy; please retry later")]
    Busy(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] thumbwell_storage::StorageError),

    #[error("{0}")]
    Core(#[from] thumbwell_core::Error),
}

impl ThumbError {
    /// Error code for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::BackendFailure(_) => "backend_failure",
            Self::FailureLimitExceeded(_) => "failure_limit_exceeded",
            Self::RateLimited => "rate_limited",
            Self::Busy(_) => "busy",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Core(_) => "core_error",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UnsupportedFormat(_)
            | Self::BackendFailure(_)
            | Self::FailureLimitExceeded(_)
            | Self::RateLimited
            | Self::Busy(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                thumbwell_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) => match e {
                thumbwell_core::Error::SourceTooLarge { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ThumbError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!(
            "<html><head><title>Error generating thumbnail</title></head>\n\
             <body>\n<h1>Error generating thumbnail</h1>\n<p>\n{}\n</p>\n</body>\n</html>\n",
            html_escape(&self.to_string())
        );

        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if status == StatusCode::FORBIDDEN {
            headers.insert(header::VARY, HeaderValue::from_static("Cookie"));
        }
        if let Some(host) = renderer_identity()
            && let Ok(value) = HeaderValue::from_str(host)
        {
            headers.insert("x-thumbwell-renderer", value);
        }
        response
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Result type for thumbnail handlers.
pub type ThumbResult<T> = std::result::Result<T, ThumbError>;
