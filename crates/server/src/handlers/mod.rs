//! HTTP request handlers.

pub mod common;
pub mod thumb;

pub use thumb::{thumb_fallback, thumb_query};

use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Health check, intentionally unauthenticated for load balancers.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
