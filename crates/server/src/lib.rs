//! HTTP thumbnail rendering and delivery server.
//!
//! This crate provides the HTTP surface:
//! - Thumbnail requests via query parameters or 404-recovered paths
//! - Response streaming with caching headers
//! - Canonical-name (301) and moved-source (302) redirects
//! - Conditional requests (If-Modified-Since)
//! - Render rate limiting and Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ratelimit;
pub mod render;
pub mod repo;
pub mod routes;
pub mod state;

pub use error::ThumbError;
pub use ratelimit::RenderLimiter;
pub use routes::create_router;
pub use state::AppState;
