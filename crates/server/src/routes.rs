//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        // Explicit parameter form
        .route("/thumb", get(handlers::thumb_query))
        // Zone-relative path form, as recovered by not-found rewrites
        .route("/thumb/{*rel}", get(handlers::thumb_fallback))
        // Health check (intentionally unauthenticated for probes)
        .route("/healthz", get(handlers::health_check));

    // SECURITY: when enabled, network-restrict /metrics to authorized
    // scraper IPs; it exposes aggregate render activity.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
