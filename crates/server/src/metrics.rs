//! Prometheus metrics for the thumbnail server.
//!
//! The `/metrics` endpoint is unauthenticated for scraping; restrict it
//! to scraper IPs at the infrastructure level when enabled.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RENDERS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "thumbwell_renders_total",
            "Thumbnail renders attempted, by backend",
        ),
        &["backend"],
    )
    .expect("metric creation failed")
});

pub static RENDER_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "thumbwell_render_errors_total",
            "Thumbnail requests that ended in an error, by error code",
        ),
        &["code"],
    )
    .expect("metric creation failed")
});

pub static CACHE_HITS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "thumbwell_cache_hits_total",
        "Requests served from an already-rendered thumbnail",
    )
    .expect("metric creation failed")
});

pub static STAMPEDE_ADOPTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "thumbwell_stampede_adoptions_total",
        "Requests that adopted a concurrent winner's render instead of rendering",
    )
    .expect("metric creation failed")
});

pub static RENDER_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(HistogramOpts::new(
        "thumbwell_render_seconds",
        "Wall-clock time of backend render calls",
    ))
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Idempotent.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let registry = &*REGISTRY;
        registry
            .register(Box::new(RENDERS_TOTAL.clone()))
            .expect("register renders_total");
        registry
            .register(Box::new(RENDER_ERRORS_TOTAL.clone()))
            .expect("register render_errors_total");
        registry
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("register cache_hits_total");
        registry
            .register(Box::new(STAMPEDE_ADOPTIONS_TOTAL.clone()))
            .expect("register stampede_adoptions_total");
        registry
            .register(Box::new(RENDER_SECONDS.clone()))
            .expect("register render_seconds");
    });
}

/// GET /metrics - Prometheus exposition format.
pub async fn metrics_handler() -> impl IntoResponse {
    register_metrics();

    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
