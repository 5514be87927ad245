//! The thumbnail streaming pipeline.
//!
//! Entry points: [`thumb_query`] for explicit query parameters and
//! [`thumb_fallback`] for zone-relative paths recovered by the
//! not-found route. Both funnel into [`stream_thumb`], which mirrors
//! the request lifecycle end to end: permission gate, source
//! resolution, conditional requests, redirects, cache fast path, rate
//! limits, coordinated render, stream.

use crate::error::{ThumbError, ThumbResult, renderer_identity};
use crate::handlers::common::{content_disposition, expires_in, http_date, parse_http_date, vary_value};
use crate::metrics;
use crate::render::RenderJob;
use crate::repo::{SourceFile, thumb_key, thumb_url};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{HeaderMap, Response, StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use thumbwell_coordinator::{CoordinatorError, RenderKey, RenderPool};
use thumbwell_core::params::{self, Normalized, TransformParams};
use thumbwell_core::paths::{self, FallbackPath, Zone, decode_rel};
use thumbwell_core::request::ThumbRequest;
use thumbwell_core::thumb_name;
use tracing::debug;

/// Expiry hint on moved-source (302) redirects.
const MOVED_EXPIRY_SECS: i64 = 12 * 3600;
/// Expiry hint on canonical-name (301) redirects.
const CANONICAL_EXPIRY_SECS: i64 = 7 * 86400;
/// Cache lifetime for successfully served thumbnails.
const THUMB_MAX_AGE_SECS: u64 = 30 * 86400;

/// GET /thumb?f=...&width=... - explicit parameter form.
pub async fn thumb_query(
    State(state): State<AppState>,
    req: Request,
) -> ThumbResult<axum::response::Response> {
    let Query(query) = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map_err(|e| ThumbError::MalformedRequest(e.to_string()))?;
    let mut request = ThumbRequest::from_query(&query)?;
    // Query-supplied rel404 arrives percent-encoded.
    if let Some(rel) = request.rel404.take() {
        request.rel404 = Some(decode_rel(&rel)?);
    }
    stream_thumb(&state, request, req.headers(), &client_id(&req))
        .await
        .inspect_err(count_error)
}

/// GET /thumb/{zone-relative path} - the not-found fallback form.
pub async fn thumb_fallback(
    State(state): State<AppState>,
    Path(rel): Path<String>,
    req: Request,
) -> ThumbResult<axum::response::Response> {
    let fallback = FallbackPath::parse(&rel, state.config.repo.hash_levels)?;
    let request = ThumbRequest::from_fallback(fallback);
    stream_thumb(&state, request, req.headers(), &client_id(&req))
        .await
        .inspect_err(count_error)
}

fn client_id(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn count_error(e: &ThumbError) {
    metrics::register_metrics();
    metrics::RENDER_ERRORS_TOTAL
        .with_label_values(&[e.code()])
        .inc();
}

/// Thumb-zone relative path a fallback request must have used for this
/// thumbnail name (temp thumbnails compare within their zone).
fn canonical_rel(zone: Zone, file_name: &str, levels: u8, thumb_name: &str) -> String {
    let rel = paths::thumb_rel(zone, file_name, levels, thumb_name);
    match zone {
        Zone::Temp => rel.trim_start_matches("temp/").to_string(),
        _ => rel,
    }
}

/// Stream a thumbnail for a resolved request.
async fn stream_thumb(
    state: &AppState,
    mut request: ThumbRequest,
    headers: &HeaderMap,
    client: &str,
) -> ThumbResult<axum::response::Response> {
    metrics::register_metrics();
    request.resolve_thumb_name()?;

    // Permission gate. When the repository is not world readable,
    // responses become private and vary on Cookie.
    let private = if state.config.repo.world_readable {
        false
    } else if state.permissions.can_read(&request.file_name) {
        true
    } else {
        return Err(ThumbError::PermissionDenied);
    };
    let vary = vary_value(private, false);
    let redirect_vary = vary_value(private, state.config.server.vary_on_forwarded_proto);

    let levels = state.config.repo.hash_levels;
    let Some(source) = state.repo.resolve(request.zone, &request.file_name).await? else {
        // The name may be a redirect left behind by a rename; send the
        // client to the new name's thumbnail.
        if request.zone == Zone::Public
            && let Some(target) = state.repo.redirect_target(&request.file_name).await
            && let Some(target_file) = state.repo.resolve(Zone::Public, &target).await?
        {
            let name = redirect_thumb_name(state, &target_file, &request)?;
            let location = thumb_url(Zone::Public, &target_file.name, levels, &name);
            debug!(from = %request.file_name, to = %target_file.name, "moved-source redirect");
            return Ok(redirect(
                StatusCode::FOUND,
                &location,
                MOVED_EXPIRY_SECS,
                redirect_vary.as_deref(),
            ));
        }
        return Err(ThumbError::NotFound(format!(
            "The source file '{}' does not exist.",
            request.file_name
        )));
    };

    // Conditional request against the source timestamp; clients may
    // keep a cached thumb even after the server re-rendered it.
    if let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        && source.metadata.uploaded_at <= since
    {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        return Ok(response);
    }

    let caps = state.backend_kind.caps();
    let limits = thumbwell_core::ScalingLimits {
        max_image_area: state.config.scaler.max_image_area,
    };
    let params = match params::normalise(&source.metadata, &request.raw, caps, limits)? {
        Normalized::ServeOriginal => {
            // The request reduces to the unscaled source; no backend,
            // no cache entry.
            let bytes = state.storage.get(&source.storage_key).await?;
            return Ok(serve_bytes(bytes, &source, &request, private, vary.as_deref()));
        }
        Normalized::Render(params) => params,
    };

    let name = params.thumb_name(&source.name);

    // Fallback-routed requests must have used the canonical relative
    // path, or caches would hold thumbs that never get purged with
    // their source. The legacy long form gets redirected permanently.
    if let Some(rel) = &request.rel404 {
        let expected = canonical_rel(request.zone, &source.name, levels, &name);
        if *rel != expected {
            let long = params.thumb_name_long(source.metadata.media_type.is_lossy(), &source.name);
            if *rel == canonical_rel(request.zone, &source.name, levels, &long) {
                let location = thumb_url(request.zone, &source.name, levels, &name);
                return Ok(redirect(
                    StatusCode::MOVED_PERMANENTLY,
                    &location,
                    CANONICAL_EXPIRY_SECS,
                    redirect_vary.as_deref(),
                ));
            }
            return Err(ThumbError::NotFound(format!(
                "The given path of the specified thumbnail is incorrect; \
                 expected '{expected}' but got '{rel}'."
            )));
        }
    }

    // Serve an already-rendered thumbnail without touching the limiter
    // or the coordinator.
    let key = thumb_key(request.zone, &source.name, levels, &name);
    if state.storage.exists(&key).await? {
        metrics::CACHE_HITS_TOTAL.inc();
        return stream_cached(state, &key, &source, &request, private, vary.as_deref()).await;
    }

    // Render throttles. Non-standard sizes burn the tight bucket first.
    let standard = params::is_standard(
        &params,
        &source.metadata,
        &state.config.repo.thumb_limits,
        &state.config.repo.image_limits,
    );
    if !standard && !state.limiter.check_nonstandard(client) {
        return Err(ThumbError::RateLimited);
    }
    if !state.limiter.check_render(client) {
        return Err(ThumbError::RateLimited);
    }

    let rendered = render_coordinated(state, &source, &params, &name, &key, &request).await?;
    Ok(serve_bytes(rendered, &source, &request, private, vary.as_deref()))
}

/// Thumbnail name to redirect to when the source was renamed; uses the
/// target's own normalization so the redirect lands on a canonical URL.
fn redirect_thumb_name(
    state: &AppState,
    target: &SourceFile,
    request: &ThumbRequest,
) -> ThumbResult<String> {
    let caps = state.backend_kind.caps();
    let limits = thumbwell_core::ScalingLimits {
        max_image_area: state.config.scaler.max_image_area,
    };
    Ok(
        match params::normalise(&target.metadata, &request.raw, caps, limits)? {
            Normalized::Render(p) => p.thumb_name(&target.name),
            Normalized::ServeOriginal => {
                let width = request
                    .raw
                    .width
                    .unwrap_or(target.metadata.width)
                    .min(target.metadata.width);
                thumb_name::build(width, request.raw.page, &target.name)
            }
        },
    )
}

async fn render_coordinated(
    state: &AppState,
    source: &SourceFile,
    params: &TransformParams,
    name: &str,
    key: &str,
    request: &ThumbRequest,
) -> ThumbResult<Bytes> {
    let render_key = RenderKey::new(
        state.repo.name(),
        source.metadata.content_hash,
        name,
    );
    let pool = if state.is_expensive(source.metadata.media_type.mime()) {
        RenderPool::Expensive
    } else {
        RenderPool::Standard
    };

    let job = RenderJob {
        storage: state.storage.clone(),
        backend: state.backend.clone(),
        source_key: source.storage_key.clone(),
        thumb_key: key.to_string(),
        file_name: request.file_name.clone(),
        thumb_name: name.to_string(),
        source: source.metadata.clone(),
        params: params.clone(),
    };

    metrics::RENDERS_TOTAL
        .with_label_values(&[state.backend_kind.name()])
        .inc();

    state
        .coordinator
        .execute(&render_key, pool, &job)
        .await
        .map_err(|e| match e {
            CoordinatorError::FailureLimit(limit) => ThumbError::FailureLimitExceeded(limit),
            CoordinatorError::WaitTimeout => {
                ThumbError::Busy("timed out waiting for a concurrent render".to_string())
            }
            CoordinatorError::PoolFull => {
                ThumbError::Busy("render pool is at capacity".to_string())
            }
            CoordinatorError::Store(e) => ThumbError::Internal(e.to_string()),
            CoordinatorError::Work(e) => e,
        })
}

fn cache_control(private: bool) -> String {
    if private {
        "private".to_string()
    } else {
        format!("public, max-age={THUMB_MAX_AGE_SECS}")
    }
}

fn base_headers(
    response: &mut Response<Body>,
    source: &SourceFile,
    request: &ThumbRequest,
    private: bool,
    vary: Option<&str>,
) {
    let headers = response.headers_mut();
    if let Ok(value) = source.metadata.media_type.mime().parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = content_disposition(request.download, &source.name).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = cache_control(private).parse() {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Some(vary) = vary
        && let Ok(value) = vary.parse()
    {
        headers.insert(header::VARY, value);
    }
    if let Some(host) = renderer_identity()
        && let Ok(value) = host.parse()
    {
        headers.insert("x-thumbwell-renderer", value);
    }
}

/// Respond with in-memory bytes (fresh render or passthrough source).
fn serve_bytes(
    bytes: Bytes,
    source: &SourceFile,
    request: &ThumbRequest,
    private: bool,
    vary: Option<&str>,
) -> axum::response::Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    base_headers(&mut response, source, request, private, vary);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, len.into());
    if let Ok(value) = http_date(time::OffsetDateTime::now_utc()).parse() {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

/// Stream an existing thumbnail straight from the blob store.
async fn stream_cached(
    state: &AppState,
    key: &str,
    source: &SourceFile,
    request: &ThumbRequest,
    private: bool,
    vary: Option<&str>,
) -> ThumbResult<axum::response::Response> {
    let meta = state.storage.head(key).await?;
    let stream = state.storage.get_stream(key).await?;

    let mut response = Response::new(Body::from_stream(stream));
    base_headers(&mut response, source, request, private, vary);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, meta.size.into());
    if let Some(modified) = meta.last_modified
        && let Ok(value) = http_date(modified).parse()
    {
        headers.insert(header::LAST_MODIFIED, value);
    }
    Ok(response)
}

fn redirect(
    status: StatusCode,
    location: &str,
    expires_secs: i64,
    vary: Option<&str>,
) -> axum::response::Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    if let Ok(value) = location.parse() {
        headers.insert(header::LOCATION, value);
    }
    if let Ok(value) = expires_in(expires_secs).parse() {
        headers.insert(header::EXPIRES, value);
    }
    if let Some(vary) = vary
        && let Ok(value) = vary.parse()
    {
        headers.insert(header::VARY, value);
    }
    response.into_response()
}
