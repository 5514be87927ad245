//! Handler-level tests for the thumbnail pipeline.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{AllowNone, TestServer, body_bytes};
use image::GenericImageView;
use std::sync::Arc;
use thumbwell_core::hash::ContentHash;
use thumbwell_core::paths::hash_fragment;
use thumbwell_core::source::{ColorType, MediaType, SourceMetadata};
use time::OffsetDateTime;

fn frag(name: &str) -> String {
    hash_fragment(name, 2)
}

#[tokio::test]
async fn renders_and_streams_thumbnail() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    let response = server.get("/thumb?f=Sunset.png&width=120").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "inline;filename*=UTF-8''Sunset.png"
    );

    let body = body_bytes(response).await;
    let img = image::load_from_memory(&body).expect("decode thumb");
    assert_eq!(img.dimensions(), (120, 60));

    // The derivative landed under its deterministic cache key.
    assert!(
        server
            .storage
            .exists(&server.thumb_key("Sunset.png", "120px-Sunset.png"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn legacy_aliases_fold_into_width() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    let response = server.get("/thumb?f=Sunset.png&w=120px").await;
    assert_eq!(response.status(), StatusCode::OK);
    let img = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!(img.dimensions(), (120, 60));
}

#[tokio::test]
async fn cached_thumbnail_is_served_verbatim() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    // Pre-populate the cache with marker bytes; a re-render would
    // produce something else entirely.
    let marker = b"marker-bytes-not-a-png".as_slice();
    server
        .storage
        .put(
            &server.thumb_key("Sunset.png", "120px-Sunset.png"),
            marker.into(),
        )
        .await
        .unwrap();

    let response = server.get("/thumb?f=Sunset.png&width=120").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), marker);
}

#[tokio::test]
async fn oversized_request_serves_original() {
    let server = TestServer::new().await;
    let original = server.seed_png("Sunset.png", 400, 200).await;

    let response = server.get("/thumb?f=Sunset.png&width=2000").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, original);

    // No derivative was cached for the no-op request.
    assert!(
        !server
            .storage
            .exists(&server.thumb_key("Sunset.png", "2000px-Sunset.png"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn if_modified_since_short_circuits() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    let request = Request::builder()
        .uri("/thumb?f=Sunset.png&width=120")
        .header(header::IF_MODIFIED_SINCE, "Fri, 01 Jan 2100 00:00:00 GMT")
        .body(Body::empty())
        .unwrap();
    let response = server.request(request).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn missing_source_is_not_found() {
    let server = TestServer::new().await;
    let response = server.get("/thumb?f=Nope.png&width=120").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_parameters_are_rejected() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    for uri in [
        "/thumb?width=120",                     // no file name
        "/thumb?f=Sunset.png&width=abc",        // non-numeric width
        "/thumb?f=Sunset.png&width=0",          // zero width
        "/thumb?f=Sunset.png",                  // no width at all
        "/thumb?f=Sunset.png&thumbName=bogus",  // unparseable thumb name
    ] {
        let response = server.get(uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {uri}");
    }
}

#[tokio::test]
async fn malformed_fallback_path_is_bad_request() {
    let server = TestServer::new().await;
    // Wrong hash depth: never reaches the normalizer.
    let response = server.get("/thumb/xx/yy/zz").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn fallback_canonical_path_renders() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    let uri = format!("/thumb/{}Sunset.png/120px-Sunset.png", frag("Sunset.png"));
    let response = server.get(&uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    let img = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!(img.dimensions(), (120, 60));
}

#[tokio::test]
async fn long_form_name_redirects_permanently() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    let uri = format!(
        "/thumb/{}Sunset.png/lossless-page1-120px-Sunset.png",
        frag("Sunset.png")
    );
    let response = server.get(&uri).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        &format!("/thumb/{}Sunset.png/120px-Sunset.png", frag("Sunset.png"))
    );
    assert!(response.headers().contains_key(header::EXPIRES));
}

#[tokio::test]
async fn mismatched_fallback_path_is_not_found() {
    let server = TestServer::new().await;
    server.seed_png("Sunset.png", 400, 200).await;

    let uri = format!("/thumb/{}Sunset.png/120px-Other.png", frag("Sunset.png"));
    let response = server.get(&uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains("120px-Sunset.png"), "names the expected path");
}

#[tokio::test]
async fn moved_source_redirects_temporarily() {
    let server = TestServer::with_config(|config| {
        config
            .repo
            .redirects
            .insert("Old.png".to_string(), "Sunset.png".to_string());
    })
    .await;
    server.seed_png("Sunset.png", 400, 200).await;

    let response = server.get("/thumb?f=Old.png&width=120").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        &format!("/thumb/{}Sunset.png/120px-Sunset.png", frag("Sunset.png"))
    );
    assert!(response.headers().contains_key(header::EXPIRES));
}

#[tokio::test]
async fn permission_denied_varies_on_cookie() {
    let server = TestServer::with_oracle(Arc::new(AllowNone)).await;
    server.seed_png("Sunset.png", 400, 200).await;

    let response = server.get("/thumb?f=Sunset.png&width=120").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers().get(header::VARY).unwrap(), "Cookie");
}

#[tokio::test]
async fn restricted_repo_serves_private_responses() {
    let server = TestServer::with_oracle(Arc::new(thumbwell_server::repo::AllowAll)).await;
    server.seed_png("Sunset.png", 400, 200).await;

    let response = server.get("/thumb?f=Sunset.png&width=120").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "private"
    );
    let vary = response.headers().get(header::VARY).unwrap();
    assert!(vary.to_str().unwrap().contains("Cookie"));
}

#[tokio::test]
async fn failure_limit_short_circuits_after_four_failures() {
    let server = TestServer::new().await;
    // The sidecar claims a format the in-process backend cannot touch,
    // so every render attempt fails.
    let metadata = SourceMetadata {
        width: 100,
        height: 100,
        media_type: MediaType::Xcf,
        content_hash: ContentHash::compute(b"layered"),
        rotation: 0,
        frame_count: 1,
        page_count: 1,
        color_type: ColorType::Normal,
        uploaded_at: OffsetDateTime::UNIX_EPOCH,
    };
    server
        .seed_with_sidecar("Layers.xcf", b"not really xcf", &metadata)
        .await;

    for _ in 0..4 {
        let response = server.get("/thumb?f=Layers.xcf&width=50").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(body.contains("cannot be scaled"), "unsupported-format body");
    }

    // The fifth request is refused without reaching any backend.
    let response = server.get("/thumb?f=Layers.xcf&width=50").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains("failed to render"), "failure-limit body: {body}");
}

#[tokio::test]
async fn health_check_is_open() {
    let server = TestServer::new().await;
    let response = server.get("/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
}
