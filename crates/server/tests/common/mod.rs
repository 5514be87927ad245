//! Common test harness for handler-level tests.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use bytes::Bytes;
use image::DynamicImage;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use thumbwell_coordinator::{MemoryStore, RenderCoordinator};
use thumbwell_core::config::AppConfig;
use thumbwell_core::paths::Zone;
use thumbwell_server::repo::{LocalRepo, PermissionOracle, source_key, thumb_key};
use thumbwell_server::{AppState, create_router};
use thumbwell_storage::BlobStore;
use thumbwell_storage::backends::FilesystemBackend;
use tower::util::ServiceExt;

pub struct TestServer {
    _temp: TempDir,
    pub storage: Arc<dyn BlobStore>,
    pub app: Router,
}

pub struct AllowNone;

impl PermissionOracle for AllowNone {
    fn can_read(&self, _file_name: &str) -> bool {
        false
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(mutate, Arc::new(thumbwell_server::repo::AllowAll)).await
    }

    pub async fn with_oracle(oracle: Arc<dyn PermissionOracle>) -> Self {
        Self::build(|config| config.repo.world_readable = false, oracle).await
    }

    async fn build(
        mutate: impl FnOnce(&mut AppConfig),
        oracle: Arc<dyn PermissionOracle>,
    ) -> Self {
        let temp = TempDir::new().expect("tempdir");
        let mut config = AppConfig::for_testing(temp.path());
        mutate(&mut config);

        let storage: Arc<dyn BlobStore> = Arc::new(
            FilesystemBackend::new(temp.path())
                .await
                .expect("create storage"),
        );
        let coordinator = Arc::new(RenderCoordinator::new(
            Arc::new(MemoryStore::new()),
            config.coordinator.clone(),
        ));
        let repo = Arc::new(LocalRepo::new(storage.clone(), config.repo.clone()));
        let state = AppState::new(config, storage.clone(), repo, oracle, coordinator);
        let app = create_router(state);

        Self {
            _temp: temp,
            storage,
            app,
        }
    }

    /// Seed a real PNG source in the public zone; returns its bytes.
    pub async fn seed_png(&self, name: &str, width: u32, height: u32) -> Bytes {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("encode fixture");
        let bytes = Bytes::from(buffer.into_inner());
        self.storage
            .put(&source_key(Zone::Public, name, 2), bytes.clone())
            .await
            .expect("seed source");
        bytes
    }

    /// Seed raw bytes plus a metadata sidecar document.
    pub async fn seed_with_sidecar(
        &self,
        name: &str,
        bytes: &[u8],
        metadata: &thumbwell_core::SourceMetadata,
    ) {
        let key = source_key(Zone::Public, name, 2);
        self.storage
            .put(&key, Bytes::copy_from_slice(bytes))
            .await
            .expect("seed source");
        self.storage
            .put(
                &format!("{key}.json"),
                Bytes::from(serde_json::to_vec(metadata).expect("encode sidecar")),
            )
            .await
            .expect("seed sidecar");
    }

    /// Blob-store key of a public-zone thumbnail.
    pub fn thumb_key(&self, name: &str, thumb_name: &str) -> String {
        thumb_key(Zone::Public, name, 2, thumb_name)
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("infallible service")
    }
}

/// Collect a response body into bytes.
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
        .await
        .expect("read body")
}
