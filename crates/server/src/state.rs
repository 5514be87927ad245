//! Application state shared across handlers.

use crate::ratelimit::RenderLimiter;
use crate::repo::{PermissionOracle, SourceRepository};
use std::sync::Arc;
use thumbwell_coordinator::RenderCoordinator;
use thumbwell_core::config::AppConfig;
use thumbwell_scaler::{BackendKind, ScalerBackend, build_backend, select_backend};
use thumbwell_storage::BlobStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob store holding sources and rendered thumbnails.
    pub storage: Arc<dyn BlobStore>,
    /// Source repository.
    pub repo: Arc<dyn SourceRepository>,
    /// May-read oracle.
    pub permissions: Arc<dyn PermissionOracle>,
    /// Stampede guard and failure limiter.
    pub coordinator: Arc<RenderCoordinator>,
    /// The selected scaling engine.
    pub backend: Arc<dyn ScalerBackend>,
    pub backend_kind: BackendKind,
    /// Render rate limiter.
    pub limiter: Arc<RenderLimiter>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Validates configuration, logging warnings for odd settings.
    ///
    /// # Panics
    ///
    /// Panics if the scaler or rate-limit configuration is invalid;
    /// there is no point serving with a broken render setup.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        repo: Arc<dyn SourceRepository>,
        permissions: Arc<dyn PermissionOracle>,
        coordinator: Arc<RenderCoordinator>,
    ) -> Self {
        match config.scaler.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {}", warning);
                }
            }
            Err(error) => panic!("Invalid scaler configuration: {error}"),
        }
        match config.rate_limit.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {}", warning);
                }
            }
            Err(error) => panic!("Invalid rate limit configuration: {error}"),
        }

        // A server-side destination path is always available here; the
        // no-destination arm of the selector is for embedders.
        let backend_kind = select_backend(true, &config.scaler);
        let backend = build_backend(backend_kind, &config.scaler);
        let limiter = Arc::new(RenderLimiter::new(&config.rate_limit));

        Self {
            config: Arc::new(config),
            storage,
            repo,
            permissions,
            coordinator,
            backend,
            backend_kind,
            limiter,
        }
    }

    /// Whether this MIME type renders in the expensive pool.
    pub fn is_expensive(&self, mime: &str) -> bool {
        self.config
            .scaler
            .expensive_types
            .iter()
            .any(|t| t == mime)
    }
}
