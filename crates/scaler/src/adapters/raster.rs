//! In-process raster adapter built on the `image` crate.

use crate::backend::{BackendKind, RenderOutcome, RenderRequest, ScalerBackend};
use crate::error::{RenderError, RenderResult};
use crate::ops;
use async_trait::async_trait;
use std::path::PathBuf;
use thumbwell_core::config::ScalerConfig;
use thumbwell_core::params::{TransformParams, pre_rotation_dimensions};
use thumbwell_core::source::SourceMetadata;

/// Pure-Rust scaling: decode, Lanczos3 resize, optional sharpen,
/// quarter-turn rotation, re-encode. Animated GIF renders its first
/// frame only.
pub struct RasterScaler {
    jpeg_quality: u8,
    sharpen_threshold: f64,
    sharpen_parameter: String,
}

impl RasterScaler {
    pub fn new(config: &ScalerConfig) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality,
            sharpen_threshold: config.sharpen_reduction_threshold,
            sharpen_parameter: config.sharpen_parameter.clone(),
        }
    }
}

/// Owned copy of a render request for the blocking worker.
pub(crate) struct OwnedRequest {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub source: SourceMetadata,
    pub params: TransformParams,
}

impl OwnedRequest {
    pub fn from(req: &RenderRequest<'_>) -> Self {
        Self {
            source_path: req.source_path.to_path_buf(),
            dest_path: req.dest_path.to_path_buf(),
            source: req.source.clone(),
            params: req.params.clone(),
        }
    }
}

/// Run CPU-bound render work off the async runtime.
pub(crate) async fn run_blocking<F>(work: F) -> RenderResult<()>
where
    F: FnOnce() -> RenderResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RenderError::Internal(format!("render task panicked: {e}")))?
}

#[async_trait]
impl ScalerBackend for RasterScaler {
    fn kind(&self) -> BackendKind {
        BackendKind::Raster
    }

    async fn render(&self, req: &RenderRequest<'_>) -> RenderResult<RenderOutcome> {
        let owned = OwnedRequest::from(req);
        let quality = ops::lossy_quality(owned.params.quality, self.jpeg_quality);
        let threshold = self.sharpen_threshold;
        let parameter = self.sharpen_parameter.clone();

        run_blocking(move || {
            let img = ops::decode(&owned.source_path, &owned.source.media_type)?;
            let rotation = owned.source.rotation % 360;
            let (width, height) = pre_rotation_dimensions(&owned.params, rotation);
            let img = ops::resize(&img, width, height);
            let img = ops::maybe_sharpen(img, &owned.params, &owned.source, threshold, &parameter);
            let img = ops::rotate(img, rotation);
            ops::encode(&img, &owned.dest_path, &owned.source.media_type, quality)
        })
        .await?;

        Ok(RenderOutcome::Rendered)
    }
}
