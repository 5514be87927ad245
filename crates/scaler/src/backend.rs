//! Backend contract and selection.

use crate::adapters::{ClientScaler, CustomScaler, MagickScaler, RasterScaler, SimdScaler};
use crate::error::{RenderError, RenderResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thumbwell_core::config::ScalerConfig;
use thumbwell_core::params::{ScalerCaps, TransformParams};
use thumbwell_core::source::SourceMetadata;

/// The closed set of scaling engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// No server-side scaling; the client gets the source.
    Client,
    /// ImageMagick convert subprocess.
    Magick,
    /// Operator-supplied external command template.
    Custom,
    /// In-process raster library (`image` crate).
    Raster,
    /// In-process SIMD resize library.
    Simd,
}

impl BackendKind {
    /// Whether this engine can rotate. A static capability of the kind,
    /// never of the image.
    pub fn supports_rotation(self) -> bool {
        matches!(self, Self::Magick | Self::Raster | Self::Simd)
    }

    /// Whether this engine downsizes JPEG without a full in-memory
    /// decode, which lifts the pixel-area ceiling for JPEG sources.
    pub fn streams_large_jpeg(self) -> bool {
        matches!(self, Self::Magick)
    }

    /// Capability summary consumed by the parameter normalizer.
    pub fn caps(self) -> ScalerCaps {
        ScalerCaps {
            can_rotate: self.supports_rotation(),
            streams_large_jpeg: self.streams_large_jpeg(),
        }
    }

    /// Static name for logging and metrics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Magick => "magick",
            Self::Custom => "custom",
            Self::Raster => "raster",
            Self::Simd => "simd",
        }
    }
}

/// Pick the engine for a render attempt. Pure decision table over the
/// configuration; no image inspection.
pub fn select_backend(dest_available: bool, config: &ScalerConfig) -> BackendKind {
    if !dest_available || !config.enabled {
        BackendKind::Client
    } else if config.use_magick {
        BackendKind::Magick
    } else if config.custom_command.is_some() {
        BackendKind::Custom
    } else if config.prefer_simd {
        BackendKind::Simd
    } else {
        // The raster library is compiled in, so there is always a
        // server-side engine once rendering is enabled at all.
        BackendKind::Raster
    }
}

/// One render attempt: a materialized source file, a destination path,
/// and the resolved parameters.
pub struct RenderRequest<'a> {
    pub source_path: &'a Path,
    pub dest_path: &'a Path,
    pub source: &'a SourceMetadata,
    pub params: &'a TransformParams,
    /// Free-text comment embedded in the output's metadata, if any.
    pub comment: Option<&'a str>,
}

/// What a successful render call produced.
#[derive(Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A derivative was written to the destination path.
    Rendered,
    /// No server-side work; serve the source bytes unmodified.
    SourcePassthrough,
}

/// One pluggable scaling engine.
#[async_trait]
pub trait ScalerBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Render the request. On `Rendered`, the destination file exists
    /// and is non-empty.
    async fn render(&self, req: &RenderRequest<'_>) -> RenderResult<RenderOutcome>;
}

/// Construct the adapter for a selected kind.
pub fn build_backend(kind: BackendKind, config: &ScalerConfig) -> Arc<dyn ScalerBackend> {
    match kind {
        BackendKind::Client => Arc::new(ClientScaler),
        BackendKind::Magick => Arc::new(MagickScaler::new(config)),
        BackendKind::Custom => Arc::new(CustomScaler::new(config)),
        BackendKind::Raster => Arc::new(RasterScaler::new(config)),
        BackendKind::Simd => Arc::new(SimdScaler::new(config)),
    }
}

/// Reject empty output after an apparently successful render, deleting
/// the bad artifact so it can never be cached.
pub(crate) async fn verify_output(dest: &Path) -> RenderResult<()> {
    let meta = tokio::fs::metadata(dest).await.map_err(|_| {
        RenderError::Internal(format!("no output produced at {}", dest.display()))
    })?;
    if meta.len() == 0 {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(RenderError::EmptyOutput);
    }
    Ok(())
}
