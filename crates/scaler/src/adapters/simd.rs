//! SIMD resize adapter built on `fast_image_resize`.

use crate::adapters::raster::{OwnedRequest, run_blocking};
use crate::backend::{BackendKind, RenderOutcome, RenderRequest, ScalerBackend};
use crate::error::{RenderError, RenderResult};
use crate::ops;
use async_trait::async_trait;
use fast_image_resize as fir;
use image::DynamicImage;
use thumbwell_core::config::ScalerConfig;
use thumbwell_core::params::pre_rotation_dimensions;

/// Like [`super::RasterScaler`] but resizing through the SIMD-accelerated
/// native resize library: decode via `image`, convolve via `fir`,
/// re-encode via `image`. Same format coverage, same first-frame-only
/// animation behavior.
pub struct SimdScaler {
    jpeg_quality: u8,
    sharpen_threshold: f64,
    sharpen_parameter: String,
}

impl SimdScaler {
    pub fn new(config: &ScalerConfig) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality,
            sharpen_threshold: config.sharpen_reduction_threshold,
            sharpen_parameter: config.sharpen_parameter.clone(),
        }
    }
}

fn fir_resize(img: &DynamicImage, width: u32, height: u32) -> RenderResult<DynamicImage> {
    let rgba = img.to_rgba8();
    let (src_w, src_h) = rgba.dimensions();
    let src_image = fir::images::Image::from_vec_u8(
        src_w,
        src_h,
        rgba.into_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|e| RenderError::Internal(format!("source buffer: {e}")))?;

    let mut dst_image = fir::images::Image::new(width, height, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fir::ResizeOptions::new()
                .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3)),
        )
        .map_err(|e| RenderError::Internal(format!("resize: {e}")))?;

    let buffer = image::RgbaImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| RenderError::Internal("resized buffer has wrong length".to_string()))?;
    Ok(DynamicImage::ImageRgba8(buffer))
}

#[async_trait]
impl ScalerBackend for SimdScaler {
    fn kind(&self) -> BackendKind {
        BackendKind::Simd
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
            let img = fir_resize(&img, width, height)?;
            let img = ops::maybe_sharpen(img, &owned.params, &owned.source, threshold, &parameter);
            let img = ops::rotate(img, rotation);
            ops::encode(&img, &owned.dest_path, &owned.source.media_type, quality)
        })
        .await?;

        Ok(RenderOutcome::Rendered)
    }
}
