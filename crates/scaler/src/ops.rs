//! Shared raster operations for the in-process adapters.
//!
//! Everything here is synchronous CPU work; adapters run it inside
//! `spawn_blocking`.

use crate::error::{RenderError, RenderResult};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thumbwell_core::params::{Quality, TransformParams};
use thumbwell_core::source::{MediaType, SourceMetadata};

/// Fixed quality used for `quality=low` requests.
pub const LOW_QUALITY: u8 = 30;

/// Resolve the output quality percentage for lossy formats.
pub fn lossy_quality(quality: Quality, configured: u8) -> u8 {
    match quality {
        Quality::Low => LOW_QUALITY,
        Quality::Default => configured,
    }
}

/// Decode a source file, or report it unsupported for in-process work.
///
/// Animated GIF decodes to its first frame; the in-process engines do
/// not re-assemble animations.
pub fn decode(path: &Path, media_type: &MediaType) -> RenderResult<DynamicImage> {
    if !matches!(
        media_type,
        MediaType::Jpeg | MediaType::Png | MediaType::Gif | MediaType::Webp
    ) {
        return Err(RenderError::UnsupportedFormat {
            mime: media_type.mime().to_string(),
        });
    }
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| RenderError::Internal(format!("decode failed: {e}")))
}

/// Scale to exact dimensions with Lanczos3 resampling.
pub fn resize(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
}

/// Apply an intrinsic clockwise rotation so the output displays
/// upright. Rotation happens after scaling.
pub fn rotate(img: DynamicImage, rotation: u16) -> DynamicImage {
    match rotation % 360 {
        90 => img.rotate270(),
        180 => img.rotate180(),
        270 => img.rotate90(),
        _ => img,
    }
}

/// Dimension-sum resize ratio used for the sharpening decision.
pub fn resize_ratio(params: &TransformParams, src: &SourceMetadata) -> f64 {
    f64::from(params.physical_width + params.physical_height)
        / f64::from(src.width + src.height)
}

/// The sigma component of a `radius x sigma` sharpen parameter.
pub fn sharpen_sigma(parameter: &str) -> f32 {
    parameter
        .split_once('x')
        .and_then(|(_, sigma)| sigma.parse().ok())
        .unwrap_or(0.4)
}

/// Sharpen heavy downscales of lossy sources; mild reductions are left
/// alone to avoid over-sharpening.
pub fn maybe_sharpen(
    img: DynamicImage,
    params: &TransformParams,
    src: &SourceMetadata,
    threshold: f64,
    parameter: &str,
) -> DynamicImage {
    if src.media_type == MediaType::Jpeg && resize_ratio(params, src) < threshold {
        img.unsharpen(sharpen_sigma(parameter), 0)
    } else {
        img
    }
}

/// Encode the rendered image at the destination path in the source's
/// format. Lossy formats take the quality percentage; lossless formats
/// use maximum compression.
pub fn encode(
    img: &DynamicImage,
    dest: &Path,
    media_type: &MediaType,
    quality: u8,
) -> RenderResult<()> {
    let file = File::create(dest)?;
    let mut writer = BufWriter::new(file);
    let result = match media_type {
        MediaType::Jpeg => {
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        }
        MediaType::Png => img.write_with_encoder(png::PngEncoder::new_with_quality(
            &mut writer,
            png::CompressionType::Best,
            png::FilterType::Adaptive,
        )),
        MediaType::Gif => img.write_to(&mut writer, ImageFormat::Gif),
        MediaType::Webp => {
            // The pure-Rust encoder is lossless only.
            img.write_with_encoder(WebPEncoder::new_lossless(&mut writer))
        }
        other => {
            return Err(RenderError::UnsupportedFormat {
                mime: other.mime().to_string(),
            });
        }
    };
    result.map_err(|e| RenderError::Internal(format!("encode failed: {e}")))
}
