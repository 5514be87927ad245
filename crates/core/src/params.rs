//! Transform parameter normalization.
//!
//! The normalizer turns a raw parameter bag plus source metadata into a
//! fully resolved [`TransformParams`], or decides that no rendering work
//! is needed at all. It is a pure function: identical inputs always
//! produce identical outputs.
//!
//! Dimension rules:
//! - The physical render target preserves the source aspect ratio.
//! - Physical dimensions never exceed the source unless the file must
//!   render anyway (intrinsic rotation with a rotation-capable scaler).
//! - Sources above the configured pixel-area ceiling are refused,
//!   except JPEG under a backend that stream-decodes large JPEGs
//!   without a full in-memory decode.

use crate::error::{Error, Result};
use crate::source::{MediaType, SourceMetadata};
use serde::{Deserialize, Serialize};

/// Requested output quality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Default,
}

/// Raw transform parameters after alias folding, before normalization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub page: Option<u32>,
    pub quality: Quality,
}

/// Static capabilities of the selected scaler backend that the
/// normalizer needs to know about. Kept as plain booleans so this crate
/// stays independent of the backend implementations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalerCaps {
    /// Backend can rotate, so intrinsically rotated sources must render.
    pub can_rotate: bool,
    /// Backend downsizes JPEG without decoding the full image into
    /// memory, lifting the pixel-area ceiling for JPEG sources.
    pub streams_large_jpeg: bool,
}

/// Limits consulted during normalization.
#[derive(Clone, Copy, Debug)]
pub struct ScalingLimits {
    /// Maximum source pixel area (width × height) for in-memory decoding.
    pub max_image_area: u64,
}

/// Fully resolved transform parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformParams {
    /// Display width (what the requester asked for, bounded).
    pub client_width: u32,
    /// Display height derived from the client width.
    pub client_height: u32,
    /// Actual pixel width of the rendered output.
    pub physical_width: u32,
    /// Actual pixel height of the rendered output.
    pub physical_height: u32,
    /// Page number, clamped to the source's page range. 1-based.
    pub page: u32,
    pub quality: Quality,
}

impl TransformParams {
    /// Canonical thumbnail name for these parameters.
    pub fn thumb_name(&self, file_name: &str) -> String {
        crate::thumb_name::build(self.client_width, Some(self.page), file_name)
    }

    /// Legacy long-form thumbnail name, used only for recognizing old
    /// URLs and redirecting them.
    pub fn thumb_name_long(&self, lossy: bool, file_name: &str) -> String {
        crate::thumb_name::build_long(self.client_width, Some(self.page), lossy, file_name)
    }
}

/// Outcome of normalization: either rendering work, or a decision that
/// the original can be served as-is. Exactly one of the two holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Normalized {
    /// The request reduces to the unmodified source; bypass backend
    /// selection entirely.
    ServeOriginal,
    Render(TransformParams),
}

/// Whether the file needs a render even at full size: it carries an
/// intrinsic rotation and the selected scaler is able to apply it.
pub fn must_render(src: &SourceMetadata, caps: ScalerCaps) -> bool {
    caps.can_rotate && src.rotation % 360 != 0
}

/// Height preserving the source aspect ratio at the given width, never
/// rounded down to zero.
fn scale_height(src_w: u32, src_h: u32, width: u32) -> u32 {
    let h = (f64::from(width) * f64::from(src_h) / f64::from(src_w)).round() as u32;
    h.max(1)
}

/// Width of the largest image fitting a bounding box, aspect preserved.
fn fit_box_width(src_w: u32, src_h: u32, box_w: u32, box_h: u32) -> u32 {
    if u64::from(src_h) * u64::from(box_w) > u64::from(src_w) * u64::from(box_h) {
        // Height-bound: derive width from the box height.
        let w = (f64::from(box_h) * f64::from(src_w) / f64::from(src_h)).round() as u32;
        w.max(1)
    } else {
        box_w
    }
}

/// Normalize raw parameters against the source.
///
/// Errors are malformed-request (no usable width) or source-too-large.
pub fn normalise(
    src: &SourceMetadata,
    raw: &RawParams,
    caps: ScalerCaps,
    limits: ScalingLimits,
) -> Result<Normalized> {
    if src.width == 0 || src.height == 0 {
        return Err(Error::MalformedParams(
            "source has no usable dimensions".to_string(),
        ));
    }

    let requested = raw
        .width
        .ok_or_else(|| Error::MalformedParams("width is required".to_string()))?;
    if requested == 0 {
        return Err(Error::MalformedParams("width must be positive".to_string()));
    }

    let page = raw.page.unwrap_or(1).clamp(1, src.page_count.max(1));

    // Fit the request into a box when a height bound was also given.
    let mut width = requested;
    if let Some(box_h) = raw.height {
        if box_h == 0 {
            return Err(Error::MalformedParams("height must be positive".to_string()));
        }
        width = fit_box_width(src.width, src.height, requested, box_h);
    }
    let height = scale_height(src.width, src.height, width);

    let mut physical_width = width;
    let mut physical_height = height;

    // Don't make an image bigger than the source.
    if physical_width >= src.width {
        physical_width = src.width;
        physical_height = src.height;

        if !must_render(src, caps) {
            if raw.quality == Quality::Default {
                // Nothing to do server-side; the original is the answer.
                return Ok(Normalized::ServeOriginal);
            }
        } else {
            // Rotation forces a render even at full size; skip the area
            // check, no scaling pass happens.
            return Ok(Normalized::Render(TransformParams {
                client_width: width,
                client_height: height,
                physical_width,
                physical_height,
                page,
                quality: raw.quality,
            }));
        }
    }

    if src.area() > limits.max_image_area
        && !(src.media_type == MediaType::Jpeg && caps.streams_large_jpeg)
    {
        return Err(Error::SourceTooLarge {
            width: src.width,
            height: src.height,
            max_area: limits.max_image_area,
        });
    }

    Ok(Normalized::Render(TransformParams {
        client_width: width,
        client_height: height,
        physical_width,
        physical_height,
        page,
        quality: raw.quality,
    }))
}

/// Pre-rotation render dimensions.
///
/// Rotation is applied to an already-scaled image, so for 90°-class
/// rotations the canvas rendered before rotating must have transposed
/// dimensions.
pub fn pre_rotation_dimensions(params: &TransformParams, rotation: u16) -> (u32, u32) {
    if rotation % 180 == 90 {
        (params.physical_height, params.physical_width)
    } else {
        (params.physical_width, params.physical_height)
    }
}

/// Whether a parameter set is one of the standard sizes the site links
/// to. Non-standard sets are throttled more aggressively because their
/// combinatorial space is unbounded.
pub fn is_standard(
    params: &TransformParams,
    src: &SourceMetadata,
    thumb_limits: &[u32],
    image_limits: &[(u32, u32)],
) -> bool {
    if params.quality != Quality::Default {
        return false;
    }
    if thumb_limits.contains(&params.client_width) {
        return true;
    }
    // A width is also standard when some configured bounding box maps
    // onto it for this source's aspect ratio.
    image_limits
        .iter()
        .any(|&(w, h)| fit_box_width(src.width, src.height, w, h) == params.client_width)
}
