//! Source file metadata types.
//!
//! The source repository is an external collaborator; these are the
//! types crossing its interface boundary. A `SourceMetadata` is what
//! the metadata provider hands back for a resolved source file, with
//! width/height already corrected for intrinsic rotation (a portrait
//! photo stored as rotated landscape reports its display dimensions).

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Image media types the transform pipeline distinguishes.
///
/// Anything else is carried as `Other` and can only be served back
/// unscaled or rejected as unsupported by the selected backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
    Webp,
    /// Layered image format; flattened onto a background before scaling.
    Xcf,
    Tiff,
    Other(String),
}

impl MediaType {
    /// Parse from a MIME type string.
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "image/jpeg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/gif" => Self::Gif,
            "image/webp" => Self::Webp,
            "image/x-xcf" => Self::Xcf,
            "image/tiff" => Self::Tiff,
            other => Self::Other(other.to_string()),
        }
    }

    /// The canonical MIME type string.
    pub fn mime(&self) -> &str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Xcf => "image/x-xcf",
            Self::Tiff => "image/tiff",
            Self::Other(s) => s,
        }
    }

    /// Whether the format uses lossy compression. Lossy outputs take the
    /// configurable quality percentage; lossless outputs use a fixed
    /// high-compression setting.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Webp)
    }
}

/// Color encoding of the source, as far as the pipeline cares.
///
/// Only the legacy greyscale-with-alpha case is singled out: older
/// ImageMagick versions render it incorrectly after layer flattening
/// and need a channel-separation workaround.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorType {
    Normal,
    GreyscaleAlpha,
}

impl Default for ColorType {
    fn default() -> Self {
        Self::Normal
    }
}

/// Metadata for a resolved source file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Display width in pixels (post intrinsic-rotation correction).
    pub width: u32,
    /// Display height in pixels (post intrinsic-rotation correction).
    pub height: u32,
    pub media_type: MediaType,
    /// Hash of the source bytes; part of the render failure-counter key.
    pub content_hash: ContentHash,
    /// Intrinsic rotation in degrees (0, 90, 180, 270), clockwise.
    #[serde(default)]
    pub rotation: u16,
    /// Number of animation frames (1 for still images).
    #[serde(default = "one")]
    pub frame_count: u32,
    /// Number of pages for paged formats (1 otherwise).
    #[serde(default = "one")]
    pub page_count: u32,
    #[serde(default)]
    pub color_type: ColorType,
    /// Upload timestamp; compared against If-Modified-Since.
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

fn one() -> u32 {
    1
}

impl SourceMetadata {
    /// Pixel area of a single frame/page.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Estimated pixel area across all animation frames.
    pub fn animated_area(&self) -> u64 {
        self.area() * u64::from(self.frame_count.max(1))
    }

    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_mime_roundtrip() {
        for mime in ["image/jpeg", "image/png", "image/gif", "image/x-xcf"] {
            assert_eq!(MediaType::from_mime(mime).mime(), mime);
        }
        let other = MediaType::from_mime("application/pdf");
        assert_eq!(other, MediaType::Other("application/pdf".to_string()));
    }

    #[test]
    fn animated_area_scales_with_frames() {
        let meta = SourceMetadata {
            width: 100,
            height: 50,
            media_type: MediaType::Gif,
            content_hash: ContentHash::compute(b"x"),
            rotation: 0,
            frame_count: 12,
            page_count: 1,
            color_type: ColorType::Normal,
            uploaded_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert_eq!(meta.area(), 5_000);
        assert_eq!(meta.animated_area(), 60_000);
        assert!(meta.is_animated());
    }
}
