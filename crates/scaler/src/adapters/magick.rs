//! ImageMagick command-line adapter.

use crate::backend::{BackendKind, RenderOutcome, RenderRequest, ScalerBackend, verify_output};
use crate::error::{RenderError, RenderResult};
use crate::escape::{escape_magick_input, escape_magick_output, escape_magick_property};
use crate::ops;
use crate::version::{
    CachedVersion, CommandVersionProbe, SystemClock, VERSION_CACHE_TTL, Version,
};
use async_trait::async_trait;
use std::path::PathBuf;
use thumbwell_core::config::ScalerConfig;
use thumbwell_core::params::pre_rotation_dimensions;
use thumbwell_core::source::{ColorType, MediaType};
use tracing::debug;

/// Minimum version carrying the JPEG decoder size hint.
const JPEG_SIZE_HINT_SINCE: Version = Version::new(6, 5, 6);
/// Minimum version where -layers optimizeTransparency works.
const OPTIMIZE_TRANSPARENCY_SINCE: Version = Version::new(6, 3, 5);
/// Greyscale-alpha sources render correctly from this version on;
/// older versions need the red channel separated out.
const GREYSCALE_ALPHA_FIXED: Version = Version::with_patch(6, 8, 9, 3);

/// Adapter shelling out to ImageMagick's convert.
pub struct MagickScaler {
    command: String,
    tmpdir: Option<PathBuf>,
    jpeg_quality: u8,
    sharpen_threshold: f64,
    sharpen_parameter: String,
    max_animated_area: u64,
    version: CachedVersion,
}

impl MagickScaler {
    pub fn new(config: &ScalerConfig) -> Self {
        Self {
            command: config.magick_command.clone(),
            tmpdir: config.magick_tmpdir.clone(),
            jpeg_quality: config.jpeg_quality,
            sharpen_threshold: config.sharpen_reduction_threshold,
            sharpen_parameter: config.sharpen_parameter.clone(),
            max_animated_area: config.max_animated_area,
            version: CachedVersion::new(
                CommandVersionProbe::new(config.magick_command.clone()),
                SystemClock,
                VERSION_CACHE_TTL,
            ),
        }
    }

    /// Build the convert argument vector for a request.
    ///
    /// Option order matters to convert: per-format options and the
    /// decoder hint come before the input file, scaling and rotation
    /// after it, animation re-optimization last.
    fn build_args(
        &self,
        req: &RenderRequest<'_>,
        version: Option<&Version>,
    ) -> RenderResult<Vec<String>> {
        let src = req.source;
        let params = req.params;

        let mut quality: Vec<String> = Vec::new();
        let mut sharpen: Vec<String> = Vec::new();
        let mut decoder_hint: Vec<String> = Vec::new();
        let mut animation_pre: Vec<String> = Vec::new();
        let mut animation_post: Vec<String> = Vec::new();
        let mut scene = None;

        match &src.media_type {
            MediaType::Jpeg | MediaType::Webp => {
                let q = ops::lossy_quality(params.quality, self.jpeg_quality);
                quality = vec!["-quality".into(), q.to_string()];
                if src.media_type == MediaType::Jpeg {
                    if ops::resize_ratio(params, src) < self.sharpen_threshold {
                        sharpen = vec!["-sharpen".into(), self.sharpen_parameter.clone()];
                    }
                    if version.is_some_and(|v| *v >= JPEG_SIZE_HINT_SINCE) {
                        decoder_hint = vec![
                            "-define".into(),
                            format!(
                                "jpeg:size={}x{}",
                                params.physical_width, params.physical_height
                            ),
                        ];
                    }
                }
            }
            MediaType::Png => {
                // zlib level 9, adaptive filtering.
                quality = vec!["-quality".into(), "95".into()];
            }
            MediaType::Gif => {
                if src.animated_area() > self.max_animated_area {
                    // Scaling every frame of something this big is a
                    // total drag; take the first frame only.
                    scene = Some(0);
                } else if src.is_animated() {
                    animation_pre = vec!["-coalesce".into()];
                    if version.is_some_and(|v| *v >= OPTIMIZE_TRANSPARENCY_SINCE) {
                        animation_post = vec![
                            "-fuzz".into(),
                            "5%".into(),
                            "-layers".into(),
                            "optimizeTransparency".into(),
                        ];
                    }
                }
            }
            MediaType::Xcf => {
                // Merge layers onto a transparent canvas to keep alpha,
                // then restore the white default background for the
                // output.
                animation_post = vec![
                    "-background".into(),
                    "transparent".into(),
                    "-layers".into(),
                    "merge".into(),
                    "-background".into(),
                    "white".into(),
                ];
                if src.color_type == ColorType::GreyscaleAlpha
                    && version.is_none_or(|v| *v < GREYSCALE_ALPHA_FIXED)
                {
                    animation_post.extend([
                        "-channel".into(),
                        "R".into(),
                        "-separate".into(),
                    ]);
                }
            }
            MediaType::Tiff | MediaType::Other(_) => {}
        }

        // Paged sources select their page as an explicit scene index.
        if scene.is_none() && params.page > 1 {
            scene = Some(params.page - 1);
        }

        let rotation = src.rotation % 360;
        let (width, height) = pre_rotation_dimensions(params, rotation);

        let src_path = req.source_path.to_str().ok_or_else(|| {
            RenderError::UnsafePath(format!("non-UTF-8 source path: {}", req.source_path.display()))
        })?;
        let dest_path = req.dest_path.to_str().ok_or_else(|| {
            RenderError::UnsafePath(format!("non-UTF-8 dest path: {}", req.dest_path.display()))
        })?;

        let mut args = quality;
        // White background: transparent areas render black otherwise in
        // clients that flatten.
        args.extend(["-background".into(), "white".into()]);
        args.extend(decoder_hint);
        args.push(escape_magick_input(src_path, scene)?);
        args.extend(animation_pre);
        // The "!" forces the exact size; convert will otherwise shave a
        // pixel when it disagrees about the ratio.
        args.extend(["-thumbnail".into(), format!("{width}x{height}!")]);
        if let Some(comment) = req.comment.filter(|c| !c.is_empty()) {
            args.extend([
                "-set".into(),
                "comment".into(),
                escape_magick_property(comment),
            ]);
        }
        args.extend(["-depth".into(), "8".into()]);
        args.extend(sharpen);
        if rotation != 0 {
            args.extend(["-rotate".into(), format!("-{rotation}")]);
        }
        args.extend(animation_post);
        args.push(escape_magick_output(dest_path, None)?);

        Ok(args)
    }
}

#[async_trait]
impl ScalerBackend for MagickScaler {
    fn kind(&self) -> BackendKind {
        BackendKind::Magick
    }

    async fn render(&self, req: &RenderRequest<'_>) -> RenderResult<RenderOutcome> {
        let version = self.version.get().await;
        let args = self.build_args(req, version.as_ref())?;
        debug!(command = %self.command, ?args, "running convert");

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&args);
        // One thread only; convert has deadlocked under OOM with more.
        cmd.env("OMP_NUM_THREADS", "1");
        if let Some(tmpdir) = &self.tmpdir {
            cmd.env("MAGICK_TMPDIR", tmpdir);
        }

        let output = cmd.output().await?;
        if !output.status.success() {
            let _ = tokio::fs::remove_file(req.dest_path).await;
            return Err(RenderError::ProcessFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        verify_output(req.dest_path).await?;
        Ok(RenderOutcome::Rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use thumbwell_core::hash::ContentHash;
    use thumbwell_core::params::{Quality, TransformParams};
    use thumbwell_core::source::SourceMetadata;
    use time::OffsetDateTime;

    fn scaler() -> MagickScaler {
        MagickScaler::new(&ScalerConfig::default())
    }

    fn source(media_type: MediaType) -> SourceMetadata {
        SourceMetadata {
            width: 1000,
            height: 500,
            media_type,
            content_hash: ContentHash::compute(b"src"),
            rotation: 0,
            frame_count: 1,
            page_count: 1,
            color_type: ColorType::Normal,
            uploaded_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn params(width: u32, height: u32) -> TransformParams {
        TransformParams {
            client_width: width,
            client_height: height,
            physical_width: width,
            physical_height: height,
            page: 1,
            quality: Quality::Default,
        }
    }

    fn request<'a>(src: &'a SourceMetadata, params: &'a TransformParams) -> RenderRequest<'a> {
        RenderRequest {
            source_path: Path::new("/work/src.img"),
            dest_path: Path::new("/work/out.img"),
            source: src,
            params,
            comment: None,
        }
    }

    #[test]
    fn jpeg_gets_quality_hint_and_sharpen() {
        let src = source(MediaType::Jpeg);
        let params = params(120, 60);
        let scaler = scaler();
        let args = scaler
            .build_args(&request(&src, &params), Some(&Version::new(6, 9, 0)))
            .unwrap();

        let joined = args.join(" ");
        assert!(joined.starts_with("-quality 80"));
        assert!(joined.contains("-define jpeg:size=120x60"));
        assert!(joined.contains("-sharpen 0x0.4"));
        assert!(joined.contains("-thumbnail 120x60!"));
        assert!(joined.ends_with("/work/out.img"));
    }

    #[test]
    fn old_magick_skips_decoder_hint() {
        let src = source(MediaType::Jpeg);
        let params = params(120, 60);
        let args = scaler()
            .build_args(&request(&src, &params), Some(&Version::new(6, 5, 5)))
            .unwrap();
        assert!(!args.join(" ").contains("jpeg:size"));
    }

    #[test]
    fn mild_downscale_is_not_sharpened() {
        let src = source(MediaType::Jpeg);
        // 900/1000 + 450/500: ratio 0.9, above the 0.85 threshold.
        let params = params(900, 450);
        let args = scaler()
            .build_args(&request(&src, &params), None)
            .unwrap();
        assert!(!args.join(" ").contains("-sharpen"));
    }

    #[test]
    fn png_uses_fixed_high_compression() {
        let src = source(MediaType::Png);
        let params = params(120, 60);
        let args = scaler().build_args(&request(&src, &params), None).unwrap();
        assert!(args.join(" ").starts_with("-quality 95"));
    }

    #[test]
    fn low_quality_request_drops_to_thirty() {
        let src = source(MediaType::Jpeg);
        let mut params = params(120, 60);
        params.quality = Quality::Low;
        let args = scaler().build_args(&request(&src, &params), None).unwrap();
        assert!(args.join(" ").starts_with("-quality 30"));
    }

    #[test]
    fn oversized_animation_takes_first_frame() {
        let mut src = source(MediaType::Gif);
        src.frame_count = 100; // 100 * 500k = 50M pixel frames
        let params = params(120, 60);
        let args = scaler()
            .build_args(&request(&src, &params), Some(&Version::new(6, 9, 0)))
            .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("/work/src.img[0]"));
        assert!(!joined.contains("-coalesce"));
    }

    #[test]
    fn small_animation_coalesces_and_reoptimizes() {
        let mut src = source(MediaType::Gif);
        src.frame_count = 4;
        let params = params(120, 60);
        let args = scaler()
            .build_args(&request(&src, &params), Some(&Version::new(6, 9, 0)))
            .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-coalesce"));
        assert!(joined.contains("-fuzz 5% -layers optimizeTransparency"));

        // Too old for optimizeTransparency: coalesce only.
        let args = scaler()
            .build_args(&request(&src, &params), Some(&Version::new(6, 3, 4)))
            .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-coalesce"));
        assert!(!joined.contains("optimizeTransparency"));
    }

    #[test]
    fn xcf_flattens_with_background_juggling() {
        let src = source(MediaType::Xcf);
        let params = params(120, 60);
        let args = scaler()
            .build_args(&request(&src, &params), Some(&Version::new(6, 9, 0)))
            .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-background transparent -layers merge -background white"));
        assert!(!joined.contains("-separate"));
    }

    #[test]
    fn old_magick_separates_greyscale_alpha_channel() {
        let mut src = source(MediaType::Xcf);
        src.color_type = ColorType::GreyscaleAlpha;
        let params = params(120, 60);
        let args = scaler()
            .build_args(
                &request(&src, &params),
                Some(&Version::with_patch(6, 8, 9, 2)),
            )
            .unwrap();
        assert!(args.join(" ").contains("-channel R -separate"));

        // Fixed versions don't need the workaround.
        let args = scaler()
            .build_args(
                &request(&src, &params),
                Some(&Version::with_patch(6, 8, 9, 3)),
            )
            .unwrap();
        assert!(!args.join(" ").contains("-separate"));
    }

    #[test]
    fn rotation_happens_after_scaling_on_swapped_canvas() {
        let mut src = source(MediaType::Jpeg);
        src.rotation = 90;
        let params = params(120, 60);
        let args = scaler().build_args(&request(&src, &params), None).unwrap();
        let joined = args.join(" ");
        // Pre-rotation canvas is transposed; rotation comes after.
        assert!(joined.contains("-thumbnail 60x120!"));
        let thumb_pos = joined.find("-thumbnail").unwrap();
        let rotate_pos = joined.find("-rotate -90").unwrap();
        assert!(rotate_pos > thumb_pos);
    }

    #[test]
    fn page_selects_scene_index() {
        let mut src = source(MediaType::Tiff);
        src.page_count = 5;
        let mut params = params(120, 60);
        params.page = 3;
        let args = scaler().build_args(&request(&src, &params), None).unwrap();
        assert!(args.join(" ").contains("/work/src.img[2]"));
    }

    #[test]
    fn comment_is_property_escaped() {
        let src = source(MediaType::Jpeg);
        let params = params(120, 60);
        let mut req = request(&src, &params);
        req.comment = Some("100% -tricky");
        let args = scaler().build_args(&req, None).unwrap();
        let pos = args.iter().position(|a| a == "comment").unwrap();
        assert_eq!(args[pos + 1], "100%% -tricky");
    }
}
