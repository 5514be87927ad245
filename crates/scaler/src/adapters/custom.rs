//! Custom external command adapter.

use crate::backend::{BackendKind, RenderOutcome, RenderRequest, ScalerBackend, verify_output};
use crate::error::{RenderError, RenderResult};
use async_trait::async_trait;
use thumbwell_core::config::ScalerConfig;
use tracing::debug;

/// Adapter running an operator-supplied command template through the
/// shell. Placeholders: `%s` source path, `%d` destination path,
/// `%w` physical width, `%h` physical height. The command receives the
/// already-scaled dimensions and is expected to do the whole job; no
/// rotation support.
pub struct CustomScaler {
    template: String,
}

impl CustomScaler {
    pub fn new(config: &ScalerConfig) -> Self {
        Self {
            template: config.custom_command.clone().unwrap_or_default(),
        }
    }

    fn build_command(&self, req: &RenderRequest<'_>) -> RenderResult<String> {
        if self.template.is_empty() {
            return Err(RenderError::Internal(
                "custom scaler selected without a command template".to_string(),
            ));
        }
        let src = req.source_path.to_str().ok_or_else(|| {
            RenderError::UnsafePath(format!(
                "non-UTF-8 source path: {}",
                req.source_path.display()
            ))
        })?;
        let dest = req.dest_path.to_str().ok_or_else(|| {
            RenderError::UnsafePath(format!("non-UTF-8 dest path: {}", req.dest_path.display()))
        })?;

        Ok(self
            .template
            .replace("%s", &shell_escape(src))
            .replace("%d", &shell_escape(dest))
            .replace("%w", &shell_escape(&req.params.physical_width.to_string()))
            .replace("%h", &shell_escape(&req.params.physical_height.to_string())))
    }
}

/// Single-quote a string for POSIX sh.
fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[async_trait]
impl ScalerBackend for CustomScaler {
    fn kind(&self) -> BackendKind {
        BackendKind::Custom
    }

    async fn render(&self, req: &RenderRequest<'_>) -> RenderResult<RenderOutcome> {
        let command = self.build_command(req)?;
        debug!(%command, "running custom convert command");

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await?;
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
    use thumbwell_core::source::{ColorType, MediaType, SourceMetadata};
    use time::OffsetDateTime;

    fn scaler(template: &str) -> CustomScaler {
        CustomScaler::new(&ScalerConfig {
            custom_command: Some(template.to_string()),
            ..ScalerConfig::default()
        })
    }

    fn fixtures() -> (SourceMetadata, TransformParams) {
        let source = SourceMetadata {
            width: 1000,
            height: 500,
            media_type: MediaType::Jpeg,
            content_hash: ContentHash::compute(b"src"),
            rotation: 0,
            frame_count: 1,
            page_count: 1,
            color_type: ColorType::Normal,
            uploaded_at: OffsetDateTime::UNIX_EPOCH,
        };
        let params = TransformParams {
            client_width: 120,
            client_height: 60,
            physical_width: 120,
            physical_height: 60,
            page: 1,
            quality: Quality::Default,
        };
        (source, params)
    }

    #[test]
    fn substitutes_all_placeholders() {
        let (source, params) = fixtures();
        let req = RenderRequest {
            source_path: Path::new("/in/src.jpg"),
            dest_path: Path::new("/out/dst.jpg"),
            source: &source,
            params: &params,
            comment: None,
        };
        let cmd = scaler("scale -i %s -o %d -w %w -h %h")
            .build_command(&req)
            .unwrap();
        assert_eq!(cmd, "scale -i '/in/src.jpg' -o '/out/dst.jpg' -w '120' -h '60'");
    }

    #[test]
    fn quotes_hostile_paths() {
        let (source, params) = fixtures();
        let req = RenderRequest {
            source_path: Path::new("/in/it's; rm -rf.jpg"),
            dest_path: Path::new("/out/dst.jpg"),
            source: &source,
            params: &params,
            comment: None,
        };
        let cmd = scaler("scale %s %d").build_command(&req).unwrap();
        assert_eq!(cmd, r"scale '/in/it'\''s; rm -rf.jpg' '/out/dst.jpg'");
    }

    #[test]
    fn missing_template_is_an_error() {
        let (source, params) = fixtures();
        let req = RenderRequest {
            source_path: Path::new("/in/src.jpg"),
            dest_path: Path::new("/out/dst.jpg"),
            source: &source,
            params: &params,
            comment: None,
        };
        let scaler = CustomScaler::new(&ScalerConfig::default());
        assert!(matches!(
            scaler.build_command(&req),
            Err(RenderError::Internal(_))
        ));
    }
}
