//! The render job handed to the coordinator.
//!
//! Materializes the source into a scratch directory, invokes the
//! selected backend, and persists the derivative under its
//! deterministic thumbnail key. `cached()` is how losing requesters in
//! a stampede adopt the winner's output.

use crate::error::ThumbError;
use crate::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thumbwell_coordinator::RenderWork;
use thumbwell_core::params::TransformParams;
use thumbwell_core::source::SourceMetadata;
use thumbwell_scaler::{RenderError, RenderOutcome, RenderRequest, ScalerBackend};
use thumbwell_storage::BlobStore;
use tracing::info;

/// One thumbnail render bound to its cache key.
pub struct RenderJob {
    pub storage: Arc<dyn BlobStore>,
    pub backend: Arc<dyn ScalerBackend>,
    pub source_key: String,
    pub thumb_key: String,
    pub file_name: String,
    pub thumb_name: String,
    pub source: SourceMetadata,
    pub params: TransformParams,
}

impl RenderJob {
    fn map_render_error(e: RenderError) -> ThumbError {
        match e {
            RenderError::UnsupportedFormat { mime } => ThumbError::UnsupportedFormat(mime),
            other => ThumbError::BackendFailure(other.to_string()),
        }
    }
}

#[async_trait]
impl RenderWork for RenderJob {
    type Output = Bytes;
    type Error = ThumbError;

    async fn do_work(&self) -> Result<Bytes, ThumbError> {
        let source_bytes = self.storage.get(&self.source_key).await?;

        // Backends need filesystem paths; stage the source and collect
        // the output in a scratch directory that cleans itself up.
        let scratch = tempfile::tempdir().map_err(|e| {
            ThumbError::Internal(format!("cannot create render scratch dir: {e}"))
        })?;
        let source_path = scratch.path().join(&self.file_name);
        let dest_path = scratch.path().join(&self.thumb_name);
        tokio::fs::write(&source_path, &source_bytes)
            .await
            .map_err(|e| ThumbError::Internal(format!("cannot stage source: {e}")))?;

        let request = RenderRequest {
            source_path: &source_path,
            dest_path: &dest_path,
            source: &self.source,
            params: &self.params,
            comment: None,
        };

        let timer = metrics::RENDER_SECONDS.start_timer();
        let outcome = self
            .backend
            .render(&request)
            .await
            .map_err(Self::map_render_error)?;
        timer.observe_duration();

        match outcome {
            RenderOutcome::SourcePassthrough => Ok(source_bytes),
            RenderOutcome::Rendered => {
                let rendered = tokio::fs::read(&dest_path)
                    .await
                    .map_err(|e| ThumbError::BackendFailure(format!("output unreadable: {e}")))?;
                let rendered = Bytes::from(rendered);
                self.storage.put(&self.thumb_key, rendered.clone()).await?;
                info!(
                    thumb = %self.thumb_key,
                    backend = self.backend.kind().name(),
                    bytes = rendered.len(),
                    "thumbnail rendered"
                );
                Ok(rendered)
            }
        }
    }

    async fn cached(&self) -> Option<Bytes> {
        match self.storage.get(&self.thumb_key).await {
            Ok(bytes) if !bytes.is_empty() => {
                metrics::STAMPEDE_ADOPTIONS_TOTAL.inc();
                Some(bytes)
            }
            _ => None,
        }
    }
}
