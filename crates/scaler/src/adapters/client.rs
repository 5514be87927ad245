//! Client-side scaling: the server does no work.

use crate::backend::{BackendKind, RenderOutcome, RenderRequest, ScalerBackend};
use crate::error::RenderResult;
use async_trait::async_trait;

/// Passthrough adapter. Selected when no destination path is available
/// or server-side rendering is disabled; the caller serves the source
/// bytes and lets the client scale them.
pub struct ClientScaler;

#[async_trait]
impl ScalerBackend for ClientScaler {
    fn kind(&self) -> BackendKind {
        BackendKind::Client
    }

    async fn render(&self, _req: &RenderRequest<'_>) -> RenderResult<RenderOutcome> {
        Ok(RenderOutcome::SourcePassthrough)
    }
}
