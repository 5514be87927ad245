//! Source repository collaborators.
//!
//! The thumbnail pipeline consults the repository only at this
//! boundary: resolve a (zone, name) pair to a source file with
//! metadata, look up renames, and ask a boolean permission question.
//! The local implementation keeps originals in the blob store with a
//! sidecar JSON metadata document; sources uploaded without one get
//! their dimensions probed on first use.

use crate::error::{ThumbError, ThumbResult};
use async_trait::async_trait;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::io::Cursor;
use std::sync::Arc;
use thumbwell_core::config::RepoConfig;
use thumbwell_core::hash::ContentHash;
use thumbwell_core::paths::{self, Zone};
use thumbwell_core::source::{MediaType, SourceMetadata};
use thumbwell_storage::BlobStore;
use tracing::debug;

/// A resolved source file.
#[derive(Clone, Debug)]
pub struct SourceFile {
    /// Sanitized file name (for archives, `<timestamp>!<name>`).
    pub name: String,
    pub zone: Zone,
    /// Blob-store key of the original bytes.
    pub storage_key: String,
    pub metadata: SourceMetadata,
}

/// Source file lookup.
#[async_trait]
pub trait SourceRepository: Send + Sync + 'static {
    /// Repository name; part of every render failure-counter key.
    fn name(&self) -> &str;

    /// Resolve a file within a zone. `Ok(None)` means it does not
    /// exist (or is hidden, which must look identical to callers).
    async fn resolve(&self, zone: Zone, file_name: &str) -> ThumbResult<Option<SourceFile>>;

    /// Current name for a renamed file, if this name is a redirect.
    async fn redirect_target(&self, file_name: &str) -> Option<String>;

    /// Configured hash-directory depth, needed to build public paths.
    fn hash_levels(&self) -> u8;
}

/// May-read capability oracle.
pub trait PermissionOracle: Send + Sync + 'static {
    fn can_read(&self, file_name: &str) -> bool;
}

/// Oracle for repositories without read restrictions.
pub struct AllowAll;

impl PermissionOracle for AllowAll {
    fn can_read(&self, _file_name: &str) -> bool {
        true
    }
}

/// Blob-store key of a source file.
pub fn source_key(zone: Zone, file_name: &str, levels: u8) -> String {
    let frag = paths::hash_fragment(file_name, levels);
    match zone {
        Zone::Public => format!("public/{frag}{file_name}"),
        Zone::Archive => format!("public/archive/{frag}{file_name}"),
        Zone::Temp => format!("temp/{frag}{file_name}"),
    }
}

/// Blob-store key of a thumbnail. The archive prefix lives inside the
/// thumb zone; temp thumbnails live under the temp zone's own thumb
/// tree.
pub fn thumb_key(zone: Zone, file_name: &str, levels: u8, thumb_name: &str) -> String {
    let rel = paths::thumb_rel(zone, file_name, levels, thumb_name);
    match zone {
        Zone::Public | Zone::Archive => format!("thumb/{rel}"),
        Zone::Temp => format!("temp/thumb/{}", rel.trim_start_matches("temp/")),
    }
}

/// Characters that need escaping inside a URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|');

/// Public URL path of a thumbnail, as redirect targets need it.
pub fn thumb_url(zone: Zone, file_name: &str, levels: u8, thumb_name: &str) -> String {
    format!(
        "/thumb/{}{}{}/{}",
        zone.prefix(),
        paths::hash_fragment(file_name, levels),
        utf8_percent_encode(file_name, SEGMENT),
        utf8_percent_encode(thumb_name, SEGMENT)
    )
}

/// Local repository over the blob store.
pub struct LocalRepo {
    storage: Arc<dyn BlobStore>,
    config: RepoConfig,
}

impl LocalRepo {
    pub fn new(storage: Arc<dyn BlobStore>, config: RepoConfig) -> Self {
        Self { storage, config }
    }

    /// Probe metadata from the image bytes themselves, for sources
    /// uploaded without a sidecar document.
    async fn probe_metadata(&self, key: &str) -> ThumbResult<Option<SourceMetadata>> {
        let bytes = match self.storage.get(key).await {
            Ok(bytes) => bytes,
            Err(thumbwell_storage::StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let uploaded_at = self
            .storage
            .head(key)
            .await
            .ok()
            .and_then(|meta| meta.last_modified)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH);

        let reader = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| ThumbError::Internal(format!("format probe failed: {e}")))?;
        let Some(format) = reader.format() else {
            debug!(key, "source bytes are not a recognizable image");
            return Ok(None);
        };
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ThumbError::Internal(format!("dimension probe failed: {e}")))?;

        Ok(Some(SourceMetadata {
            width,
            height,
            media_type: MediaType::from_mime(format.to_mime_type()),
            content_hash: ContentHash::compute(&bytes),
            rotation: 0,
            frame_count: 1,
            page_count: 1,
            color_type: Default::default(),
            uploaded_at,
        }))
    }
}

#[async_trait]
impl SourceRepository for LocalRepo {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn hash_levels(&self) -> u8 {
        self.config.hash_levels
    }

    async fn resolve(&self, zone: Zone, file_name: &str) -> ThumbResult<Option<SourceFile>> {
        // Archived names carry their timestamp: `<timestamp>!<name>`.
        if zone == Zone::Archive && !file_name.contains('!') {
            return Ok(None);
        }

        let key = source_key(zone, file_name, self.config.hash_levels);

        // A sidecar document wins over probing: it can carry rotation,
        // frame counts and page counts that the byte probe cannot see.
        let sidecar_key = format!("{key}.json");
        let metadata = match self.storage.get(&sidecar_key).await {
            Ok(bytes) => Some(serde_json::from_slice(&bytes).map_err(|e| {
                ThumbError::Internal(format!("bad metadata sidecar {sidecar_key}: {e}"))
            })?),
            Err(thumbwell_storage::StorageError::NotFound(_)) => self.probe_metadata(&key).await?,
            Err(e) => return Err(e.into()),
        };

        Ok(metadata.map(|metadata| SourceFile {
            name: file_name.to_string(),
            zone,
            storage_key: key,
            metadata,
        }))
    }

    async fn redirect_target(&self, file_name: &str) -> Option<String> {
        self.config.redirects.get(file_name).cloned()
    }
}
