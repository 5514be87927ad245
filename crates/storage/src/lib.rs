//! Blob store abstraction for thumbnail and source storage.
//!
//! Thumbnail names are deterministic cache keys, so the store only
//! needs a small key-value surface: exists/head/get/put/delete plus a
//! streaming read for the response path. Concurrent writers racing on
//! the same key write identical bytes; last write wins and nothing is
//! corrupted.

pub mod backends;
pub mod error;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use traits::{BlobStore, ByteStream, ObjectMeta};
