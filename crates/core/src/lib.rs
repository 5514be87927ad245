//! Core domain types for the Thumbwell thumbnail server.
//!
//! This crate holds everything the other crates agree on:
//! - Transform parameters and the dimension normalizer
//! - The canonical thumbnail-name codec
//! - Fallback (404-recovered) path parsing and hashed storage paths
//! - Source file metadata types
//! - Configuration types shared across crates

pub mod config;
pub mod error;
pub mod hash;
pub mod params;
pub mod paths;
pub mod request;
pub mod source;
pub mod thumb_name;

pub use error::{Error, Result};
pub use hash::ContentHash;
pub use params::{Normalized, Quality, RawParams, ScalerCaps, ScalingLimits, TransformParams};
pub use paths::{FallbackPath, Zone};
pub use request::ThumbRequest;
pub use source::{ColorType, MediaType, SourceMetadata};
pub use thumb_name::ParsedThumbName;
