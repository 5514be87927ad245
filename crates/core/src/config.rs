//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable request tracing.
    #[serde(default)]
    pub enable_tracing: bool,
    /// Enable the /metrics endpoint for Prometheus scraping.
    /// When enabled, restrict it to scraper IPs at the network level.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Add an X-Thumbwell-Renderer header naming this host, for tracing
    /// which box produced a thumbnail or an error page.
    #[serde(default)]
    pub show_hostname: bool,
    /// Accumulate X-Forwarded-Proto into Vary on redirects, for sites
    /// terminating TLS at a proxy.
    #[serde(default)]
    pub vary_on_forwarded_proto: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            enable_tracing: false,
            metrics_enabled: default_true(),
            show_hostname: false,
            vary_on_forwarded_proto: false,
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for the source and thumb zones.
        path: PathBuf,
    },
}

/// Source repository configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repository name; part of every failure-counter key.
    #[serde(default = "default_repo_name")]
    pub name: String,
    /// Depth of the hashed directory tree (single hex digit per level).
    #[serde(default = "default_hash_levels")]
    pub hash_levels: u8,
    /// Standard thumbnail widths the site links to.
    #[serde(default = "default_thumb_limits")]
    pub thumb_limits: Vec<u32>,
    /// Standard bounding boxes for full-size views.
    #[serde(default = "default_image_limits")]
    pub image_limits: Vec<(u32, u32)>,
    /// Renames: old source name -> current source name. Requests for an
    /// old name's thumbnails are redirected to the new name.
    #[serde(default)]
    pub redirects: HashMap<String, String>,
    /// Whether anonymous clients may read source files at all. When
    /// false, responses become private and vary on Cookie.
    #[serde(default = "default_true")]
    pub world_readable: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: default_repo_name(),
            hash_levels: default_hash_levels(),
            thumb_limits: default_thumb_limits(),
            image_limits: default_image_limits(),
            redirects: HashMap::new(),
            world_readable: true,
        }
    }
}

/// Scaler configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalerConfig {
    /// Master switch for server-side rendering. Off means every request
    /// falls back to client-side scaling.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prefer the ImageMagick command-line tool.
    #[serde(default)]
    pub use_magick: bool,
    /// Path to the ImageMagick convert binary.
    #[serde(default = "default_magick_command")]
    pub magick_command: String,
    /// Scratch directory handed to ImageMagick via MAGICK_TMPDIR.
    #[serde(default)]
    pub magick_tmpdir: Option<PathBuf>,
    /// Custom external command template. Placeholders: %s source path,
    /// %d destination path, %w width, %h height.
    #[serde(default)]
    pub custom_command: Option<String>,
    /// Prefer the SIMD resize library over the plain raster library for
    /// in-process scaling.
    #[serde(default)]
    pub prefer_simd: bool,
    /// JPEG/WebP output quality percentage.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Sharpen only when physical/source dimension-sum ratio drops
    /// below this; mild downscales are left alone.
    #[serde(default = "default_sharpen_threshold")]
    pub sharpen_reduction_threshold: f64,
    /// Radius x sigma passed to the sharpen operation.
    #[serde(default = "default_sharpen_parameter")]
    pub sharpen_parameter: String,
    /// Maximum source pixel area for thumbnailing.
    #[serde(default = "default_max_image_area")]
    pub max_image_area: u64,
    /// Maximum total pixel area (all frames) before an animation is
    /// reduced to its first frame.
    #[serde(default = "default_max_animated_area")]
    pub max_animated_area: u64,
    /// MIME types routed to the expensive render pool.
    #[serde(default = "default_expensive_types")]
    pub expensive_types: Vec<String>,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_magick: false,
            magick_command: default_magick_command(),
            magick_tmpdir: None,
            custom_command: None,
            prefer_simd: false,
            jpeg_quality: default_jpeg_quality(),
            sharpen_reduction_threshold: default_sharpen_threshold(),
            sharpen_parameter: default_sharpen_parameter(),
            max_image_area: default_max_image_area(),
            max_animated_area: default_max_animated_area(),
            expensive_types: default_expensive_types(),
        }
    }
}

impl ScalerConfig {
    /// Validate, returning human-readable warnings for odd settings.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(format!(
                "scaler.jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if !(0.0..=1.0).contains(&self.sharpen_reduction_threshold) {
            return Err(format!(
                "scaler.sharpen_reduction_threshold must be in 0..=1, got {}",
                self.sharpen_reduction_threshold
            ));
        }
        if self.use_magick && self.custom_command.is_some() {
            warnings.push(
                "both use_magick and custom_command are set; custom_command is ignored"
                    .to_string(),
            );
        }
        Ok(warnings)
    }
}

/// Render coordinator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// SQLite database shared by all workers in a cluster. When unset,
    /// coordination state is process-local (single-node deployments).
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Base TTL for failure-counter entries, in seconds.
    #[serde(default = "default_failure_ttl_secs")]
    pub failure_ttl_secs: u64,
    /// Upper bound of the random jitter added to the failure TTL to
    /// spread retry storms, in seconds.
    #[serde(default = "default_failure_jitter_secs")]
    pub failure_ttl_jitter_secs: u64,
    /// How long a losing requester waits for the winner's render before
    /// giving up, in seconds.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Lease lifetime; a crashed winner's slot becomes reclaimable after
    /// this many seconds.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Concurrent renders allowed in the ordinary pool, cluster-wide.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Concurrent renders allowed in the expensive-format pool.
    #[serde(default = "default_expensive_pool_size")]
    pub expensive_pool_size: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            database: None,
            failure_ttl_secs: default_failure_ttl_secs(),
            failure_ttl_jitter_secs: default_failure_jitter_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
            pool_size: default_pool_size(),
            expensive_pool_size: default_expensive_pool_size(),
        }
    }
}

impl CoordinatorConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

/// Render rate-limit configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Renders allowed per client per minute.
    #[serde(default = "default_renders_per_minute")]
    pub renders_per_minute: u32,
    /// Non-standard-size renders allowed per client per minute. Far
    /// lower: the space of non-standard sizes is unbounded.
    #[serde(default = "default_nonstandard_per_minute")]
    pub nonstandard_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            renders_per_minute: default_renders_per_minute(),
            nonstandard_per_minute: default_nonstandard_per_minute(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        if self.enabled {
            if self.renders_per_minute == 0 || self.nonstandard_per_minute == 0 {
                return Err("rate limit quotas must be positive when enabled".to_string());
            }
            if self.nonstandard_per_minute > self.renders_per_minute {
                warnings.push(
                    "nonstandard_per_minute exceeds renders_per_minute; the general quota \
                     will dominate"
                        .to_string(),
                );
            }
        }
        Ok(warnings)
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub scaler: ScalerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at the given directory.
    ///
    /// **For testing only.** Rate limiting is disabled and the in-process
    /// raster scaler is used so tests never shell out.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem { path: root.into() },
            repo: RepoConfig::default(),
            scaler: ScalerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            rate_limit: RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_repo_name() -> String {
    "local".to_string()
}

fn default_hash_levels() -> u8 {
    2
}

fn default_thumb_limits() -> Vec<u32> {
    vec![120, 150, 180, 200, 250, 300]
}

fn default_image_limits() -> Vec<(u32, u32)> {
    vec![(320, 240), (640, 480), (800, 600), (1024, 768), (1280, 1024)]
}

fn default_magick_command() -> String {
    "convert".to_string()
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_sharpen_threshold() -> f64 {
    0.85
}

fn default_sharpen_parameter() -> String {
    "0x0.4".to_string()
}

fn default_max_image_area() -> u64 {
    12_500_000
}

fn default_max_animated_area() -> u64 {
    12_500_000
}

fn default_expensive_types() -> Vec<String> {
    vec!["image/tiff".to_string(), "image/x-xcf".to_string()]
}

fn default_renders_per_minute() -> u32 {
    700
}

fn default_nonstandard_per_minute() -> u32 {
    70
}

fn default_failure_ttl_secs() -> u64 {
    3600
}

fn default_failure_jitter_secs() -> u64 {
    300
}

fn default_wait_timeout_secs() -> u64 {
    8
}

fn default_lease_ttl_secs() -> u64 {
    120
}

fn default_pool_size() -> u32 {
    8
}

fn default_expensive_pool_size() -> u32 {
    2
}
