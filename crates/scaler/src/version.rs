//! ImageMagick version probing with a memoized, TTL-bounded cache.
//!
//! Several command-line flags depend on the installed convert version.
//! Probing costs a process spawn, so the parsed result is cached for an
//! hour. The cache takes its clock and its probe as injected
//! dependencies so tests can fake both.

use crate::error::RenderResult;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long a probed version stays valid.
pub const VERSION_CACHE_TTL: Duration = Duration::from_secs(3600);

/// An ImageMagick version like `6.8.9` or `6.8.9-3`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version {
    parts: [u32; 3],
    /// The dash-suffixed patch level, 0 when absent.
    patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            parts: [major, minor, micro],
            patch: 0,
        }
    }

    pub const fn with_patch(major: u32, minor: u32, micro: u32, patch: u32) -> Self {
        Self {
            parts: [major, minor, micro],
            patch,
        }
    }

    /// Parse `major.minor.micro` with an optional `-patch` suffix.
    pub fn parse(s: &str) -> Option<Self> {
        let (base, patch) = match s.split_once('-') {
            Some((base, patch)) => (base, patch.parse().ok()?),
            None => (s, 0),
        };
        let mut iter = base.split('.');
        let major = iter.next()?.parse().ok()?;
        let minor = iter.next()?.parse().ok()?;
        let micro = iter.next()?.parse().ok()?;
        if iter.next().is_some() {
            return None;
        }
        Some(Self {
            parts: [major, minor, micro],
            patch,
        })
    }

    /// Extract the version from `convert -version` output.
    pub fn from_probe_output(output: &str) -> Option<Self> {
        let rest = output.split("Version: ImageMagick ").nth(1)?;
        let token = rest.split_whitespace().next()?;
        Self::parse(token)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts
            .cmp(&other.parts)
            .then(self.patch.cmp(&other.patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.parts[0], self.parts[1], self.parts[2])?;
        if self.patch != 0 {
            write!(f, "-{}", self.patch)?;
        }
        Ok(())
    }
}

/// Injectable clock.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Something that can discover the installed convert version.
#[async_trait]
pub trait VersionProbe: Send + Sync + 'static {
    /// Probe the engine. `Ok(None)` means the probe ran but the output
    /// was unrecognizable; flags gated on a minimum version stay off.
    async fn probe(&self) -> RenderResult<Option<Version>>;
}

/// Probes by running `<command> -version`.
pub struct CommandVersionProbe {
    command: String,
}

impl CommandVersionProbe {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl VersionProbe for CommandVersionProbe {
    async fn probe(&self) -> RenderResult<Option<Version>> {
        let output = tokio::process::Command::new(&self.command)
            .arg("-version")
            .output()
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = Version::from_probe_output(&stdout);
        if version.is_none() {
            tracing::debug!(command = %self.command, "version probe output not recognized");
        }
        Ok(version)
    }
}

/// Memoized version lookup with a validity window.
pub struct CachedVersion {
    probe: Box<dyn VersionProbe>,
    clock: Box<dyn Clock>,
    ttl: Duration,
    state: Mutex<Option<(Instant, Option<Version>)>>,
}

impl CachedVersion {
    pub fn new(probe: impl VersionProbe, clock: impl Clock, ttl: Duration) -> Self {
        Self {
            probe: Box::new(probe),
            clock: Box::new(clock),
            ttl,
            state: Mutex::new(None),
        }
    }

    /// Current version, probing at most once per TTL window. Probe
    /// failures are not cached; the next call tries again.
    pub async fn get(&self) -> Option<Version> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        if let Some((probed_at, version)) = state.as_ref()
            && now.duration_since(*probed_at) < self.ttl
        {
            return version.clone();
        }
        match self.probe.probe().await {
            Ok(version) => {
                *state = Some((now, version.clone()));
                version
            }
            Err(e) => {
                tracing::warn!(error = %e, "version probe failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};

    #[test]
    fn parse_and_order() {
        assert!(Version::parse("6.5.6").unwrap() >= Version::new(6, 5, 6));
        assert!(Version::parse("6.3.4").unwrap() < Version::new(6, 3, 5));
        assert!(Version::parse("6.8.9-2").unwrap() < Version::with_patch(6, 8, 9, 3));
        assert!(Version::parse("7.0.0").unwrap() > Version::with_patch(6, 8, 9, 3));
        assert!(Version::parse("garbage").is_none());
        assert!(Version::parse("6.5").is_none());
    }

    #[test]
    fn parses_probe_output() {
        let output = "Version: ImageMagick 6.9.11-60 Q16 x86_64 2021-01-25\nCopyright: ...";
        assert_eq!(
            Version::from_probe_output(output),
            Some(Version::with_patch(6, 9, 11, 60))
        );
        assert_eq!(Version::from_probe_output("no version here"), None);
    }

    struct FakeClock(Arc<AtomicU64>, Instant);

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.1 + Duration::from_secs(self.0.load(AtomicOrdering::SeqCst))
        }
    }

    struct CountingProbe(Arc<AtomicU32>);

    #[async_trait]
    impl VersionProbe for CountingProbe {
        async fn probe(&self) -> RenderResult<Option<Version>> {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Some(Version::new(6, 9, 0)))
        }
    }

    #[tokio::test]
    async fn probes_once_per_ttl_window() {
        let offset = Arc::new(AtomicU64::new(0));
        let count = Arc::new(AtomicU32::new(0));
        let cache = CachedVersion::new(
            CountingProbe(count.clone()),
            FakeClock(offset.clone(), Instant::now()),
            Duration::from_secs(3600),
        );

        assert_eq!(cache.get().await, Some(Version::new(6, 9, 0)));
        assert_eq!(cache.get().await, Some(Version::new(6, 9, 0)));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);

        // Advance past the window; the next get must re-probe.
        offset.store(3601, AtomicOrdering::SeqCst);
        assert_eq!(cache.get().await, Some(Version::new(6, 9, 0)));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 2);
    }
}
