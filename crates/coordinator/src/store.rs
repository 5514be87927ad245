//! Coordination store trait and key types.

use crate::error::CoordinationResult;
use async_trait::async_trait;
use std::time::Duration;
use thumbwell_core::hash::ContentHash;

/// Identity of one render: repository, source content, thumbnail name.
///
/// Requests for different keys never block each other; requests for the
/// same key serialize on one work slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderKey {
    repo: String,
    source_hash: ContentHash,
    thumb_hash: ContentHash,
}

impl RenderKey {
    pub fn new(repo: impl Into<String>, source_hash: ContentHash, thumb_name: &str) -> Self {
        Self {
            repo: repo.into(),
            source_hash,
            thumb_hash: ContentHash::compute(thumb_name.as_bytes()),
        }
    }

    /// Flat store key. Also the failure-counter key.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.repo,
            self.source_hash.to_hex(),
            self.thumb_hash.to_hex()
        )
    }
}

/// Which concurrency pool a render runs in. Expensive formats get their
/// own, independently sized pool so heavy renders cannot starve
/// ordinary ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPool {
    Standard,
    Expensive,
}

impl RenderPool {
    pub fn name(self) -> &'static str {
        match self {
            Self::Standard => "render",
            Self::Expensive => "render-expensive",
        }
    }
}

/// Result of trying to take a work slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// This requester holds the slot; the token proves ownership at
    /// release time.
    Acquired { token: i64 },
    /// Another requester holds the slot for the same key.
    Blocked,
    /// The pool is at its concurrency capacity.
    PoolFull,
}

/// Externally shared key-value state with atomic increment and
/// compare-and-set semantics.
///
/// Failure counters are TTL-refreshing: every recorded failure resets
/// the expiry, and entries disappear on expiry rather than on success.
/// Leases expire on their own so a crashed holder's slot becomes
/// reclaimable.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Consecutive-failure count for a key; 0 when absent or expired.
    async fn failure_count(&self, key: &str) -> CoordinationResult<u32>;

    /// Increment the failure counter, creating it at 1 if absent or
    /// expired, and refresh its TTL. Returns the new count.
    async fn record_failure(&self, key: &str, ttl: Duration) -> CoordinationResult<u32>;

    /// Try to take the work slot for a key within a pool, subject to
    /// the pool's capacity.
    async fn acquire(
        &self,
        pool: &str,
        key: &str,
        lease_ttl: Duration,
        capacity: u32,
    ) -> CoordinationResult<AcquireOutcome>;

    /// Release a slot previously acquired with `token`. Releasing with
    /// a stale token is a no-op.
    async fn release(&self, pool: &str, key: &str, token: i64) -> CoordinationResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_distinguishes_all_components() {
        let source = ContentHash::compute(b"source");
        let a = RenderKey::new("local", source, "120px-Foo.png");
        let b = RenderKey::new("local", source, "240px-Foo.png");
        let c = RenderKey::new("shared", source, "120px-Foo.png");
        let d = RenderKey::new("local", ContentHash::compute(b"other"), "120px-Foo.png");

        let keys = [a.cache_key(), b.cache_key(), c.cache_key(), d.cache_key()];
        for (i, key) in keys.iter().enumerate() {
            for other in &keys[i + 1..] {
                assert_ne!(key, other);
            }
        }
    }

    #[test]
    fn identical_params_produce_identical_keys() {
        let source = ContentHash::compute(b"source");
        let a = RenderKey::new("local", source, "120px-Foo.png");
        let b = RenderKey::new("local", source, "120px-Foo.png");
        assert_eq!(a.cache_key(), b.cache_key());
    }
}
