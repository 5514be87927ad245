//! Render rate limiting.
//!
//! Two token buckets per client: one for renders in general, a much
//! smaller one for non-standard parameter sets. The space of standard
//! thumbnails is bounded by configuration, so they can be limited
//! generously; arbitrary sizes are an easy way to fill a disk and get
//! the tight bucket.

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use thumbwell_core::config::RateLimitConfig;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

struct Inner {
    renders: KeyedLimiter,
    nonstandard: KeyedLimiter,
}

/// Per-client render quotas. Disabled configuration admits everything.
pub struct RenderLimiter {
    inner: Option<Inner>,
}

impl RenderLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }
        let renders = NonZeroU32::new(config.renders_per_minute)
            .unwrap_or(NonZeroU32::new(1).expect("1 is non-zero"));
        let nonstandard = NonZeroU32::new(config.nonstandard_per_minute)
            .unwrap_or(NonZeroU32::new(1).expect("1 is non-zero"));
        Self {
            inner: Some(Inner {
                renders: RateLimiter::keyed(Quota::per_minute(renders)),
                nonstandard: RateLimiter::keyed(Quota::per_minute(nonstandard)),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Charge one render to the client. False means throttled.
    pub fn check_render(&self, client: &str) -> bool {
        match &self.inner {
            Some(inner) => inner.renders.check_key(&client.to_string()).is_ok(),
            None => true,
        }
    }

    /// Charge one non-standard-size render to the client.
    pub fn check_nonstandard(&self, client: &str) -> bool {
        match &self.inner {
            Some(inner) => inner.nonstandard.check_key(&client.to_string()).is_ok(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = RenderLimiter::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        for _ in 0..10_000 {
            assert!(limiter.check_render("10.0.0.1"));
            assert!(limiter.check_nonstandard("10.0.0.1"));
        }
    }

    #[test]
    fn nonstandard_bucket_exhausts_first() {
        let limiter = RenderLimiter::new(&RateLimitConfig {
            enabled: true,
            renders_per_minute: 100,
            nonstandard_per_minute: 2,
        });
        assert!(limiter.check_nonstandard("10.0.0.1"));
        assert!(limiter.check_nonstandard("10.0.0.1"));
        assert!(!limiter.check_nonstandard("10.0.0.1"));
        // The general bucket still has room.
        assert!(limiter.check_render("10.0.0.1"));
        // Other clients are unaffected.
        assert!(limiter.check_nonstandard("10.0.0.2"));
    }
}
