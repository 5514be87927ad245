//! The render coordinator state machine.
//!
//! Per render key:
//! 1. Short-circuit when the failure counter is at the limit.
//! 2. Take the cluster-wide work slot, or wait for whoever holds it.
//! 3. Run the backend with a crash guard armed; a render that never
//!    returns (panic, task cancellation) still gets counted as a
//!    failure.
//! 4. Waiters that wake to find the artifact already produced adopt it;
//!    otherwise they perform exactly one exclusive retry.

use crate::error::CoordinationError;
use crate::store::{AcquireOutcome, CoordinationStore, RenderKey, RenderPool};
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use thumbwell_core::config::CoordinatorConfig;
use tracing::{debug, warn};

/// Consecutive failures after which renders are short-circuited.
pub const FAILURE_LIMIT: u32 = 4;

/// Initial waiter poll interval; doubles up to [`MAX_POLL`].
const INITIAL_POLL: Duration = Duration::from_millis(50);
const MAX_POLL: Duration = Duration::from_millis(500);

/// Errors surfaced by [`RenderCoordinator::execute`].
#[derive(Debug, Error)]
pub enum CoordinatorError<E: fmt::Display + fmt::Debug> {
    #[error("render failure limit reached ({0} consecutive failures)")]
    FailureLimit(u32),

    #[error("timed out waiting for a concurrent render of the same thumbnail")]
    WaitTimeout,

    #[error("render pool is at capacity")]
    PoolFull,

    #[error("coordination store error: {0}")]
    Store(#[from] CoordinationError),

    #[error("{0}")]
    Work(E),
}

/// The unit of work the coordinator guards.
#[async_trait]
pub trait RenderWork: Send + Sync {
    type Output: Send;
    type Error: fmt::Display + fmt::Debug + Send;

    /// Perform the expensive render. Blocking and non-cancellable from
    /// the coordinator's point of view.
    async fn do_work(&self) -> Result<Self::Output, Self::Error>;

    /// Check whether a previous winner already produced the artifact.
    async fn cached(&self) -> Option<Self::Output>;
}

/// Guard armed before the backend call. If it drops while still armed
/// the render never returned; record the failure best-effort so crashed
/// renders count toward the limit too.
struct CrashGuard {
    store: Arc<dyn CoordinationStore>,
    key: String,
    ttl: Duration,
    armed: bool,
}

impl CrashGuard {
    fn arm(store: Arc<dyn CoordinationStore>, key: String, ttl: Duration) -> Self {
        Self {
            store,
            key,
            ttl,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let ttl = self.ttl;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                warn!(key = %key, "render terminated abnormally; recording failure");
                if let Err(e) = store.record_failure(&key, ttl).await {
                    warn!(error = %e, "failed to record abnormal-termination failure");
                }
            });
        }
    }
}

/// Stampede guard plus failure limiter around backend invocation.
pub struct RenderCoordinator {
    store: Arc<dyn CoordinationStore>,
    config: CoordinatorConfig,
}

impl RenderCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    /// Failure TTL with random jitter so many workers recording the
    /// same broken render don't all retry in the same second.
    fn jittered_ttl(&self) -> Duration {
        let jitter = if self.config.failure_ttl_jitter_secs == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.config.failure_ttl_jitter_secs)
        };
        Duration::from_secs(self.config.failure_ttl_secs + jitter)
    }

    fn pool_capacity(&self, pool: RenderPool) -> u32 {
        match pool {
            RenderPool::Standard => self.config.pool_size,
            RenderPool::Expensive => self.config.expensive_pool_size,
        }
    }

    /// Run `work` for `key`, guaranteeing at most one concurrent
    /// execution per key cluster-wide.
    pub async fn execute<W: RenderWork>(
        &self,
        key: &RenderKey,
        pool: RenderPool,
        work: &W,
    ) -> Result<W::Output, CoordinatorError<W::Error>> {
        let cache_key = key.cache_key();

        let failures = self.store.failure_count(&cache_key).await?;
        if failures >= FAILURE_LIMIT {
            debug!(key = %cache_key, failures, "short-circuiting repeatedly failing render");
            return Err(CoordinatorError::FailureLimit(FAILURE_LIMIT));
        }

        let deadline = Instant::now() + self.config.wait_timeout();
        let mut poll = INITIAL_POLL;
        let mut waited = false;

        loop {
            match self
                .store
                .acquire(
                    pool.name(),
                    &cache_key,
                    self.config.lease_ttl(),
                    self.pool_capacity(pool),
                )
                .await?
            {
                AcquireOutcome::Acquired { token } => {
                    // A waiter that finally got the slot checks whether
                    // the winner it waited on already produced the
                    // artifact before rendering again itself.
                    if waited
                        && let Some(output) = work.cached().await
                    {
                        self.store.release(pool.name(), &cache_key, token).await?;
                        return Ok(output);
                    }
                    return self.run_exclusive(&cache_key, pool, token, work).await;
                }
                AcquireOutcome::Blocked => {
                    waited = true;
                    if Instant::now() + poll > deadline {
                        return Err(CoordinatorError::WaitTimeout);
                    }
                    tokio::time::sleep(poll).await;
                    poll = (poll * 2).min(MAX_POLL);
                    // The winner may have finished; adopt its output
                    // without ever taking the slot.
                    if let Some(output) = work.cached().await {
                        return Ok(output);
                    }
                }
                AcquireOutcome::PoolFull => {
                    return Err(CoordinatorError::PoolFull);
                }
            }
        }
    }

    async fn run_exclusive<W: RenderWork>(
        &self,
        cache_key: &str,
        pool: RenderPool,
        token: i64,
        work: &W,
    ) -> Result<W::Output, CoordinatorError<W::Error>> {
        let mut guard = CrashGuard::arm(
            self.store.clone(),
            cache_key.to_string(),
            self.jittered_ttl(),
        );
        let result = work.do_work().await;
        // Disarm immediately after the call returns, whatever happened;
        // from here on failures are recorded explicitly.
        guard.disarm();

        let release = self.store.release(pool.name(), cache_key, token).await;

        match result {
            Ok(output) => {
                release?;
                // No explicit counter reset: success simply stops
                // incrementing and the TTL does the forgetting.
                Ok(output)
            }
            Err(e) => {
                let count = self
                    .store
                    .record_failure(cache_key, self.jittered_ttl())
                    .await?;
                debug!(key = %cache_key, failures = count, error = %e, "render failed");
                release?;
                Err(CoordinatorError::Work(e))
            }
        }
    }
}
