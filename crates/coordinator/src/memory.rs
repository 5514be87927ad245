//! In-process coordination store.
//!
//! Correct for a single node only: the "cluster" is this process. Used
//! by tests and by deployments that run one worker.

use crate::error::CoordinationResult;
use crate::store::{AcquireOutcome, CoordinationStore};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    /// key -> (count, expires_at)
    failures: HashMap<String, (u32, Instant)>,
    /// (pool, key) -> (token, expires_at)
    leases: HashMap<(String, String), (i64, Instant)>,
}

/// Coordination store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn failure_count(&self, key: &str) -> CoordinationResult<u32> {
        let state = self.state.lock().await;
        Ok(match state.failures.get(key) {
            Some((count, expires_at)) if *expires_at > Instant::now() => *count,
            _ => 0,
        })
    }

    async fn record_failure(&self, key: &str, ttl: Duration) -> CoordinationResult<u32> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let entry = state.failures.entry(key.to_string()).or_insert((0, now));
        if entry.1 <= now {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = now + ttl;
        Ok(entry.0)
    }

    async fn acquire(
        &self,
        pool: &str,
        key: &str,
        lease_ttl: Duration,
        capacity: u32,
    ) -> CoordinationResult<AcquireOutcome> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.leases.retain(|_, (_, expires_at)| *expires_at > now);

        let slot = (pool.to_string(), key.to_string());
        if state.leases.contains_key(&slot) {
            return Ok(AcquireOutcome::Blocked);
        }
        let in_pool = state.leases.keys().filter(|(p, _)| p == pool).count();
        if in_pool >= capacity as usize {
            return Ok(AcquireOutcome::PoolFull);
        }

        let token: i64 = rand::thread_rng().r#gen();
        state.leases.insert(slot, (token, now + lease_ttl));
        Ok(AcquireOutcome::Acquired { token })
    }

    async fn release(&self, pool: &str, key: &str, token: i64) -> CoordinationResult<()> {
        let mut state = self.state.lock().await;
        let slot = (pool.to_string(), key.to_string());
        if state.leases.get(&slot).is_some_and(|(t, _)| *t == token) {
            state.leases.remove(&slot);
        }
        Ok(())
    }
}
