//! SQLite-backed coordination store.
//!
//! One database file shared by every worker in the cluster. SQLite's
//! write serialization provides the atomicity the counters and leases
//! need; WAL mode plus a busy timeout keeps concurrent workers from
//! tripping over "database is locked".

use crate::error::CoordinationResult;
use crate::store::{AcquireOutcome, CoordinationStore};
use async_trait::async_trait;
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Coordination store over a shared SQLite database.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

impl SqliteStore {
    /// Open (or create) the store at the given path and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> CoordinationResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::CoordinationError::Config(e.to_string()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes this process's writes; cross
        // process serialization comes from SQLite itself.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> CoordinationResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS render_failures (
                key TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS render_leases (
                pool TEXT NOT NULL,
                key TEXT NOT NULL,
                token INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (pool, key)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn failure_count(&self, key: &str) -> CoordinationResult<u32> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM render_failures WHERE key = ?1 AND expires_at > ?2",
        )
        .bind(key)
        .bind(now_unix())
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0).max(0) as u32)
    }

    async fn record_failure(&self, key: &str, ttl: Duration) -> CoordinationResult<u32> {
        let now = now_unix();
        let expires_at = now + ttl.as_secs() as i64;
        // An expired row restarts at 1 instead of continuing the old
        // streak; expiry is the only reset there is.
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO render_failures (key, count, expires_at) VALUES (?1, 1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                 count = CASE
                     WHEN render_failures.expires_at <= ?3 THEN 1
                     ELSE render_failures.count + 1
                 END,
                 expires_at = ?2
             RETURNING count",
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn acquire(
        &self,
        pool: &str,
        key: &str,
        lease_ttl: Duration,
        capacity: u32,
    ) -> CoordinationResult<AcquireOutcome> {
        let now = now_unix();
        sqlx::query("DELETE FROM render_leases WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let token: i64 = rand::thread_rng().r#gen();
        let expires_at = now + lease_ttl.as_secs() as i64;

        // Atomic slot grab: the insert succeeds only when the key is
        // free and the pool has headroom.
        let inserted = sqlx::query(
            "INSERT INTO render_leases (pool, key, token, expires_at)
             SELECT ?1, ?2, ?3, ?4
             WHERE (SELECT COUNT(*) FROM render_leases WHERE pool = ?1) < ?5
             ON CONFLICT(pool, key) DO NOTHING",
        )
        .bind(pool)
        .bind(key)
        .bind(token)
        .bind(expires_at)
        .bind(i64::from(capacity))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(AcquireOutcome::Acquired { token });
        }

        let held: Option<i64> =
            sqlx::query_scalar("SELECT token FROM render_leases WHERE pool = ?1 AND key = ?2")
                .bind(pool)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(if held.is_some() {
            AcquireOutcome::Blocked
        } else {
            AcquireOutcome::PoolFull
        })
    }

    async fn release(&self, pool: &str, key: &str, token: i64) -> CoordinationResult<()> {
        sqlx::query("DELETE FROM render_leases WHERE pool = ?1 AND key = ?2 AND token = ?3")
            .bind(pool)
            .bind(key)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let temp = tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("coordination.db"))
            .await
            .expect("open store");
        (temp, store)
    }

    #[tokio::test]
    async fn counter_upsert_semantics() {
        let (_temp, store) = store().await;
        let ttl = Duration::from_secs(60);
        assert_eq!(store.failure_count("k").await.unwrap(), 0);
        assert_eq!(store.record_failure("k", ttl).await.unwrap(), 1);
        assert_eq!(store.record_failure("k", ttl).await.unwrap(), 2);
        assert_eq!(store.record_failure("k", ttl).await.unwrap(), 3);
        assert_eq!(store.failure_count("k").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn expired_counter_restarts() {
        let (_temp, store) = store().await;
        store.record_failure("k", Duration::ZERO).await.unwrap();
        assert_eq!(store.failure_count("k").await.unwrap(), 0);
        assert_eq!(
            store.record_failure("k", Duration::from_secs(60)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn lease_exclusivity_and_release() {
        let (_temp, store) = store().await;
        let ttl = Duration::from_secs(30);

        let AcquireOutcome::Acquired { token } =
            store.acquire("render", "k", ttl, 8).await.unwrap()
        else {
            panic!("first acquire should win");
        };
        assert_eq!(
            store.acquire("render", "k", ttl, 8).await.unwrap(),
            AcquireOutcome::Blocked
        );
        assert!(matches!(
            store.acquire("render", "other", ttl, 8).await.unwrap(),
            AcquireOutcome::Acquired { .. }
        ));

        store.release("render", "k", token).await.unwrap();
        assert!(matches!(
            store.acquire("render", "k", ttl, 8).await.unwrap(),
            AcquireOutcome::Acquired { .. }
        ));
    }

    #[tokio::test]
    async fn pool_capacity_counts_live_leases() {
        let (_temp, store) = store().await;
        let ttl = Duration::from_secs(30);
        for i in 0..2 {
            assert!(matches!(
                store
                    .acquire("render-expensive", &format!("k{i}"), ttl, 2)
                    .await
                    .unwrap(),
                AcquireOutcome::Acquired { .. }
            ));
        }
        assert_eq!(
            store.acquire("render-expensive", "k9", ttl, 2).await.unwrap(),
            AcquireOutcome::PoolFull
        );
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let (_temp, store) = store().await;
        assert!(matches!(
            store.acquire("render", "k", Duration::ZERO, 8).await.unwrap(),
            AcquireOutcome::Acquired { .. }
        ));
        assert!(matches!(
            store.acquire("render", "k", Duration::from_secs(30), 8).await.unwrap(),
            AcquireOutcome::Acquired { .. }
        ));
    }
}
