//! Durable Store Session (C2): pooled Postgres connections, advisory locks,
//! and the transaction boundary every write path runs inside.

use md5::{Digest, Md5};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    advisory_lock_timeout_seconds: u32,
}

impl Database {
    pub async fn new(
        database_url: &str,
        pool_size: u32,
        acquire_timeout_seconds: u64,
        idle_timeout_seconds: u64,
        advisory_lock_timeout_seconds: u32,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(idle_timeout_seconds))
            .connect(database_url)
            .await?;

        Ok(Database { pool, advisory_lock_timeout_seconds })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Opens a transaction. Callers are responsible for `commit()`/`rollback()`
    /// — dropping the guard without committing rolls back implicitly.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Acquires a session-scoped advisory lock, retrying with exponential
    /// backoff (`min(0.1 * 2^attempt, 1.0)` seconds) up to
    /// `advisory_lock_timeout_seconds` attempts. Returns `false` rather than
    /// erroring on exhaustion — callers treat that as "resource busy".
    pub async fn acquire_advisory_lock(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        lock_id: i32,
    ) -> Result<bool, sqlx::Error> {
        let mut acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(lock_id)
            .fetch_one(&mut **tx)
            .await?;

        if !acquired {
            for attempt in 0..self.advisory_lock_timeout_seconds {
                let backoff_ms = (100f64 * 2f64.powi(attempt as i32)).min(1000.0) as u64;
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                acquired = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
                    .bind(lock_id)
                    .fetch_one(&mut **tx)
                    .await?;
                if acquired {
                    break;
                }
            }
        }

        if acquired {
            debug!(lock_id, "advisory lock acquired");
        } else {
            warn!(lock_id, "failed to acquire advisory lock within timeout");
        }
        Ok(acquired)
    }

    /// Releases a session-level advisory lock. Transaction-scoped locks
    /// (`pg_try_advisory_xact_lock`) release automatically at commit/rollback;
    /// this is kept for the session-level variant used outside a transaction.
    pub async fn release_advisory_lock(&self, pool: &PgPool, lock_id: i32) -> Result<bool, sqlx::Error> {
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .fetch_one(pool)
            .await?;
        if !released {
            warn!(lock_id, "advisory lock was not held");
        }
        Ok(released)
    }

    /// Logs and swallows a transaction-failure path for callers that only
    /// need the rollback side effect plus a structured log line.
    pub fn log_transaction_failure(context: &str, error: &sqlx::Error) {
        error!(context, error = %error, "transaction failed, rolling back");
    }
}

/// Derives a stable 32-bit signed lock id from a resource type and id, the
/// same way for every caller so unrelated resources never collide by luck.
pub fn generate_lock_id(resource_type: &str, resource_id: &str) -> i32 {
    let lock_string = format!("{resource_type}:{resource_id}");
    let digest = Md5::digest(lock_string.as_bytes());
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_id_is_deterministic() {
        let a = generate_lock_id("event", "11111111-1111-1111-1111-111111111111");
        let b = generate_lock_id("event", "11111111-1111-1111-1111-111111111111");
        assert_eq!(a, b);
    }

    #[test]
    fn lock_id_differs_by_resource_type() {
        let a = generate_lock_id("event", "same-id");
        let b = generate_lock_id("seat", "same-id");
        assert_ne!(a, b);
    }
}
