//! Cache Coordinator (C5): versioned, schema-validated read-through cache
//! over event lists and event details, with targeted and bulk invalidation.

use crate::redis_client::RedisClient;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const CACHE_VERSION: &str = "v1";

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    pool: sqlx::PgPool,
}

#[derive(serde::Deserialize)]
struct CacheEntry<T> {
    data: T,
    version: String,
}

#[derive(serde::Serialize)]
struct CacheEntrySer<'a, T> {
    data: &'a T,
    cached_at: DateTime<Utc>,
    version: &'static str,
    ttl: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, pool: sqlx::PgPool) -> Self {
        Self { redis, pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    /// Deterministic 8-hex digest of canonical (already-sorted) parameters,
    /// used as the hash component of `version:prefix:hash` cache keys.
    pub fn param_hash(parts: &[&str]) -> String {
        let joined = parts.join("|");
        let digest = Sha256::digest(joined.as_bytes());
        digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
    }

    fn cache_key(prefix: &str, hash: &str) -> String {
        format!("{CACHE_VERSION}:{prefix}:{hash}")
    }

    /// Reads a cache entry, deleting and reporting a miss on version
    /// mismatch, malformed JSON, or a value that no longer deserializes
    /// into `T` (a schema change invalidates old entries automatically).
    pub async fn get<T: DeserializeOwned>(&self, prefix: &str, hash: &str) -> Option<T> {
        let key = Self::cache_key(prefix, hash);
        let mut conn = self.redis.conn.clone();
        let raw: Option<String> = conn.get(&key).await.ok()?;
        let raw = raw?;

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) if entry.version == CACHE_VERSION => Some(entry.data),
            Ok(_) => {
                debug!(key, "cache version mismatch, evicting");
                let _: Result<(), _> = conn.del(&key).await;
                None
            }
            Err(e) => {
                warn!(key, error = %e, "cache entry failed schema validation, evicting");
                let _: Result<(), _> = conn.del(&key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, prefix: &str, hash: &str, data: &T, ttl_seconds: u64) {
        let key = Self::cache_key(prefix, hash);
        let entry = CacheEntrySer { data, cached_at: Utc::now(), version: CACHE_VERSION, ttl: ttl_seconds };
        let Ok(serialized) = serde_json::to_string(&entry) else { return };
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.set_ex(&key, serialized, ttl_seconds).await;
    }

    /// Wipes every key under a prefix regardless of hash. Used for bulk
    /// invalidation (`events:*`) where enumerating exact hashes isn't
    /// worth the bookkeeping.
    async fn invalidate_prefix(&self, prefix: &str) {
        let pattern = format!("{CACHE_VERSION}:{prefix}:*");
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = match redis::cmd("KEYS").arg(&pattern).query_async(&mut conn).await {
            Ok(k) => k,
            Err(e) => {
                warn!(pattern, error = %e, "cache invalidation scan failed");
                return;
            }
        };
        if !keys.is_empty() {
            let _: Result<(), _> = conn.del(&keys).await;
        }
    }

    /// Event created or deleted: wipe every list and detail cache, since a
    /// list result anywhere may now be stale.
    pub async fn invalidate_on_event_mutation(&self) {
        self.invalidate_prefix("events").await;
        self.invalidate_prefix("event_detail").await;
        self.invalidate_prefix("event_seats").await;
    }

    /// Event updated: wipe just that event's detail/seat entries plus the
    /// list cache (a list page may embed this row's summary).
    pub async fn invalidate_on_event_update(&self, event_id: uuid::Uuid) {
        self.invalidate_prefix(&format!("event_detail*{event_id}")).await;
        self.invalidate_prefix(&format!("event_seats*{event_id}")).await;
        self.invalidate_prefix("events").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_hash_is_deterministic_and_short() {
        let a = CacheService::param_hash(&["upcoming", "10", "0"]);
        let b = CacheService::param_hash(&["upcoming", "10", "0"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn param_hash_differs_by_input() {
        let a = CacheService::param_hash(&["upcoming"]);
        let b = CacheService::param_hash(&["cancelled"]);
        assert_ne!(a, b);
    }
}
