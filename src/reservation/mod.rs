//! Reservation Store Client (C1): millisecond-latency contention arbitration
//! and rate limiting in front of the durable store.
//!
//! Every write that must be atomic runs as a single Lua script so a check
//! and its corresponding write can never be split across round trips.

pub mod circuit_breaker;

use crate::redis_client::RedisClient;
use circuit_breaker::CircuitBreaker;
use redis::{AsyncCommands, Script};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("reservation store circuit breaker is open")]
    CircuitOpen,
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("duplicate seat id in request")]
    DuplicateSeatId,
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn reservation_key(event_id: Uuid, seat_id: Uuid) -> String {
    format!("seat:reserved:{event_id}:{seat_id}")
}

fn lock_key(resource: &str) -> String {
    format!("lock:{resource}")
}

fn rate_key(key: &str) -> String {
    format!("rate:{key}")
}

/// All-or-nothing seat reservation. Sorts seat ids so every caller locks in
/// the same order; checks every key for existence before writing any of
/// them, accumulating every already-held key instead of stopping at the
/// first so the caller gets the full blocking subset.
const RESERVE_SEATS_SCRIPT: &str = r#"
local n = #KEYS
local held = {}
for i = 1, n do
    if redis.call('EXISTS', KEYS[i]) == 1 then
        table.insert(held, KEYS[i])
    end
end
if #held > 0 then
    return {0, held}
end
for i = 1, n do
    redis.call('SET', KEYS[i], ARGV[1], 'EX', ARGV[2])
    local meta_key = KEYS[i] .. ':meta'
    redis.call('HSET', meta_key, 'user_id', ARGV[1], 'reserved_at', ARGV[3], 'event_id', ARGV[4])
    redis.call('EXPIRE', meta_key, ARGV[2])
end
return {1, {}}
"#;

const RELEASE_SEATS_SCRIPT: &str = r#"
local released = 0
for i = 1, #KEYS do
    if redis.call('GET', KEYS[i]) == ARGV[1] then
        redis.call('DEL', KEYS[i])
        redis.call('DEL', KEYS[i] .. ':meta')
        released = released + 1
    end
end
return released
"#;

const EXTEND_SEATS_SCRIPT: &str = r#"
for i = 1, #KEYS do
    if redis.call('GET', KEYS[i]) ~= ARGV[1] then
        return 0
    end
end
for i = 1, #KEYS do
    redis.call('EXPIRE', KEYS[i], ARGV[2])
    redis.call('HSET', KEYS[i] .. ':meta', 'extended_at', ARGV[3])
    redis.call('EXPIRE', KEYS[i] .. ':meta', ARGV[2])
end
return 1
"#;

const ACQUIRE_LOCK_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2]) then
    redis.call('HSET', KEYS[2], 'owner', ARGV[1], 'acquired_at', ARGV[3], 'ttl', ARGV[2])
    redis.call('EXPIRE', KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
    redis.call('DEL', KEYS[2])
    return 1
end
return 0
"#;

const EXTEND_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    redis.call('HSET', KEYS[2], 'extended_at', ARGV[3], 'ttl', ARGV[2])
    redis.call('EXPIRE', KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

/// Sliding-window rate limit: prune entries older than the window, count
/// what remains, and only record the current call if still under budget.
const RATE_LIMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window_ms)
local current = redis.call('ZCARD', key)
if current < limit then
    redis.call('ZADD', key, now, ARGV[4])
    redis.call('EXPIRE', key, math.ceil(window_ms / 1000) + 1)
    return {0, current + 1}
end
return {1, current}
"#;

pub struct LockInfo {
    pub owner: String,
    pub ttl_seconds: u64,
    pub acquired_at: Option<String>,
    pub extended_at: Option<String>,
}

#[derive(Clone)]
pub struct ReservationStore {
    redis: RedisClient,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl ReservationStore {
    pub fn new(redis: RedisClient, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self { redis, circuit_breaker }
    }

    /// Runs `f` only if the breaker is closed/half-open, recording the
    /// outcome on the breaker either way.
    async fn guarded<T, F, Fut>(&self, f: F) -> Result<T, ReservationError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, redis::RedisError>>,
    {
        if !self.circuit_breaker.can_execute() {
            return Err(ReservationError::CircuitOpen);
        }
        match f().await {
            Ok(v) => {
                self.circuit_breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                error!(error = %e, "reservation store call failed");
                Err(ReservationError::Redis(e))
            }
        }
    }

    fn ensure_unique(seat_ids: &[Uuid]) -> Result<(), ReservationError> {
        let mut sorted = seat_ids.to_vec();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != seat_ids.len() {
            return Err(ReservationError::DuplicateSeatId);
        }
        Ok(())
    }

    /// Returns `(ok, failed_seat_ids)`. On success every seat id is held by
    /// `holder_id` for `ttl_seconds`; on failure nothing is held.
    pub async fn reserve_seats(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        holder_id: &str,
        ttl_seconds: u64,
    ) -> Result<(bool, Vec<Uuid>), ReservationError> {
        Self::ensure_unique(seat_ids)?;
        let mut sorted = seat_ids.to_vec();
        sorted.sort();
        let keys: Vec<String> = sorted.iter().map(|id| reservation_key(event_id, *id)).collect();
        let now = now_millis();

        let mut conn = self.redis.conn.clone();
        let script = Script::new(RESERVE_SEATS_SCRIPT);
        let result: (i32, Vec<String>) = self
            .guarded(|| async {
                let mut invocation = script.prepare_invoke();
                for key in &keys {
                    invocation = invocation.key(key);
                }
                invocation
                    .arg(holder_id)
                    .arg(ttl_seconds)
                    .arg(now)
                    .arg(event_id.to_string())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        if result.0 == 1 {
            Ok((true, vec![]))
        } else {
            let failed = result
                .1
                .iter()
                .filter_map(|held_key| keys.iter().position(|k| k == held_key).map(|idx| sorted[idx]))
                .collect();
            Ok((false, failed))
        }
    }

    pub async fn verify_reservation(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        holder_id: &str,
    ) -> Result<bool, ReservationError> {
        let keys: Vec<String> = seat_ids.iter().map(|id| reservation_key(event_id, *id)).collect();
        let mut conn = self.redis.conn.clone();
        let values: Vec<Option<String>> = self
            .guarded(|| async {
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.get(key);
                }
                pipe.query_async(&mut conn).await
            })
            .await?;
        Ok(values.iter().all(|v| v.as_deref() == Some(holder_id)))
    }

    pub async fn release_reservation(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        holder_id: &str,
    ) -> Result<u32, ReservationError> {
        let keys: Vec<String> = seat_ids.iter().map(|id| reservation_key(event_id, *id)).collect();
        let mut conn = self.redis.conn.clone();
        let script = Script::new(RELEASE_SEATS_SCRIPT);
        self.guarded(|| async {
            let mut invocation = script.prepare_invoke();
            for key in &keys {
                invocation = invocation.key(key);
            }
            invocation.arg(holder_id).invoke_async(&mut conn).await
        })
        .await
    }

    pub async fn extend_reservation(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        holder_id: &str,
        ttl_seconds: u64,
    ) -> Result<bool, ReservationError> {
        let keys: Vec<String> = seat_ids.iter().map(|id| reservation_key(event_id, *id)).collect();
        let mut conn = self.redis.conn.clone();
        let script = Script::new(EXTEND_SEATS_SCRIPT);
        let result: i32 = self
            .guarded(|| async {
                let mut invocation = script.prepare_invoke();
                for key in &keys {
                    invocation = invocation.key(key);
                }
                invocation
                    .arg(holder_id)
                    .arg(ttl_seconds)
                    .arg(now_millis())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(result == 1)
    }

    pub async fn acquire_lock(
        &self,
        resource: &str,
        holder_id: &str,
        ttl_seconds: u64,
    ) -> Result<Option<String>, ReservationError> {
        let key = lock_key(resource);
        let meta_key = format!("{key}:meta");
        let mut conn = self.redis.conn.clone();
        let script = Script::new(ACQUIRE_LOCK_SCRIPT);
        let acquired: i32 = self
            .guarded(|| async {
                script
                    .prepare_invoke()
                    .key(&key)
                    .key(&meta_key)
                    .arg(holder_id)
                    .arg(ttl_seconds)
                    .arg(now_millis())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(if acquired == 1 { Some(holder_id.to_string()) } else { None })
    }

    pub async fn release_lock(&self, resource: &str, holder_id: &str) -> Result<bool, ReservationError> {
        let key = lock_key(resource);
        let meta_key = format!("{key}:meta");
        let mut conn = self.redis.conn.clone();
        let script = Script::new(RELEASE_LOCK_SCRIPT);
        let released: i32 = self
            .guarded(|| async {
                script
                    .prepare_invoke()
                    .key(&key)
                    .key(&meta_key)
                    .arg(holder_id)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(released == 1)
    }

    pub async fn extend_lock(&self, resource: &str, holder_id: &str, ttl_seconds: u64) -> Result<bool, ReservationError> {
        let key = lock_key(resource);
        let meta_key = format!("{key}:meta");
        let mut conn = self.redis.conn.clone();
        let script = Script::new(EXTEND_LOCK_SCRIPT);
        let extended: i32 = self
            .guarded(|| async {
                script
                    .prepare_invoke()
                    .key(&key)
                    .key(&meta_key)
                    .arg(holder_id)
                    .arg(ttl_seconds)
                    .arg(now_millis())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(extended == 1)
    }

    pub async fn lock_info(&self, resource: &str) -> Result<Option<LockInfo>, ReservationError> {
        let key = lock_key(resource);
        let meta_key = format!("{key}:meta");
        let mut conn = self.redis.conn.clone();
        let owner: Option<String> = self.guarded(|| async { conn.get(&key).await }).await?;
        let Some(owner) = owner else { return Ok(None) };

        let mut conn = self.redis.conn.clone();
        let meta: std::collections::HashMap<String, String> =
            self.guarded(|| async { conn.hgetall(&meta_key).await }).await?;
        Ok(Some(LockInfo {
            owner,
            ttl_seconds: meta.get("ttl").and_then(|v| v.parse().ok()).unwrap_or(0),
            acquired_at: meta.get("acquired_at").cloned(),
            extended_at: meta.get("extended_at").cloned(),
        }))
    }

    pub async fn is_locked(&self, resource: &str) -> Result<bool, ReservationError> {
        let key = lock_key(resource);
        let mut conn = self.redis.conn.clone();
        let exists: bool = self.guarded(|| async { conn.exists(&key).await }).await?;
        Ok(exists)
    }

    /// Sliding-window rate limit. Fails open: if the store is unreachable,
    /// the circuit breaker records the failure but the caller is told it is
    /// not limited, trading precision for availability.
    pub async fn is_rate_limited(&self, key: &str, limit: u32, window_seconds: u32) -> (bool, u32) {
        let rate_key = rate_key(key);
        let unique_member = Uuid::new_v4().to_string();
        let now = now_millis();
        let window_ms = (window_seconds as i64) * 1000;

        let mut conn = self.redis.conn.clone();
        let script = Script::new(RATE_LIMIT_SCRIPT);
        let result = self
            .guarded(|| async {
                script
                    .prepare_invoke()
                    .key(&rate_key)
                    .arg(now)
                    .arg(window_ms)
                    .arg(limit)
                    .arg(&unique_member)
                    .invoke_async::<(i32, i64)>(&mut conn)
                    .await
            })
            .await;

        match result {
            Ok((limited, current)) => (limited == 1, current.max(0) as u32),
            Err(e) => {
                warn!(error = %e, "rate limit check failed, failing open");
                (false, 0)
            }
        }
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<i32, ReservationError> {
        let mut conn = self.redis.conn.clone();
        self.guarded(|| async { conn.publish(channel, message).await }).await
    }

    /// Scans orphaned lock-metadata hashes (whose primary lock key has
    /// already expired) and deletes them. Housekeeping only; never on the
    /// booking hot path.
    pub async fn cleanup_expired_locks(&self) -> Result<u32, ReservationError> {
        let mut conn = self.redis.conn.clone();
        let meta_keys: Vec<String> = self
            .guarded(|| async { redis::cmd("KEYS").arg("lock:*:meta").query_async(&mut conn).await })
            .await?;

        let mut cleaned = 0u32;
        for meta_key in meta_keys {
            let Some(primary_key) = meta_key.strip_suffix(":meta") else { continue };
            let mut conn = self.redis.conn.clone();
            let exists: bool = self.guarded(|| async { conn.exists(primary_key).await }).await?;
            if !exists {
                let mut conn = self.redis.conn.clone();
                let _: Result<(), _> = self.guarded(|| async { conn.del(&meta_key).await }).await;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_distinct_seat_ids() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        assert!(ReservationStore::ensure_unique(&ids).is_ok());
    }

    #[test]
    fn rejects_duplicate_seat_ids() {
        let id = Uuid::new_v4();
        let ids = vec![id, Uuid::new_v4(), id];
        assert!(matches!(ReservationStore::ensure_unique(&ids), Err(ReservationError::DuplicateSeatId)));
    }

    #[test]
    fn accepts_empty_seat_list() {
        assert!(ReservationStore::ensure_unique(&[]).is_ok());
    }

    #[test]
    fn reservation_key_is_namespaced_by_event_and_seat() {
        let event_id = Uuid::new_v4();
        let seat_id = Uuid::new_v4();
        let key = reservation_key(event_id, seat_id);
        assert_eq!(key, format!("seat:reserved:{event_id}:{seat_id}"));
    }

    #[test]
    fn lock_key_and_rate_key_are_namespaced() {
        assert_eq!(lock_key("event:123"), "lock:event:123");
        assert_eq!(rate_key("user:123:bookings"), "rate:user:123:bookings");
    }
}
