//! Metrics & Health (C6): counters and gauges for booking operations, a
//! last-1000-sample percentile approximation, and independent dependency
//! health probes.
//!
//! Every counter mutation for a given operation happens inside one lock
//! acquisition on both the success and failure path, so the concurrency
//! gauge can never observe a half-updated state.

use crate::error::BookingErrorKind;
use crate::redis_client::RedisClient;
use serde::Serialize;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct BookingMetrics {
    total_bookings: u64,
    successful_bookings: u64,
    failed_bookings: u64,
    confirmed_bookings: u64,
    cancelled_bookings: u64,
    expired_bookings: u64,

    booking_times: Vec<Duration>,

    concurrent_bookings: u32,
    max_concurrent_bookings: u32,
    fast_store_failures: u64,
    durable_store_failures: u64,

    rate_limited_requests: u64,
    circuit_breaker_open_count: u64,
}

impl BookingMetrics {
    fn add_booking_time(&mut self, duration: Duration) {
        self.booking_times.push(duration);
        if self.booking_times.len() > 1000 {
            self.booking_times.remove(0);
        }
    }

    /// Index-based percentile, matching the source system's
    /// `sorted[int(len * p)]` approximation rather than interpolating.
    fn percentile(&self, p: f64) -> Duration {
        if self.booking_times.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = self.booking_times.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn success_rate(&self) -> f64 {
        if self.total_bookings == 0 {
            return 0.0;
        }
        (self.successful_bookings as f64 / self.total_bookings as f64) * 100.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_bookings: u64,
    pub successful_bookings: u64,
    pub failed_bookings: u64,
    pub confirmed_bookings: u64,
    pub cancelled_bookings: u64,
    pub expired_bookings: u64,
    pub success_rate_percent: f64,
    pub avg_booking_time_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub current_concurrent_bookings: u32,
    pub max_concurrent_bookings: u32,
    pub fast_store_failures: u64,
    pub durable_store_failures: u64,
    pub rate_limited_requests: u64,
    pub circuit_breaker_open_count: u64,
}

pub struct MetricsCollector {
    metrics: Mutex<BookingMetrics>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self { metrics: Mutex::new(BookingMetrics::default()) }
    }

    /// Scopes a booking operation: increments the concurrency gauge before
    /// `f` runs and decrements it exactly once on either path, recording
    /// duration and outcome in the same critical section.
    pub async fn track_booking_operation<T, E, F, Fut>(&self, operation_type: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: AsErrorKind,
    {
        {
            let mut m = self.metrics.lock().await;
            m.concurrent_bookings += 1;
            if m.concurrent_bookings > m.max_concurrent_bookings {
                m.max_concurrent_bookings = m.concurrent_bookings;
            }
        }

        let start = Instant::now();
        let result = f().await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                let mut m = self.metrics.lock().await;
                m.total_bookings += 1;
                m.successful_bookings += 1;
                m.add_booking_time(duration);
                m.concurrent_bookings -= 1;
                if duration > Duration::from_secs(5) {
                    warn!(operation_type, duration_ms = duration.as_millis(), "slow booking operation");
                }
            }
            Err(e) => {
                let kind = e.as_error_kind();
                let mut m = self.metrics.lock().await;
                m.total_bookings += 1;
                m.failed_bookings += 1;
                m.add_booking_time(duration);
                m.concurrent_bookings -= 1;
                if let Some(kind) = kind {
                    if kind.is_fast_store() {
                        m.fast_store_failures += 1;
                    } else if kind == BookingErrorKind::Internal {
                        m.durable_store_failures += 1;
                    }
                }
            }
        }

        result
    }

    pub async fn record_status_change(&self, to_status: &str) {
        let mut m = self.metrics.lock().await;
        match to_status {
            "confirmed" => m.confirmed_bookings += 1,
            "cancelled" => m.cancelled_bookings += 1,
            "expired" => m.expired_bookings += 1,
            _ => {}
        }
    }

    pub async fn record_rate_limit_hit(&self) {
        self.metrics.lock().await.rate_limited_requests += 1;
    }

    pub async fn record_circuit_breaker_open(&self) {
        self.metrics.lock().await.circuit_breaker_open_count += 1;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let m = self.metrics.lock().await;
        let avg = if m.booking_times.is_empty() {
            0.0
        } else {
            m.booking_times.iter().sum::<Duration>().as_secs_f64() * 1000.0 / m.booking_times.len() as f64
        };
        MetricsSnapshot {
            total_bookings: m.total_bookings,
            successful_bookings: m.successful_bookings,
            failed_bookings: m.failed_bookings,
            confirmed_bookings: m.confirmed_bookings,
            cancelled_bookings: m.cancelled_bookings,
            expired_bookings: m.expired_bookings,
            success_rate_percent: m.success_rate(),
            avg_booking_time_ms: avg,
            p50_ms: m.percentile(0.5).as_secs_f64() * 1000.0,
            p95_ms: m.percentile(0.95).as_secs_f64() * 1000.0,
            p99_ms: m.percentile(0.99).as_secs_f64() * 1000.0,
            current_concurrent_bookings: m.concurrent_bookings,
            max_concurrent_bookings: m.max_concurrent_bookings,
            fast_store_failures: m.fast_store_failures,
            durable_store_failures: m.durable_store_failures,
            rate_limited_requests: m.rate_limited_requests,
            circuit_breaker_open_count: m.circuit_breaker_open_count,
        }
    }

    pub async fn log_summary(&self) {
        let s = self.snapshot().await;
        info!(
            total = s.total_bookings,
            success_rate = format!("{:.2}%", s.success_rate_percent),
            p50_ms = format!("{:.1}", s.p50_ms),
            p95_ms = format!("{:.1}", s.p95_ms),
            p99_ms = format!("{:.1}", s.p99_ms),
            concurrent = s.current_concurrent_bookings,
            max_concurrent = s.max_concurrent_bookings,
            "booking metrics summary"
        );
    }
}

/// Lets `track_booking_operation` classify any error type it's called
/// with, without coupling the metrics module to `BookingError` directly.
pub trait AsErrorKind {
    fn as_error_kind(&self) -> Option<BookingErrorKind>;
}

impl AsErrorKind for crate::error::BookingError {
    fn as_error_kind(&self) -> Option<BookingErrorKind> {
        Some(self.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub response_time_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemHealth {
    pub status: &'static str,
    pub components: std::collections::HashMap<&'static str, ComponentHealth>,
}

pub struct HealthChecker {
    redis: RedisClient,
    pool: PgPool,
}

impl HealthChecker {
    pub fn new(redis: RedisClient, pool: PgPool) -> Self {
        Self { redis, pool }
    }

    async fn check_redis(&self) -> ComponentHealth {
        let start = Instant::now();
        let mut conn = self.redis.conn.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => ComponentHealth {
                status: ComponentStatus::Healthy,
                response_time_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => ComponentHealth { status: ComponentStatus::Unhealthy, response_time_ms: None, error: Some(e.to_string()) },
        }
    }

    async fn check_database(&self) -> ComponentHealth {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => ComponentHealth {
                status: ComponentStatus::Healthy,
                response_time_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => ComponentHealth { status: ComponentStatus::Unhealthy, response_time_ms: None, error: Some(e.to_string()) },
        }
    }

    pub async fn system_health(&self) -> SystemHealth {
        let (redis, database) = tokio::join!(self.check_redis(), self.check_database());

        let healthy_count = [&redis, &database].iter().filter(|c| c.status == ComponentStatus::Healthy).count();
        let status = match healthy_count {
            2 => "healthy",
            0 => "unhealthy",
            _ => "degraded",
        };

        let mut components = std::collections::HashMap::new();
        components.insert("redis", redis);
        components.insert("database", database);

        SystemHealth { status, components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_times(times: &[u64]) -> BookingMetrics {
        let mut m = BookingMetrics::default();
        for ms in times {
            m.add_booking_time(Duration::from_millis(*ms));
        }
        m
    }

    #[test]
    fn percentile_on_empty_is_zero() {
        assert_eq!(BookingMetrics::default().percentile(0.99), Duration::ZERO);
    }

    #[test]
    fn percentile_picks_index_by_truncation_not_interpolation() {
        let m = with_times(&[10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(m.percentile(0.5), Duration::from_millis(60));
        assert_eq!(m.percentile(0.95), Duration::from_millis(100));
    }

    #[test]
    fn booking_times_window_caps_at_1000_samples() {
        let mut m = BookingMetrics::default();
        for i in 0..1500u64 {
            m.add_booking_time(Duration::from_millis(i));
        }
        assert_eq!(m.booking_times.len(), 1000);
        assert_eq!(m.booking_times[0], Duration::from_millis(500));
    }

    #[test]
    fn success_rate_on_no_bookings_is_zero() {
        assert_eq!(BookingMetrics::default().success_rate(), 0.0);
    }

    #[test]
    fn success_rate_is_a_percentage() {
        let mut m = BookingMetrics::default();
        m.total_bookings = 4;
        m.successful_bookings = 3;
        assert_eq!(m.success_rate(), 75.0);
    }

    #[tokio::test]
    async fn concurrency_gauge_returns_to_zero_after_success_and_failure() {
        let collector = MetricsCollector::new();

        let _: Result<(), crate::error::BookingError> =
            collector.track_booking_operation("t", || async { Ok(()) }).await;
        let _: Result<(), crate::error::BookingError> = collector
            .track_booking_operation("t", || async { Err(crate::error::BookingError::NotFound) })
            .await;

        let snapshot = collector.snapshot().await;
        assert_eq!(snapshot.current_concurrent_bookings, 0);
        assert_eq!(snapshot.max_concurrent_bookings, 1);
        assert_eq!(snapshot.total_bookings, 2);
        assert_eq!(snapshot.successful_bookings, 1);
        assert_eq!(snapshot.failed_bookings, 1);
    }
}
