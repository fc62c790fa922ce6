use serde::Deserialize;
use std::env;

// Top-level configuration container.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub booking: BookingConfig,
    pub cache: CacheConfig,
    pub features: FeatureFlags,
}

// Application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Durable store settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub advisory_lock_timeout_seconds: u32,
}

// Fast store settings
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
}

// Circuit breaker settings guarding the fast store
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub half_open_max_calls: u32,
}

/// Booking-specific tunables, defaults mirroring the source system's settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub expiration_minutes: i64,
    /// Soft-reservation TTL in the fast store; expiry is a safety net, not
    /// the primary release path.
    pub reservation_ttl_seconds: u64,
    /// Distributed-lock TTL; holders extend it if held longer.
    pub seat_lock_ttl_seconds: u64,
    pub max_seats_per_booking: usize,
    pub bookings_per_user_per_minute: u32,
    pub rate_limit_public_per_minute: u32,
    pub rate_limit_auth_per_minute: u32,
    pub cancellation_window_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub version: String,
    pub ttl_events_seconds: u64,
    pub ttl_event_detail_seconds: u64,
}

// Feature flags for toggling functionality
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_rate_limiting: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> T
where
    T::Err: std::fmt::Debug,
{
    env_or(key, default)
        .parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid value: {e:?}"))
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: parse_env("PORT", "8000"),
                environment: env_or("ENVIRONMENT", "development"),
                rust_log: env_or("RUST_LOG", "booking_core=info,tower_http=info"),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: parse_env("DB_POOL_SIZE", "20"),
                acquire_timeout_seconds: parse_env("DB_ACQUIRE_TIMEOUT_SECONDS", "1"),
                idle_timeout_seconds: parse_env("DB_IDLE_TIMEOUT_SECONDS", "300"),
                advisory_lock_timeout_seconds: parse_env("DB_ADVISORY_LOCK_TIMEOUT_SECONDS", "30"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
                pool_size: parse_env("REDIS_POOL_SIZE", "20"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_env("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5"),
                recovery_timeout_seconds: parse_env("CIRCUIT_BREAKER_RECOVERY_TIMEOUT_SECONDS", "60"),
                half_open_max_calls: parse_env("CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS", "3"),
            },
            booking: BookingConfig {
                expiration_minutes: parse_env("BOOKING_EXPIRATION_MINUTES", "5"),
                reservation_ttl_seconds: parse_env("RESERVATION_TTL_SECONDS", "600"),
                seat_lock_ttl_seconds: parse_env("SEAT_LOCK_TTL_SECONDS", "300"),
                max_seats_per_booking: parse_env("MAX_SEATS_PER_BOOKING", "10"),
                bookings_per_user_per_minute: parse_env("BOOKINGS_PER_USER_PER_MINUTE", "5"),
                rate_limit_public_per_minute: parse_env("RATE_LIMIT_PUBLIC_PER_MINUTE", "100"),
                rate_limit_auth_per_minute: parse_env("RATE_LIMIT_AUTH_PER_MINUTE", "200"),
                cancellation_window_hours: parse_env("CANCELLATION_WINDOW_HOURS", "24"),
            },
            cache: CacheConfig {
                version: env_or("CACHE_VERSION", "v1"),
                ttl_events_seconds: parse_env("CACHE_TTL_EVENTS", "300"),
                ttl_event_detail_seconds: parse_env("CACHE_TTL_EVENT_DETAIL", "300"),
            },
            features: FeatureFlags {
                enable_rate_limiting: parse_env("ENABLE_RATE_LIMITING", "true"),
            },
        }
    }
}
