use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booking_core::{
    cache,
    config::Config,
    controllers,
    database::Database,
    metrics::{HealthChecker, MetricsCollector},
    redis_client::RedisClient,
    reservation::{circuit_breaker::CircuitBreaker, ReservationStore},
    saga::SagaOrchestrator,
    services::{booking_service::BookingService, housekeeping::HousekeepingService},
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting booking core");

    let db = Database::new(
        &config.database.url,
        config.database.pool_size,
        config.database.acquire_timeout_seconds,
        config.database.idle_timeout_seconds,
        config.database.advisory_lock_timeout_seconds,
    )
    .await
    .expect("failed to connect to database");
    info!("database connected");

    db.run_migrations().await.expect("failed to run migrations");

    let redis = RedisClient::new(&config.redis.url).await.expect("failed to connect to redis");
    info!("redis connected");

    let cache = cache::CacheService::new(redis.clone(), db.pool.clone());

    let metrics = Arc::new(MetricsCollector::new());

    let circuit_breaker = Arc::new(
        CircuitBreaker::new(
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.recovery_timeout_seconds,
            config.circuit_breaker.half_open_max_calls,
        )
        .with_metrics(metrics.clone()),
    );
    let reservation = Arc::new(ReservationStore::new(redis.clone(), circuit_breaker));
    let saga = Arc::new(SagaOrchestrator::new(db.pool.clone()));
    let health = Arc::new(HealthChecker::new(redis.clone(), db.pool.clone()));
    let db = Arc::new(db);

    let recovered = saga.recover_incomplete_sagas().await.expect("failed to recover incomplete sagas");
    if recovered > 0 {
        info!(recovered, "recovered incomplete sagas from a prior run");
    }

    let booking_service = Arc::new(BookingService::new(
        db.clone(),
        reservation.clone(),
        saga.clone(),
        metrics.clone(),
        config.booking.clone(),
    ));

    let app_state = Arc::new(AppState {
        db: (*db).clone(),
        redis: redis.clone(),
        cache,
        config: config.clone(),
        reservation: reservation.clone(),
        saga: saga.clone(),
        metrics: metrics.clone(),
        health,
        booking_service,
    });

    let housekeeping = HousekeepingService::new(reservation, saga, metrics);
    tokio::spawn(housekeeping.run());

    let app = Router::new()
        .merge(controllers::routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service()).await.unwrap();
}
