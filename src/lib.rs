pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod reservation;
pub mod saga;
pub mod services;

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub reservation: Arc<reservation::ReservationStore>,
    pub saga: Arc<saga::SagaOrchestrator>,
    pub metrics: Arc<metrics::MetricsCollector>,
    pub health: Arc<metrics::HealthChecker>,
    pub booking_service: Arc<services::booking_service::BookingService>,
}
