//! Root API router: booking lifecycle endpoints plus health/metrics.

pub mod bookings;
pub mod health;

use axum::Router;
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().merge(bookings::routes()).merge(health::routes())
}
