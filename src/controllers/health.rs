//! System health aggregate and operator-facing metrics snapshot (§6, §4.6).

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health)).route("/metrics", get(metrics))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.system_health().await;
    Json(health)
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot().await)
}
