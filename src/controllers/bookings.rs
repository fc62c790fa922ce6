//! HTTP routes for booking creation, confirmation, cancellation, and lookup
//! (§6). All business logic lives in `services::booking_service`; handlers
//! here only extract, delegate, and shape the response.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::BookingError;
use crate::middleware::AuthUser;
use crate::models::booking::BookingStatus;
use crate::services::booking_service::BookingSummary;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/confirm", post(confirm_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
}

/// The upper bound on `seat_ids` length is config-dependent
/// (`MaxSeatsPerBooking`), so only the shape invariant that never changes —
/// non-empty — is validated here; the service enforces the configured max.
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    event_id: Uuid,
    #[validate(length(min = 1, message = "seat_ids must not be empty"))]
    seat_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct EventSummaryView {
    id: Uuid,
    name: String,
    start_time: chrono::DateTime<chrono::Utc>,
    venue_name: String,
    venue_city: String,
}

#[derive(Debug, Serialize)]
struct SeatLineView {
    id: Uuid,
    section: Option<String>,
    row: Option<String>,
    seat_number: Option<String>,
    price: f64,
}

#[derive(Debug, Serialize)]
struct BookingResponse {
    id: Uuid,
    booking_code: String,
    event: EventSummaryView,
    seats: Vec<SeatLineView>,
    total_amount: f64,
    status: BookingStatus,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    confirmed_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<BookingSummary> for BookingResponse {
    fn from(summary: BookingSummary) -> Self {
        BookingResponse {
            id: summary.booking.id,
            booking_code: summary.booking.booking_code,
            event: EventSummaryView {
                id: summary.event.id,
                name: summary.event.name,
                start_time: summary.event.start_time,
                venue_name: summary.venue_name,
                venue_city: summary.venue_city,
            },
            seats: summary
                .seats
                .into_iter()
                .map(|s| SeatLineView { id: s.id, section: s.section, row: s.row, seat_number: s.seat_number, price: s.price })
                .collect(),
            total_amount: summary.booking.total_amount,
            status: summary.booking.status,
            expires_at: summary.booking.expires_at,
            confirmed_at: summary.booking.confirmed_at,
            created_at: summary.booking.created_at,
            updated_at: summary.booking.updated_at,
        }
    }
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate().map_err(|e| BookingError::EventNotBookable { reason: e.to_string() })?;
    let summary = state.booking_service.create_booking(req.event_id, req.seat_ids, user.user_id).await?;
    Ok(Json(BookingResponse::from(summary)))
}

#[derive(Debug, Deserialize)]
struct ConfirmQuery {
    payment_reference: Option<String>,
}

async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<ConfirmQuery>,
) -> Result<impl IntoResponse, BookingError> {
    let summary = state.booking_service.confirm_booking(id, user.user_id, query.payment_reference).await?;
    Ok(Json(BookingResponse::from(summary)))
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let summary = state.booking_service.cancel_booking(id, user.user_id).await?;
    Ok(Json(BookingResponse::from(summary)))
}

#[derive(Debug, Deserialize)]
struct ListBookingsQuery {
    status: Option<BookingStatus>,
    skip: Option<i64>,
    limit: Option<i64>,
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListBookingsQuery>,
) -> Result<impl IntoResponse, BookingError> {
    let summaries = state
        .booking_service
        .list_bookings(user.user_id, query.status, query.skip.unwrap_or(0), query.limit.unwrap_or(20))
        .await?;
    let response: Vec<BookingResponse> = summaries.into_iter().map(BookingResponse::from).collect();
    Ok(Json(response))
}

async fn get_booking(State(state): State<Arc<AppState>>, user: AuthUser, Path(id): Path<Uuid>) -> Result<impl IntoResponse, BookingError> {
    let summary = state.booking_service.get_booking(id, user.user_id).await?;
    Ok(Json(BookingResponse::from(summary)))
}
