//! Crate-wide error taxonomy.
//!
//! Only `BookingService` (see `services::booking_service`) translates low-level
//! failures into these kinds; everything below it propagates `anyhow::Error`
//! or a store-specific error and gets folded into `Internal` at that boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("rate limit exceeded: {current}/{limit} in the current window")]
    RateLimited { limit: u32, current: u32, window_seconds: u32 },

    #[error("reservation store unavailable")]
    ReservationUnavailable { retry_after_seconds: u32 },

    #[error("seats unavailable: {seat_ids:?}")]
    SeatsUnavailable { seat_ids: Vec<Uuid> },

    #[error("event is not bookable")]
    EventNotBookable { reason: String },

    #[error("booking expired at {expired_at}")]
    BookingExpired { booking_id: Uuid, expired_at: chrono::DateTime<chrono::Utc> },

    #[error("cancellation window closed")]
    CancellationWindowClosed,

    #[error("not found")]
    NotFound,

    #[error("internal error, reference {reference}")]
    Internal { reference: String },
}

impl BookingError {
    /// Wraps an unclassified failure, stamping it with a short opaque
    /// reference that also appears in the log line so operators can
    /// correlate a support ticket with the exact error.
    pub fn internal(context: &str, source: impl std::fmt::Display) -> Self {
        let reference = format!("err_{}", Uuid::new_v4().simple().to_string().get(..8).unwrap_or("00000000"));
        tracing::error!(reference = %reference, context, error = %source, "internal booking error");
        BookingError::Internal { reference }
    }

    pub fn kind(&self) -> BookingErrorKind {
        match self {
            BookingError::RateLimited { .. } => BookingErrorKind::RateLimited,
            BookingError::ReservationUnavailable { .. } => BookingErrorKind::ReservationUnavailable,
            BookingError::SeatsUnavailable { .. } => BookingErrorKind::SeatsUnavailable,
            BookingError::EventNotBookable { .. } => BookingErrorKind::EventNotBookable,
            BookingError::BookingExpired { .. } => BookingErrorKind::BookingExpired,
            BookingError::CancellationWindowClosed => BookingErrorKind::CancellationWindowClosed,
            BookingError::NotFound => BookingErrorKind::NotFound,
            BookingError::Internal { .. } => BookingErrorKind::Internal,
        }
    }
}

/// A typed classification independent of the error's payload, used by the
/// metrics collector instead of substring-matching an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingErrorKind {
    RateLimited,
    ReservationUnavailable,
    SeatsUnavailable,
    EventNotBookable,
    BookingExpired,
    CancellationWindowClosed,
    NotFound,
    Internal,
}

impl BookingErrorKind {
    /// Whether this failure originated from the fast store (reservation
    /// store / circuit breaker) as opposed to the durable store, for the
    /// metrics collector's redis-vs-database failure counters.
    pub fn is_fast_store(self) -> bool {
        matches!(self, BookingErrorKind::ReservationUnavailable)
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let (status, error_type, body) = match &self {
            BookingError::RateLimited { limit, current, window_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                json!({ "limit": limit, "current": current, "window_seconds": window_seconds }),
            ),
            BookingError::ReservationUnavailable { retry_after_seconds } => (
                StatusCode::LOCKED,
                "reservation_failed",
                json!({ "retry_after": retry_after_seconds }),
            ),
            BookingError::SeatsUnavailable { seat_ids } => (
                StatusCode::CONFLICT,
                "seats_unavailable",
                json!({ "unavailable_seats": seat_ids, "suggest_alternatives": true }),
            ),
            BookingError::EventNotBookable { reason } => (
                StatusCode::BAD_REQUEST,
                "event_not_bookable",
                json!({ "reason": reason }),
            ),
            BookingError::BookingExpired { booking_id, expired_at } => (
                StatusCode::GONE,
                "booking_expired",
                json!({ "booking_id": booking_id, "expired_at": expired_at }),
            ),
            BookingError::CancellationWindowClosed => (
                StatusCode::BAD_REQUEST,
                "cancellation_window_closed",
                json!({}),
            ),
            BookingError::NotFound => (StatusCode::NOT_FOUND, "not_found", json!({})),
            BookingError::Internal { reference } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                json!({ "support_reference": reference }),
            ),
        };

        let mut payload = json!({
            "error_type": error_type,
            "message": self.to_string(),
        });
        if let (Some(obj), Some(extra)) = (payload.as_object_mut(), body.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_reservation_unavailable_is_fast_store() {
        let kinds = [
            BookingErrorKind::RateLimited,
            BookingErrorKind::ReservationUnavailable,
            BookingErrorKind::SeatsUnavailable,
            BookingErrorKind::EventNotBookable,
            BookingErrorKind::BookingExpired,
            BookingErrorKind::CancellationWindowClosed,
            BookingErrorKind::NotFound,
            BookingErrorKind::Internal,
        ];
        let fast_store: Vec<_> = kinds.iter().copied().filter(|k| k.is_fast_store()).collect();
        assert_eq!(fast_store, vec![BookingErrorKind::ReservationUnavailable]);
    }

    #[test]
    fn kind_mapping_is_exhaustive_and_distinct() {
        let booking_id = Uuid::new_v4();
        let errors = vec![
            (BookingError::RateLimited { limit: 1, current: 2, window_seconds: 60 }, BookingErrorKind::RateLimited),
            (BookingError::ReservationUnavailable { retry_after_seconds: 1 }, BookingErrorKind::ReservationUnavailable),
            (BookingError::SeatsUnavailable { seat_ids: vec![] }, BookingErrorKind::SeatsUnavailable),
            (BookingError::EventNotBookable { reason: "x".into() }, BookingErrorKind::EventNotBookable),
            (BookingError::BookingExpired { booking_id, expired_at: chrono::Utc::now() }, BookingErrorKind::BookingExpired),
            (BookingError::CancellationWindowClosed, BookingErrorKind::CancellationWindowClosed),
            (BookingError::NotFound, BookingErrorKind::NotFound),
            (BookingError::Internal { reference: "err_deadbeef".into() }, BookingErrorKind::Internal),
        ];
        for (err, expected) in errors {
            assert_eq!(err.kind(), expected);
        }
    }

    #[test]
    fn internal_reference_is_short_and_prefixed() {
        let err = BookingError::internal("test_ctx", "boom");
        match err {
            BookingError::Internal { reference } => {
                assert!(reference.starts_with("err_"));
                assert_eq!(reference.len(), "err_".len() + 8);
            }
            _ => panic!("expected Internal variant"),
        }
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = BookingError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let response = BookingError::RateLimited { limit: 5, current: 6, window_seconds: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn booking_expired_maps_to_410() {
        let response =
            BookingError::BookingExpired { booking_id: Uuid::new_v4(), expired_at: chrono::Utc::now() }.into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
