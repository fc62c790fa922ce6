//! Booking Service (C4): the only component that translates low-level
//! failures into the crate's error taxonomy. Everything below this layer
//! speaks `anyhow`/store-specific errors; everything above speaks
//! `BookingError`.

use crate::config::BookingConfig;
use crate::database::Database;
use crate::error::BookingError;
use crate::metrics::MetricsCollector;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::event::Event;
use crate::models::seat::SeatStatus;
use crate::reservation::ReservationStore;
use crate::saga::booking_saga::{create_booking_saga, BookingSagaOutcome};
use crate::saga::SagaOrchestrator;
use chrono::Utc;
use serde::Serialize;
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

/// A single seat line in a booking summary response: the seat's identity
/// fields plus the price that was pinned into `booking_seats` at booking
/// time, not the seat's current (possibly since-changed) price.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BookingSeatLine {
    pub id: Uuid,
    pub section: Option<String>,
    pub row: Option<String>,
    pub seat_number: Option<String>,
    pub price: f64,
}

pub struct BookingSummary {
    pub booking: Booking,
    pub event: Event,
    pub venue_name: String,
    pub venue_city: String,
    pub seats: Vec<BookingSeatLine>,
}

/// Shape validation for an incoming `seat_ids` list: non-empty, no longer
/// than the configured max, and free of duplicates. Pulled out of
/// `create_booking` so the boundary behaviour is checkable without a
/// database.
fn validate_seat_ids(seat_ids: &[Uuid], max_seats_per_booking: usize) -> Result<(), BookingError> {
    if seat_ids.is_empty() || seat_ids.len() > max_seats_per_booking {
        return Err(BookingError::EventNotBookable {
            reason: format!("seat_ids length must be between 1 and {max_seats_per_booking}"),
        });
    }
    let mut deduped = seat_ids.to_vec();
    deduped.sort();
    deduped.dedup();
    if deduped.len() != seat_ids.len() {
        return Err(BookingError::EventNotBookable { reason: "seat_ids must be unique".to_string() });
    }
    Ok(())
}

/// Clamp for `list_bookings` pagination: `skip` floors at 0, `limit` is
/// bounded to `[1, 20]` regardless of what the caller asked for.
fn clamp_pagination(skip: i64, limit: i64) -> (i64, i64) {
    (skip.max(0), limit.clamp(1, 20))
}

pub struct BookingService {
    db: Arc<Database>,
    reservation: Arc<ReservationStore>,
    saga: Arc<SagaOrchestrator>,
    metrics: Arc<MetricsCollector>,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(
        db: Arc<Database>,
        reservation: Arc<ReservationStore>,
        saga: Arc<SagaOrchestrator>,
        metrics: Arc<MetricsCollector>,
        config: BookingConfig,
    ) -> Self {
        Self { db, reservation, saga, metrics, config }
    }

    /// Rate-limits on `{userId, "bookings"}`, then runs the two-step
    /// creation saga and loads the durable rows it just committed.
    pub async fn create_booking(
        &self,
        event_id: Uuid,
        seat_ids: Vec<Uuid>,
        user_id: Uuid,
    ) -> Result<BookingSummary, BookingError> {
        validate_seat_ids(&seat_ids, self.config.max_seats_per_booking)?;

        let rate_key = format!("{user_id}:bookings");
        let (limited, current) = self
            .reservation
            .is_rate_limited(&rate_key, self.config.bookings_per_user_per_minute, 60)
            .await;
        if limited {
            self.metrics.record_rate_limit_hit().await;
            return Err(BookingError::RateLimited {
                limit: self.config.bookings_per_user_per_minute,
                current,
                window_seconds: 60,
            });
        }

        let db = self.db.clone();
        let reservation = self.reservation.clone();
        let saga = self.saga.clone();
        let reservation_ttl = self.config.reservation_ttl_seconds;
        let expiration_minutes = self.config.expiration_minutes;

        let outcome: BookingSagaOutcome = self
            .metrics
            .track_booking_operation("create_booking", || async {
                create_booking_saga(&saga, reservation, db, event_id, seat_ids, user_id, reservation_ttl, expiration_minutes).await
            })
            .await?;

        self.load_summary(outcome.booking_id).await
    }

    /// Confirms a pending booking, transitioning it to `expired` inline
    /// under the same row lock if it is found past `expires_at` — the only
    /// path allowed to make that transition (§9 Open Question #1).
    pub async fn confirm_booking(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        payment_reference: Option<String>,
    ) -> Result<BookingSummary, BookingError> {
        self.metrics
            .track_booking_operation("confirm_booking", || self.confirm_booking_inner(booking_id, user_id, payment_reference))
            .await
    }

    async fn confirm_booking_inner(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        payment_reference: Option<String>,
    ) -> Result<BookingSummary, BookingError> {
        let mut tx = self.db.begin().await.map_err(|e| BookingError::internal("confirm_booking", e))?;

        let booking: Option<Booking> = sqlx::query_as(
            "SELECT * FROM bookings WHERE id = $1 AND user_id = $2 AND status = 'pending' FOR UPDATE",
        )
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BookingError::internal("confirm_booking", e))?;

        let Some(booking) = booking else {
            return Err(BookingError::NotFound);
        };

        let expires_at = booking.expires_at.unwrap_or(Utc::now());
        if Utc::now() >= expires_at {
            sqlx::query("UPDATE bookings SET status = 'expired', updated_at = now() WHERE id = $1")
                .bind(booking_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| BookingError::internal("confirm_booking", e))?;

            let seat_ids: Vec<Uuid> = sqlx::query_scalar("SELECT seat_id FROM booking_seats WHERE booking_id = $1")
                .bind(booking_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| BookingError::internal("confirm_booking", e))?;

            sqlx::query(
                "UPDATE seats SET status = 'available', reserved_by = NULL, reserved_at = NULL, updated_at = now() WHERE id = ANY($1)",
            )
            .bind(&seat_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| BookingError::internal("confirm_booking", e))?;

            tx.commit().await.map_err(|e| BookingError::internal("confirm_booking", e))?;
            self.metrics.record_status_change("expired").await;
            return Err(BookingError::BookingExpired { booking_id, expired_at: expires_at });
        }

        sqlx::query(
            "UPDATE bookings SET status = 'confirmed', confirmed_at = now(), payment_reference = $2, updated_at = now() WHERE id = $1",
        )
        .bind(booking_id)
        .bind(&payment_reference)
        .execute(&mut *tx)
        .await
        .map_err(|e| BookingError::internal("confirm_booking", e))?;

        let seat_ids: Vec<Uuid> = sqlx::query_scalar("SELECT seat_id FROM booking_seats WHERE booking_id = $1")
            .bind(booking_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| BookingError::internal("confirm_booking", e))?;

        sqlx::query("UPDATE seats SET status = $1, updated_at = now() WHERE id = ANY($2)")
            .bind(SeatStatus::Booked)
            .bind(&seat_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| BookingError::internal("confirm_booking", e))?;

        tx.commit().await.map_err(|e| BookingError::internal("confirm_booking", e))?;
        self.metrics.record_status_change("confirmed").await;

        if let Err(e) = self.reservation.release_reservation(booking.event_id, &seat_ids, &user_id.to_string()).await {
            tracing::warn!(booking_id = %booking_id, error = %e, "failed to release fast-store reservation after confirm (best-effort)");
        }

        self.load_summary(booking_id).await
    }

    /// Cancels a pending or confirmed booking. Confirmed bookings within
    /// `CancellationWindowHours` of the event start are rejected.
    pub async fn cancel_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<BookingSummary, BookingError> {
        self.metrics.track_booking_operation("cancel_booking", || self.cancel_booking_inner(booking_id, user_id)).await
    }

    async fn cancel_booking_inner(&self, booking_id: Uuid, user_id: Uuid) -> Result<BookingSummary, BookingError> {
        let mut tx = self.db.begin().await.map_err(|e| BookingError::internal("cancel_booking", e))?;

        let row: Option<(Booking, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT b.*, e.start_time
            FROM bookings b
            JOIN events e ON e.id = b.event_id
            WHERE b.id = $1 AND b.user_id = $2 AND b.status IN ('pending', 'confirmed')
            FOR UPDATE OF b
            "#,
        )
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BookingError::internal("cancel_booking", e))?;

        let Some((booking, event_start)) = row else {
            return Err(BookingError::NotFound);
        };

        if booking.status == BookingStatus::Confirmed {
            let window = chrono::Duration::hours(self.config.cancellation_window_hours);
            if event_start - Utc::now() < window {
                return Err(BookingError::CancellationWindowClosed);
            }
        }

        sqlx::query("UPDATE bookings SET status = 'cancelled', cancelled_at = now(), updated_at = now() WHERE id = $1")
            .bind(booking_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| BookingError::internal("cancel_booking", e))?;

        let seat_ids: Vec<Uuid> = sqlx::query_scalar("SELECT seat_id FROM booking_seats WHERE booking_id = $1")
            .bind(booking_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| BookingError::internal("cancel_booking", e))?;

        sqlx::query(
            "UPDATE seats SET status = 'available', reserved_by = NULL, reserved_at = NULL, updated_at = now() WHERE id = ANY($1)",
        )
        .bind(&seat_ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| BookingError::internal("cancel_booking", e))?;

        tx.commit().await.map_err(|e| BookingError::internal("cancel_booking", e))?;
        self.metrics.record_status_change("cancelled").await;

        if let Err(e) = self.reservation.release_reservation(booking.event_id, &seat_ids, &user_id.to_string()).await {
            tracing::warn!(booking_id = %booking_id, error = %e, "failed to release fast-store reservation after cancel (best-effort)");
        }

        self.load_summary(booking_id).await
    }

    /// Paginated listing for the acting user, newest first. `limit` is
    /// clamped to `[1, 20]` regardless of what the caller asked for.
    pub async fn list_bookings(
        &self,
        user_id: Uuid,
        status: Option<BookingStatus>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<BookingSummary>, BookingError> {
        let (skip, limit) = clamp_pagination(skip, limit);

        let bookings: Vec<Booking> = match status {
            Some(s) => sqlx::query_as(
                "SELECT * FROM bookings WHERE user_id = $1 AND status = $2 ORDER BY created_at DESC OFFSET $3 LIMIT $4",
            )
            .bind(user_id)
            .bind(s)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| BookingError::internal("list_bookings", e))?,
            None => sqlx::query_as("SELECT * FROM bookings WHERE user_id = $1 ORDER BY created_at DESC OFFSET $2 LIMIT $3")
                .bind(user_id)
                .bind(skip)
                .bind(limit)
                .fetch_all(&self.db.pool)
                .await
                .map_err(|e| BookingError::internal("list_bookings", e))?,
        };

        let mut summaries = Vec::with_capacity(bookings.len());
        for booking in bookings {
            summaries.push(self.hydrate(booking).await?);
        }
        Ok(summaries)
    }

    pub async fn get_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<BookingSummary, BookingError> {
        let booking: Option<Booking> = sqlx::query_as("SELECT * FROM bookings WHERE id = $1 AND user_id = $2")
            .bind(booking_id)
            .bind(user_id)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| BookingError::internal("get_booking", e))?;

        let booking = booking.ok_or(BookingError::NotFound)?;
        self.hydrate(booking).await
    }

    async fn load_summary(&self, booking_id: Uuid) -> Result<BookingSummary, BookingError> {
        let booking: Booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_one(&self.db.pool)
            .await
            .map_err(|e| BookingError::internal("load_summary", e))?;
        self.hydrate(booking).await
    }

    async fn hydrate(&self, booking: Booking) -> Result<BookingSummary, BookingError> {
        let event: Event = sqlx::query_as("SELECT * FROM events WHERE id = $1")
            .bind(booking.event_id)
            .fetch_one(&self.db.pool)
            .await
            .map_err(|e| BookingError::internal("hydrate_booking", e))?;

        let (venue_name, venue_city): (String, String) =
            sqlx::query_as("SELECT name, city FROM venues WHERE id = $1")
                .bind(event.venue_id)
                .fetch_one(&self.db.pool)
                .await
                .map_err(|e| BookingError::internal("hydrate_booking", e))?;

        let seats: Vec<BookingSeatLine> = sqlx::query_as(
            r#"
            SELECT s.id, s.section, s.row, s.seat_number, bs.price
            FROM booking_seats bs
            JOIN seats s ON s.id = bs.seat_id
            WHERE bs.booking_id = $1
            ORDER BY s.id
            "#,
        )
        .bind(booking.id)
        .fetch_all(&self.db.pool)
        .await
        .map_err(|e| BookingError::internal("hydrate_booking", e))?;

        Ok(BookingSummary { booking, event, venue_name, venue_city, seats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat_ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn rejects_empty_seat_ids() {
        let err = validate_seat_ids(&[], 8).unwrap_err();
        assert!(matches!(err, BookingError::EventNotBookable { .. }));
    }

    #[test]
    fn accepts_single_seat() {
        assert!(validate_seat_ids(&seat_ids(1), 8).is_ok());
    }

    #[test]
    fn accepts_exactly_max_seats() {
        assert!(validate_seat_ids(&seat_ids(8), 8).is_ok());
    }

    #[test]
    fn rejects_more_than_max_seats() {
        let err = validate_seat_ids(&seat_ids(9), 8).unwrap_err();
        assert!(matches!(err, BookingError::EventNotBookable { .. }));
    }

    #[test]
    fn rejects_duplicate_seat_ids() {
        let id = Uuid::new_v4();
        let err = validate_seat_ids(&[id, id], 8).unwrap_err();
        assert!(matches!(err, BookingError::EventNotBookable { .. }));
    }

    #[test]
    fn pagination_clamps_negative_skip_to_zero() {
        assert_eq!(clamp_pagination(-5, 10), (0, 10));
    }

    #[test]
    fn pagination_clamps_limit_above_twenty() {
        assert_eq!(clamp_pagination(0, 1000), (0, 20));
    }

    #[test]
    fn pagination_clamps_limit_below_one() {
        assert_eq!(clamp_pagination(0, 0), (0, 1));
    }

    #[test]
    fn pagination_leaves_in_range_values_untouched() {
        assert_eq!(clamp_pagination(40, 15), (40, 15));
    }
}
