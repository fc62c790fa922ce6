//! Assembles the two-step saga a booking creation runs through: reserve
//! seats in the fast store, then commit the booking in the durable store.
//! If the durable step fails, the fast-store hold is released so the seats
//! free up immediately rather than waiting out the TTL.

use super::{SagaOrchestrator, SagaTransaction, StepAction};
use crate::database::Database;
use crate::error::BookingError;
use crate::models::booking::generate_booking_code;
use crate::models::event::EventStatus;
use crate::models::seat::SeatStatus;
use crate::reservation::ReservationStore;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub struct BookingSagaOutcome {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub total_amount: f64,
    pub expires_at: chrono::DateTime<Utc>,
    pub seat_count: usize,
}

/// Builds and runs the booking-creation saga. `seat_ids` is sorted before
/// any lock is taken, matching the deadlock-prevention convention used
/// throughout both stores.
pub async fn create_booking_saga(
    orchestrator: &SagaOrchestrator,
    reservation: Arc<ReservationStore>,
    db: Arc<Database>,
    event_id: Uuid,
    seat_ids: Vec<Uuid>,
    user_id: Uuid,
    reservation_ttl_seconds: u64,
    booking_expiration_minutes: i64,
) -> Result<BookingSagaOutcome, BookingError> {
    let mut sorted_seat_ids = seat_ids;
    sorted_seat_ids.sort();

    let context = json!({
        "event_id": event_id,
        "seat_ids": sorted_seat_ids,
        "user_id": user_id,
        "reservation_ttl": reservation_ttl_seconds,
        "booking_expiration_minutes": booking_expiration_minutes,
    });

    let mut saga: SagaTransaction = orchestrator.create_saga(format!("booking_creation_{event_id}"), context).await;

    let reserve_action: StepAction = {
        let reservation = reservation.clone();
        Arc::new(move |ctx: Value| {
            let reservation = reservation.clone();
            Box::pin(async move { reserve_seats_step(reservation, ctx).await })
        })
    };
    let release_compensation: StepAction = {
        let reservation = reservation.clone();
        Arc::new(move |ctx: Value| {
            let reservation = reservation.clone();
            Box::pin(async move { release_seats_compensation(reservation, ctx).await })
        })
    };
    SagaOrchestrator::add_step(
        &mut saga,
        "fast_store_seat_reservation",
        reserve_action,
        release_compensation,
        json!({}),
        2,
    );

    let create_action: StepAction = {
        let db = db.clone();
        Arc::new(move |ctx: Value| {
            let db = db.clone();
            Box::pin(async move { create_booking_db_step(db, ctx).await })
        })
    };
    let rollback_compensation: StepAction = Arc::new(move |ctx: Value| {
        Box::pin(async move { rollback_booking_db_step(ctx).await })
    });
    SagaOrchestrator::add_step(
        &mut saga,
        "durable_store_booking_creation",
        create_action,
        rollback_compensation,
        json!({}),
        1,
    );

    let success = orchestrator.execute_saga(&mut saga).await;

    if success {
        let result = saga
            .steps
            .iter()
            .find(|s| s.name == "durable_store_booking_creation")
            .and_then(|s| s.result.clone())
            .ok_or_else(|| BookingError::internal("booking_saga", "saga completed with no result"))?;

        Ok(BookingSagaOutcome {
            booking_id: serde_json::from_value(result["booking_id"].clone())
                .map_err(|e| BookingError::internal("booking_saga", e))?,
            booking_code: result["booking_code"].as_str().unwrap_or_default().to_string(),
            total_amount: result["total_amount"].as_f64().unwrap_or(0.0),
            expires_at: serde_json::from_value(result["expires_at"].clone())
                .map_err(|e| BookingError::internal("booking_saga", e))?,
            seat_count: result["seat_count"].as_u64().unwrap_or(0) as usize,
        })
    } else {
        let failed_error = saga.steps.iter().find(|s| s.error.is_some()).and_then(|s| s.error.clone()).unwrap_or_default();

        if let Some(ids_json) = failed_error.strip_prefix("seats no longer available: ") {
            let seat_ids: Vec<Uuid> = serde_json::from_str(ids_json).unwrap_or_default();
            Err(BookingError::SeatsUnavailable { seat_ids })
        } else if failed_error.contains("not found") || failed_error.contains("not in a bookable status") || failed_error.contains("past or ongoing") {
            Err(BookingError::EventNotBookable { reason: failed_error })
        } else if failed_error.contains("circuit breaker is open") {
            Err(BookingError::ReservationUnavailable { retry_after_seconds: 5 })
        } else {
            let seat_ids: Vec<Uuid> = saga
                .context
                .get("seat_ids")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            Err(BookingError::SeatsUnavailable { seat_ids })
        }
    }
}

async fn reserve_seats_step(reservation: Arc<ReservationStore>, ctx: Value) -> anyhow::Result<Value> {
    let event_id: Uuid = serde_json::from_value(ctx["event_id"].clone())?;
    let seat_ids: Vec<Uuid> = serde_json::from_value(ctx["seat_ids"].clone())?;
    let user_id: Uuid = serde_json::from_value(ctx["user_id"].clone())?;
    let ttl = ctx["reservation_ttl"].as_u64().unwrap_or(600);

    let (ok, failed) = reservation
        .reserve_seats(event_id, &seat_ids, &user_id.to_string(), ttl)
        .await?;

    if !ok {
        anyhow::bail!("seats no longer available: {}", serde_json::to_string(&failed)?);
    }

    Ok(json!({
        "reserved_seats": seat_ids,
        "reservation_time": Utc::now(),
    }))
}

async fn release_seats_compensation(reservation: Arc<ReservationStore>, ctx: Value) -> anyhow::Result<Value> {
    let event_id: Uuid = serde_json::from_value(ctx["event_id"].clone())?;
    let seat_ids: Vec<Uuid> = serde_json::from_value(ctx["seat_ids"].clone())?;
    let user_id: Uuid = serde_json::from_value(ctx["user_id"].clone())?;

    reservation
        .release_reservation(event_id, &seat_ids, &user_id.to_string())
        .await?;
    Ok(Value::Null)
}

async fn create_booking_db_step(db: Arc<Database>, ctx: Value) -> anyhow::Result<Value> {
    let event_id: Uuid = serde_json::from_value(ctx["event_id"].clone())?;
    let seat_ids: Vec<Uuid> = serde_json::from_value(ctx["seat_ids"].clone())?;
    let user_id: Uuid = serde_json::from_value(ctx["user_id"].clone())?;
    let expiration_minutes = ctx["booking_expiration_minutes"].as_i64().unwrap_or(5);

    let mut tx = db.begin().await?;

    let event_row: Option<(chrono::DateTime<Utc>, EventStatus)> =
        sqlx::query_as("SELECT start_time, status FROM events WHERE id = $1 FOR UPDATE")
            .bind(event_id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some((event_start, event_status)) = event_row else {
        anyhow::bail!("event {event_id} not found");
    };
    if event_start <= Utc::now() {
        anyhow::bail!("cannot book tickets for past or ongoing events");
    }
    if !event_status.is_bookable() {
        anyhow::bail!("event {event_id} is not in a bookable status");
    }

    let rows: Vec<(Uuid, f64)> = sqlx::query_as(
        r#"
        SELECT id, price FROM seats
        WHERE event_id = $1 AND id = ANY($2) AND status = 'available'
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(event_id)
    .bind(&seat_ids)
    .fetch_all(&mut *tx)
    .await?;

    if rows.len() != seat_ids.len() {
        let available: std::collections::HashSet<Uuid> = rows.iter().map(|(id, _)| *id).collect();
        let unavailable: Vec<Uuid> = seat_ids.iter().filter(|id| !available.contains(id)).copied().collect();
        anyhow::bail!("seats no longer available: {}", serde_json::to_string(&unavailable)?);
    }

    let total_amount: f64 = rows.iter().map(|(_, price)| price).sum();
    let booking_id = Uuid::new_v4();
    let booking_code = generate_booking_code();
    let expires_at = Utc::now() + ChronoDuration::minutes(expiration_minutes);

    sqlx::query(
        r#"
        INSERT INTO bookings (id, user_id, event_id, booking_code, status, total_amount, expires_at)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6)
        "#,
    )
    .bind(booking_id)
    .bind(user_id)
    .bind(event_id)
    .bind(&booking_code)
    .bind(total_amount)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    for (seat_id, price) in &rows {
        sqlx::query(
            "INSERT INTO booking_seats (id, booking_id, seat_id, price) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(booking_id)
        .bind(seat_id)
        .bind(price)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE seats SET status = $1, reserved_by = $2, reserved_at = $3 WHERE id = $4",
        )
        .bind(SeatStatus::Reserved)
        .bind(user_id)
        .bind(Utc::now())
        .bind(seat_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(json!({
        "booking_id": booking_id,
        "booking_code": booking_code,
        "total_amount": total_amount,
        "expires_at": expires_at,
        "seat_count": rows.len(),
    }))
}

async fn rollback_booking_db_step(_ctx: Value) -> anyhow::Result<Value> {
    // The transaction in `create_booking_db_step` never commits on
    // failure, so there is nothing left to undo here; this compensation
    // exists only to keep the step/compensation pairing symmetric.
    Ok(Value::Null)
}
