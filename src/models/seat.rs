use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Reserved,
    Booked,
    Blocked,
}

/// No optimistic-locking version column: contention is handled by
/// pessimistic row locks (`SELECT ... FOR UPDATE`) taken in sorted seat-id
/// order, not by retrying on a stale version.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub event_id: Uuid,
    pub section: Option<String>,
    pub row: Option<String>,
    pub seat_number: Option<String>,
    pub price_tier: Option<String>,
    pub price: f64,
    pub status: SeatStatus,
    pub reserved_by: Option<Uuid>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
