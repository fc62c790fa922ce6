use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Minimal identity record. Authentication (credential issuance, password
/// hashing, token verification) is out of scope; this exists only so
/// bookings have a `user_id` to attribute to and middleware has something
/// to extract into an `AuthUser`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub async fn find_by_id(id: Uuid, db: &crate::database::Database) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT id, email, is_active, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&db.pool)
            .await
    }

    pub async fn find_by_email(email: &str, db: &crate::database::Database) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT id, email, is_active, created_at FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&db.pool)
            .await
    }
}
