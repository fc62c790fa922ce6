use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub booking_code: String,
    pub status: BookingStatus,
    pub total_amount: f64,
    pub payment_reference: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Short, human-readable booking reference shown to the caller; not used
/// for lookups (those go by `id`). Format: `EVT` + 8 uppercase hex digits.
pub fn generate_booking_code() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("EVT{}", hex[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_valid_booking_code(code: &str) -> bool {
        code.len() == 11
            && code.starts_with("EVT")
            && code[3..].chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    }

    #[test]
    fn booking_code_matches_expected_format() {
        for _ in 0..1000 {
            let code = generate_booking_code();
            assert!(is_valid_booking_code(&code), "{code} does not match EVT[0-9A-F]{{8}}");
        }
    }

    proptest::proptest! {
        #[test]
        fn booking_code_always_matches_format(_seed in proptest::arbitrary::any::<u32>()) {
            let code = generate_booking_code();
            proptest::prop_assert!(is_valid_booking_code(&code));
        }
    }

    #[test]
    fn booking_codes_are_practically_unique() {
        let codes: std::collections::HashSet<_> = (0..1000).map(|_| generate_booking_code()).collect();
        assert_eq!(codes.len(), 1000);
    }
}
