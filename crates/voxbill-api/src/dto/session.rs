//! Metered session DTOs (reservation lifecycle)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;
use voxbill_core::models::Reservation;

/// Open a metered session: hold estimated funds
#[derive(Debug, Deserialize, Validate)]
pub struct OpenSessionRequest {
    #[validate(length(min = 1, max = 255))]
    pub resource_id: String,

    #[validate(range(min = 1))]
    pub estimated_units: i64,

    #[validate(range(min = 0))]
    pub unit_cost_pence: i64,

    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: String,
}

/// Mid-session kill-switch check
#[derive(Debug, Deserialize, Validate)]
pub struct HeartbeatRequest {
    #[validate(range(min = 0))]
    pub accrued_pence: i64,
}

/// Settle a session against actual usage
#[derive(Debug, Deserialize, Validate)]
pub struct CommitSessionRequest {
    #[validate(range(min = 0))]
    pub actual_units: i64,

    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: String,
}

/// Release an unused hold
#[derive(Debug, Deserialize, Validate)]
pub struct ReleaseSessionRequest {
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: String,
}

/// Reservation response DTO
#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub id: String,
    pub resource_id: String,
    pub held_pence: i64,
    pub estimated_units: i64,
    pub unit_cost_pence: i64,
    pub status: String,
    pub final_delta_pence: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id.to_string(),
            resource_id: reservation.resource_id,
            held_pence: reservation.held_pence,
            estimated_units: reservation.estimated_units,
            unit_cost_pence: reservation.unit_cost_pence,
            status: reservation.status.to_string(),
            final_delta_pence: reservation.final_delta_pence,
            created_at: reservation.created_at,
            finalized_at: reservation.finalized_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_open_session_validation() {
        let valid = OpenSessionRequest {
            resource_id: "call-1".to_string(),
            estimated_units: 10,
            unit_cost_pence: 100,
            idempotency_key: "call-1:open".to_string(),
        };
        assert!(valid.validate().is_ok());

        let bad_units = OpenSessionRequest {
            estimated_units: 0,
            ..valid
        };
        assert!(bad_units.validate().is_err());
    }

    #[test]
    fn test_reservation_response_serialization() {
        let response: ReservationResponse =
            Reservation::new(Uuid::new_v4(), "call-1".to_string(), 10, 100).into();
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"held_pence\":1000"));
        assert!(json.contains("\"status\":\"open\""));
    }
}
