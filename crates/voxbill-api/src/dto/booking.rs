//! Booking DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;
use voxbill_core::models::Booking;

/// Reserve a provider time-slot
#[derive(Debug, Deserialize, Validate)]
pub struct ReserveSlotRequest {
    #[validate(length(min = 1, max = 255))]
    pub resource_id: String,

    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: String,

    /// Insert directly as confirmed instead of pending
    #[serde(default)]
    pub confirm: bool,

    /// Maximum time to wait for a contended slot lock; omitted uses the
    /// server default, zero rejects immediately
    pub max_wait_ms: Option<u64>,
}

/// Booking response DTO
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub resource_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id.to_string(),
            resource_id: booking.resource_id,
            start_time: booking.start_time,
            end_time: booking.end_time,
            status: booking.status.to_string(),
            created_at: booking.created_at,
        }
    }
}

/// Query parameters for listing a resource's bookings
#[derive(Debug, Deserialize)]
pub struct BookingQueryParams {
    pub resource_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}
