//! Booking model
//!
//! A booking is a claim on a provider time-slot. The hard invariant: for a
//! given `(resource_id, overlapping time range)` at most one booking may be
//! in `pending` or `confirmed` state. That property is enforced by the slot
//! lock manager's serialized critical section, never by read-then-write
//! caller logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Booking status
///
/// State machine:
/// `pending -> confirmed -> completed`; `pending -> cancelled`;
/// `confirmed -> cancelled`. Everything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Slot claimed, awaiting confirmation
    #[default]
    Pending,
    /// Slot confirmed with the provider
    Confirmed,
    /// Appointment took place (terminal)
    Completed,
    /// Cancelled by either party (terminal)
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Completed => write!(f, "completed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl BookingStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Exhaustive transition table
    pub fn can_transition(&self, to: BookingStatus) -> bool {
        matches!(
            (self, to),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }

    /// Statuses that occupy the slot for overlap purposes
    pub fn holds_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

/// Booking entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    /// Unique identifier (UUID)
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: Uuid,

    /// Provider/calendar the slot belongs to
    pub resource_id: String,

    /// Slot start (inclusive)
    pub start_time: DateTime<Utc>,

    /// Slot end (exclusive)
    pub end_time: DateTime<Utc>,

    /// Current status
    pub status: BookingStatus,

    /// Caller-supplied idempotency key
    pub idempotency_key: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Create a new booking claim
    pub fn new(
        tenant_id: Uuid,
        resource_id: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: BookingStatus,
        idempotency_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            resource_id,
            start_time,
            end_time,
            status,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    /// Half-open interval overlap check: `[start, end)` ranges that merely
    /// touch do not overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn booking(start_h: u32, end_h: u32) -> Booking {
        Booking::new(
            Uuid::new_v4(),
            "prov-1".to_string(),
            Utc.with_ymd_and_hms(2026, 1, 20, start_h, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 20, end_h, 0, 0).unwrap(),
            BookingStatus::Pending,
            "key-1".to_string(),
        )
    }

    #[test]
    fn test_transition_table() {
        assert!(BookingStatus::Pending.can_transition(BookingStatus::Confirmed));
        assert!(BookingStatus::Pending.can_transition(BookingStatus::Cancelled));
        assert!(BookingStatus::Confirmed.can_transition(BookingStatus::Completed));
        assert!(BookingStatus::Confirmed.can_transition(BookingStatus::Cancelled));

        assert!(!BookingStatus::Pending.can_transition(BookingStatus::Completed));
        assert!(!BookingStatus::Completed.can_transition(BookingStatus::Confirmed));
        assert!(!BookingStatus::Cancelled.can_transition(BookingStatus::Pending));
        assert!(!BookingStatus::Completed.can_transition(BookingStatus::Cancelled));
    }

    #[test]
    fn test_holds_slot() {
        assert!(BookingStatus::Pending.holds_slot());
        assert!(BookingStatus::Confirmed.holds_slot());
        assert!(!BookingStatus::Completed.holds_slot());
        assert!(!BookingStatus::Cancelled.holds_slot());
    }

    #[test]
    fn test_overlap_half_open() {
        let b = booking(14, 15);

        // Identical range overlaps
        assert!(b.overlaps(
            Utc.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 20, 15, 0, 0).unwrap()
        ));
        // Contained range overlaps
        assert!(b.overlaps(
            Utc.with_ymd_and_hms(2026, 1, 20, 14, 15, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 20, 14, 45, 0).unwrap()
        ));
        // Adjacent ranges do not
        assert!(!b.overlaps(
            Utc.with_ymd_and_hms(2026, 1, 20, 15, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 20, 16, 0, 0).unwrap()
        ));
        assert!(!b.overlaps(
            Utc.with_ymd_and_hms(2026, 1, 20, 13, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap()
        ));
    }
}
