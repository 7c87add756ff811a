//! Idempotency records
//!
//! Every mutating engine operation carries a caller-supplied idempotency
//! key. Keys are scoped per tenant and per operation family: a topup key
//! and a booking key with the same string value never collide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Logical operation family an idempotency key is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpFamily {
    Topup,
    Purchase,
    ReservationOpen,
    ReservationCommit,
    ReservationRelease,
    Booking,
}

impl fmt::Display for OpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpFamily::Topup => write!(f, "topup"),
            OpFamily::Purchase => write!(f, "purchase"),
            OpFamily::ReservationOpen => write!(f, "reservation_open"),
            OpFamily::ReservationCommit => write!(f, "reservation_commit"),
            OpFamily::ReservationRelease => write!(f, "reservation_release"),
            OpFamily::Booking => write!(f, "booking"),
        }
    }
}

impl OpFamily {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "topup" => Some(OpFamily::Topup),
            "purchase" => Some(OpFamily::Purchase),
            "reservation_open" => Some(OpFamily::ReservationOpen),
            "reservation_commit" => Some(OpFamily::ReservationCommit),
            "reservation_release" => Some(OpFamily::ReservationRelease),
            "booking" => Some(OpFamily::Booking),
            _ => None,
        }
    }
}

/// Stored record of a first-seen operation and its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Owning tenant
    pub tenant_id: Uuid,

    /// Operation family the key is scoped to
    pub family: OpFamily,

    /// Caller-supplied key
    pub key: String,

    /// Serialized first result; `None` while the operation is in flight
    pub result: Option<serde_json::Value>,

    /// Claim timestamp, drives retention-window GC
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Check if the record fell outside the retention window
    pub fn is_expired(&self, now: DateTime<Utc>, retention_secs: i64) -> bool {
        now - self.created_at > chrono::Duration::seconds(retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_roundtrip() {
        for family in [
            OpFamily::Topup,
            OpFamily::Purchase,
            OpFamily::ReservationOpen,
            OpFamily::ReservationCommit,
            OpFamily::ReservationRelease,
            OpFamily::Booking,
        ] {
            assert_eq!(OpFamily::from_str(&family.to_string()), Some(family));
        }
    }

    #[test]
    fn test_expiry_window() {
        let record = IdempotencyRecord {
            tenant_id: Uuid::new_v4(),
            family: OpFamily::Topup,
            key: "evt_123".to_string(),
            result: None,
            created_at: Utc::now() - chrono::Duration::hours(25),
        };

        assert!(record.is_expired(Utc::now(), 24 * 3600));
        assert!(!record.is_expired(Utc::now(), 48 * 3600));
    }
}
