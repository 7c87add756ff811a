//! Reservation model
//!
//! A reservation holds funds against an in-progress metered session
//! (an active call). Lifecycle:
//! 1. Created at session start with a hold debit (Open)
//! 2. Committed when actual usage is known (settlement delta posted), or
//! 3. Released in full if the session never started billing
//!
//! Both terminal transitions are idempotent by reservation id: finalizing
//! twice returns the recorded outcome and posts no further ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Funds are held; session may still be running
    #[default]
    Open,
    /// Settled against actual usage (terminal)
    Committed,
    /// Hold fully reversed, session never billed (terminal)
    Released,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationStatus::Open => write!(f, "open"),
            ReservationStatus::Committed => write!(f, "committed"),
            ReservationStatus::Released => write!(f, "released"),
        }
    }
}

impl ReservationStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(ReservationStatus::Open),
            "committed" => Some(ReservationStatus::Committed),
            "released" => Some(ReservationStatus::Released),
            _ => None,
        }
    }

    /// Check if the reservation is still holding funds
    pub fn is_open(&self) -> bool {
        matches!(self, ReservationStatus::Open)
    }

    /// Check if the reservation reached a terminal state
    pub fn is_final(&self) -> bool {
        !self.is_open()
    }

    /// Legal transitions: open -> committed, open -> released
    pub fn can_transition(&self, to: ReservationStatus) -> bool {
        matches!(
            (self, to),
            (
                ReservationStatus::Open,
                ReservationStatus::Committed | ReservationStatus::Released
            )
        )
    }
}

/// Reservation entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique identifier (UUID)
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: Uuid,

    /// Metered resource being consumed (call id)
    pub resource_id: String,

    /// Amount held against the wallet, in pence
    pub held_pence: i64,

    /// Units estimated at open time (e.g. minutes)
    pub estimated_units: i64,

    /// Cost per unit in pence, fixed at open time
    pub unit_cost_pence: i64,

    /// Current status
    pub status: ReservationStatus,

    /// Net ledger delta recorded at finalization (commit or release)
    pub final_delta_pence: Option<i64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// When the terminal transition happened
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Create a new open reservation
    pub fn new(
        tenant_id: Uuid,
        resource_id: String,
        estimated_units: i64,
        unit_cost_pence: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            resource_id,
            held_pence: estimated_units * unit_cost_pence,
            estimated_units,
            unit_cost_pence,
            status: ReservationStatus::Open,
            final_delta_pence: None,
            created_at: now,
            updated_at: now,
            finalized_at: None,
        }
    }

    /// Settlement delta for `actual_units` of usage.
    ///
    /// Negative when usage came in under the estimate (partial refund),
    /// positive when it exceeded the estimate (extra charge).
    pub fn commit_delta_pence(&self, actual_units: i64) -> i64 {
        actual_units * self.unit_cost_pence - self.held_pence
    }

    /// Check if the reservation has gone stale relative to a TTL
    pub fn is_stale(&self, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        self.status.is_open() && now - self.created_at > chrono::Duration::seconds(ttl_secs)
    }
}
