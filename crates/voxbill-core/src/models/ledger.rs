//! Ledger entry model
//!
//! Immutable audit log of all balance-affecting events. The sum of a
//! tenant's entries equals the wallet's materialized balance at all times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Credit from an external payment (webhook event id is the idempotency key)
    Topup,
    /// Debit for a one-shot purchase (e.g. number provisioning)
    PurchaseDebit,
    /// Compensating credit reversing a purchase debit
    Refund,
    /// Hold placed at session start
    ReservationHold,
    /// Settlement delta posted when actual usage is known
    ReservationCommit,
    /// Full reversal of a hold for a session that never billed
    ReservationRelease,
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEntryType::Topup => write!(f, "topup"),
            LedgerEntryType::PurchaseDebit => write!(f, "purchase_debit"),
            LedgerEntryType::Refund => write!(f, "refund"),
            LedgerEntryType::ReservationHold => write!(f, "reservation_hold"),
            LedgerEntryType::ReservationCommit => write!(f, "reservation_commit"),
            LedgerEntryType::ReservationRelease => write!(f, "reservation_release"),
        }
    }
}

impl LedgerEntryType {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "topup" => Some(LedgerEntryType::Topup),
            "purchase_debit" => Some(LedgerEntryType::PurchaseDebit),
            "refund" => Some(LedgerEntryType::Refund),
            "reservation_hold" => Some(LedgerEntryType::ReservationHold),
            "reservation_commit" => Some(LedgerEntryType::ReservationCommit),
            "reservation_release" => Some(LedgerEntryType::ReservationRelease),
            _ => None,
        }
    }

    /// Entry types whose amount is constrained to be negative
    pub fn is_debit_type(&self) -> bool {
        matches!(
            self,
            LedgerEntryType::PurchaseDebit | LedgerEntryType::ReservationHold
        )
    }
}

/// Ledger entry entity
///
/// Created atomically with the wallet balance mutation; never updated or
/// deleted. `amount_pence` is signed: debits are negative, credits positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: Uuid,

    /// Type of balance event
    pub entry_type: LedgerEntryType,

    /// Signed amount in pence
    pub amount_pence: i64,

    /// Caller-supplied idempotency key, unique per tenant
    pub idempotency_key: String,

    /// Associated resource (call id, purchase id, reservation id)
    pub related_resource_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Check if this entry reduces the balance
    pub fn is_debit(&self) -> bool {
        self.amount_pence < 0
    }

    /// Check if this entry increases the balance
    pub fn is_credit(&self) -> bool {
        self.amount_pence > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_roundtrip() {
        for entry_type in [
            LedgerEntryType::Topup,
            LedgerEntryType::PurchaseDebit,
            LedgerEntryType::Refund,
            LedgerEntryType::ReservationHold,
            LedgerEntryType::ReservationCommit,
            LedgerEntryType::ReservationRelease,
        ] {
            assert_eq!(
                LedgerEntryType::from_str(&entry_type.to_string()),
                Some(entry_type)
            );
        }
        assert_eq!(LedgerEntryType::from_str("adjustment"), None);
    }

    #[test]
    fn test_debit_classification() {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            entry_type: LedgerEntryType::ReservationHold,
            amount_pence: -1000,
            idempotency_key: "call-1:hold".to_string(),
            related_resource_id: Some("call-1".to_string()),
            created_at: Utc::now(),
        };

        assert!(entry.is_debit());
        assert!(!entry.is_credit());
        assert!(entry.entry_type.is_debit_type());
    }
}
