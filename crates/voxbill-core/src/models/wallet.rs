//! Wallet model
//!
//! One prepaid wallet per tenant. The balance is a materialized projection
//! of the tenant's ledger entries and is only ever mutated by applying one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Wallet status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// Active wallet - can transact
    #[default]
    Active,
    /// Soft-archived with the tenant; balance preserved, no new activity
    Archived,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Active => write!(f, "active"),
            WalletStatus::Archived => write!(f, "archived"),
        }
    }
}

impl WalletStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(WalletStatus::Active),
            "archived" => Some(WalletStatus::Archived),
            _ => None,
        }
    }

    /// Check if the wallet can accept ledger activity
    pub fn can_transact(&self) -> bool {
        matches!(self, WalletStatus::Active)
    }
}

/// Wallet entity
///
/// Per-tenant prepaid balance record. Amounts are signed integer pence;
/// fractional amounts never occur anywhere in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Owning tenant
    pub tenant_id: Uuid,

    /// Materialized balance in pence; equals the sum of all ledger entries
    pub balance_pence: i64,

    /// Threshold below which the kill-switch flags a low balance
    pub low_balance_threshold_pence: i64,

    /// Currency code (ISO 4217)
    pub currency: String,

    /// Wallet status
    pub status: WalletStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a fresh wallet for a newly provisioned tenant
    pub fn new(tenant_id: Uuid, low_balance_threshold_pence: i64) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            balance_pence: 0,
            low_balance_threshold_pence,
            currency: "GBP".to_string(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the wallet is active
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.can_transact()
    }

    /// Balance available for debits given the permitted overdraft
    #[inline]
    pub fn available_balance(&self, overdraft_pence: i64) -> i64 {
        self.balance_pence + overdraft_pence
    }

    /// Check if a debit of `amount_pence` (positive) can be authorized
    pub fn can_debit(&self, amount_pence: i64, overdraft_pence: i64) -> bool {
        self.is_active() && self.available_balance(overdraft_pence) >= amount_pence
    }

    /// Check if the balance has fallen to or below the low-balance threshold
    pub fn is_low(&self) -> bool {
        self.balance_pence <= self.low_balance_threshold_pence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_with_balance(balance_pence: i64) -> Wallet {
        Wallet {
            balance_pence,
            ..Wallet::new(Uuid::new_v4(), 500)
        }
    }

    #[test]
    fn test_can_debit_no_overdraft() {
        let wallet = wallet_with_balance(1000);

        assert!(wallet.can_debit(500, 0));
        assert!(wallet.can_debit(1000, 0));
        assert!(!wallet.can_debit(1001, 0));
    }

    #[test]
    fn test_can_debit_with_overdraft() {
        let wallet = wallet_with_balance(100);

        assert!(wallet.can_debit(300, 200));
        assert!(!wallet.can_debit(301, 200));
    }

    #[test]
    fn test_archived_wallet_cannot_debit() {
        let mut wallet = wallet_with_balance(1000);
        wallet.status = WalletStatus::Archived;

        assert!(!wallet.can_debit(1, 0));
    }

    #[test]
    fn test_low_balance_threshold() {
        let wallet = wallet_with_balance(500);
        assert!(wallet.is_low());

        let wallet = wallet_with_balance(501);
        assert!(!wallet.is_low());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(WalletStatus::from_str("ACTIVE"), Some(WalletStatus::Active));
        assert_eq!(
            WalletStatus::from_str("archived"),
            Some(WalletStatus::Archived)
        );
        assert_eq!(WalletStatus::from_str("closed"), None);
    }
}
