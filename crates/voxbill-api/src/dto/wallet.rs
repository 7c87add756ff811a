//! Wallet and ledger DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;
use voxbill_core::models::{LedgerEntry, Wallet};

/// Topup request; `event_id` is the payment provider's event id and doubles
/// as the idempotency key, so redelivered webhooks credit once
#[derive(Debug, Deserialize, Validate)]
pub struct TopupRequest {
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount_pence: i64,

    #[validate(length(min = 1, max = 255))]
    pub event_id: String,
}

/// Wallet response DTO
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub tenant_id: String,
    pub balance_pence: i64,
    pub low_balance_threshold_pence: i64,
    pub currency: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            tenant_id: wallet.tenant_id.to_string(),
            balance_pence: wallet.balance_pence,
            low_balance_threshold_pence: wallet.low_balance_threshold_pence,
            currency: wallet.currency,
            status: wallet.status.to_string(),
            updated_at: wallet.updated_at,
        }
    }
}

/// Ledger entry response DTO
#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    pub id: String,
    pub entry_type: String,
    pub amount_pence: i64,
    pub idempotency_key: String,
    pub related_resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            entry_type: entry.entry_type.to_string(),
            amount_pence: entry.amount_pence,
            idempotency_key: entry.idempotency_key,
            related_resource_id: entry.related_resource_id,
            created_at: entry.created_at,
        }
    }
}

/// Query parameters for the ledger listing
#[derive(Debug, Deserialize)]
pub struct LedgerQueryParams {
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_topup_validation() {
        let valid = TopupRequest {
            amount_pence: 5000,
            event_id: "evt_123".to_string(),
        };
        assert!(valid.validate().is_ok());

        let zero = TopupRequest {
            amount_pence: 0,
            event_id: "evt_123".to_string(),
        };
        assert!(zero.validate().is_err());

        let no_event = TopupRequest {
            amount_pence: 5000,
            event_id: String::new(),
        };
        assert!(no_event.validate().is_err());
    }

    #[test]
    fn test_wallet_response_serialization() {
        let response: WalletResponse = Wallet::new(Uuid::new_v4(), 500).into();
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"balance_pence\":0"));
        assert!(json.contains("\"status\":\"active\""));
    }
}
