//! Saga step model
//!
//! A saga step captures the compensation contract for a purchase: the debit
//! it posted and the idempotency key any refund of that debit must carry.
//! The step is written before the downstream action runs, so a crash
//! between debit and outcome leaves a `pending` row for the recovery sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Saga step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Debit posted, downstream action outcome unknown
    #[default]
    Pending,
    /// Downstream action succeeded; debit stands
    Completed,
    /// Debit reversed by a refund (terminal)
    Compensated,
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaStatus::Pending => write!(f, "pending"),
            SagaStatus::Completed => write!(f, "completed"),
            SagaStatus::Compensated => write!(f, "compensated"),
        }
    }
}

impl SagaStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(SagaStatus::Pending),
            "completed" => Some(SagaStatus::Completed),
            "compensated" => Some(SagaStatus::Compensated),
            _ => None,
        }
    }

    /// Legal transitions: pending -> completed, pending -> compensated
    pub fn can_transition(&self, to: SagaStatus) -> bool {
        matches!(
            (self, to),
            (
                SagaStatus::Pending,
                SagaStatus::Completed | SagaStatus::Compensated
            )
        )
    }
}

/// Saga step entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    /// Unique identifier
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: Uuid,

    /// Ledger entry id of the purchase debit; `None` until the debit posts
    pub debit_entry_id: Option<Uuid>,

    /// Idempotency key the debit was posted under
    pub debit_key: String,

    /// Idempotency key any compensating refund must use
    pub compensation_key: String,

    /// Debited amount in pence (positive)
    pub amount_pence: i64,

    /// What was being purchased (number id, provisioning order id)
    pub related_resource_id: Option<String>,

    /// Current status
    pub status: SagaStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl SagaStep {
    /// Create a pending step for a debit about to be posted
    pub fn new(
        tenant_id: Uuid,
        debit_key: String,
        amount_pence: i64,
        related_resource_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let compensation_key = format!("{}:compensation", debit_key);
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            debit_entry_id: None,
            debit_key,
            compensation_key,
            amount_pence,
            related_resource_id,
            status: SagaStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if this pending step is old enough for the recovery sweep
    pub fn is_stranded(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        self.status == SagaStatus::Pending
            && now - self.created_at > chrono::Duration::seconds(timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert!(SagaStatus::Pending.can_transition(SagaStatus::Completed));
        assert!(SagaStatus::Pending.can_transition(SagaStatus::Compensated));
        assert!(!SagaStatus::Completed.can_transition(SagaStatus::Compensated));
        assert!(!SagaStatus::Compensated.can_transition(SagaStatus::Pending));
    }

    #[test]
    fn test_compensation_key_derivation() {
        let step = SagaStep::new(
            Uuid::new_v4(),
            "purchase-42".to_string(),
            2500,
            Some("number-order-7".to_string()),
        );

        assert_eq!(step.compensation_key, "purchase-42:compensation");
        assert_eq!(step.status, SagaStatus::Pending);
        assert!(step.debit_entry_id.is_none());
    }

    #[test]
    fn test_stranded_detection() {
        let mut step = SagaStep::new(Uuid::new_v4(), "k".to_string(), 100, None);
        step.created_at = Utc::now() - chrono::Duration::seconds(600);

        assert!(step.is_stranded(Utc::now(), 300));
        assert!(!step.is_stranded(Utc::now(), 900));

        step.status = SagaStatus::Completed;
        assert!(!step.is_stranded(Utc::now(), 300));
    }
}
