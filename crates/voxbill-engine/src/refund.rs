//! Refund coordinator
//!
//! Compensating-transaction wrapper for purchases: debit, run the
//! downstream action, and on any failure reverse the debit before the error
//! surfaces. The caller never sees a "charged but nothing delivered" state
//! and never issues a manual refund.
//!
//! The saga step is written before the debit posts, so a process crash at
//! any point leaves a `pending` row the recovery sweep can settle. The
//! compensation ledger key is fixed per step, so no path through the sweep
//! and the request path together can refund twice.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use voxbill_core::{
    models::{LedgerEntryType, OpFamily, SagaStatus, SagaStep},
    traits::{NewLedgerEntry, SagaStore},
    AppError, AppResult,
};

use crate::idempotency::IdempotencyGuard;
use crate::ledger::LedgerService;

/// Outcome of a compensated purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// Debit stands, downstream action delivered
    Completed {
        receipt: serde_json::Value,
        new_balance_pence: i64,
    },
    /// Wallet could not cover the debit; nothing happened
    Declined {
        required_pence: i64,
        available_pence: i64,
    },
    /// Downstream action failed; the debit has been refunded in full
    Failed { message: String },
}

/// Summary of one recovery sweep run
#[derive(Debug, Clone, Serialize)]
pub struct RecoverySummary {
    /// Stranded pending steps examined
    pub examined: usize,
    /// Steps whose debit was refunded
    pub refunded: u64,
}

/// Refund coordinator
pub struct RefundCoordinator {
    ledger: Arc<LedgerService>,
    sagas: Arc<dyn SagaStore>,
    guard: Arc<IdempotencyGuard>,
}

impl RefundCoordinator {
    /// Create a new refund coordinator
    pub fn new(
        ledger: Arc<LedgerService>,
        sagas: Arc<dyn SagaStore>,
        guard: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            ledger,
            sagas,
            guard,
        }
    }

    /// Debit `amount_pence`, run `action`, refund on failure.
    ///
    /// The action's JSON result becomes the purchase receipt. Whatever
    /// happens, the tenant's balance afterwards differs from the balance
    /// before only if the purchase actually delivered.
    #[instrument(skip(self, action))]
    pub async fn with_compensation<F, Fut>(
        &self,
        tenant_id: Uuid,
        amount_pence: i64,
        idempotency_key: &str,
        action: F,
    ) -> AppResult<PurchaseOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<serde_json::Value>>,
    {
        if amount_pence <= 0 {
            return Err(AppError::InvalidInput(
                "purchase amount must be positive".to_string(),
            ));
        }

        let result = self
            .guard
            .run(tenant_id, OpFamily::Purchase, idempotency_key, || async {
                self.execute(tenant_id, amount_pence, idempotency_key, action)
                    .await
            })
            .await?;

        Ok(result.value)
    }

    async fn execute<F, Fut>(
        &self,
        tenant_id: Uuid,
        amount_pence: i64,
        idempotency_key: &str,
        action: F,
    ) -> AppResult<PurchaseOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<serde_json::Value>>,
    {
        // Step first: a crash after the debit leaves a pending row for the
        // recovery sweep to find
        let step = self
            .sagas
            .insert(&SagaStep::new(
                tenant_id,
                format!("purchase:{}", idempotency_key),
                amount_pence,
                None,
            ))
            .await?;

        let debit = NewLedgerEntry {
            tenant_id,
            entry_type: LedgerEntryType::PurchaseDebit,
            amount_pence: -amount_pence,
            idempotency_key: step.debit_key.clone(),
            related_resource_id: Some(step.id.to_string()),
        };

        let applied = match self.ledger.apply(debit).await {
            Ok(applied) => applied,
            Err(AppError::InsufficientBalance {
                required_pence,
                available_pence,
            }) => {
                // Nothing was posted; close the step without compensation
                self.sagas
                    .transition(step.id, SagaStatus::Pending, SagaStatus::Compensated)
                    .await?;
                warn!(
                    "Purchase declined for tenant {}: required {}p, available {}p",
                    tenant_id, required_pence, available_pence
                );
                return Ok(PurchaseOutcome::Declined {
                    required_pence,
                    available_pence,
                });
            }
            Err(e) => return Err(e),
        };

        self.sagas.set_debit_entry(step.id, applied.entry_id).await?;

        match action().await {
            Ok(receipt) => {
                match self
                    .sagas
                    .transition(step.id, SagaStatus::Pending, SagaStatus::Completed)
                    .await?
                {
                    Some(_) => {
                        info!(
                            "Purchase {} completed for tenant {}: {}p",
                            idempotency_key, tenant_id, amount_pence
                        );
                        Ok(PurchaseOutcome::Completed {
                            receipt,
                            new_balance_pence: applied.new_balance_pence,
                        })
                    }
                    None => {
                        // The sweep already refunded this step: the action
                        // outran the recovery timeout. Honor the refund.
                        error!(
                            "Purchase {} delivered after recovery refund; treating as failed",
                            idempotency_key
                        );
                        Ok(PurchaseOutcome::Failed {
                            message: "provisioning exceeded the recovery timeout".to_string(),
                        })
                    }
                }
            }
            Err(action_err) => {
                let refunded = self.compensate(&step).await?;
                info!(
                    "Purchase {} failed for tenant {} ({}), refunded {}p",
                    idempotency_key, tenant_id, action_err, refunded
                );
                Ok(PurchaseOutcome::Failed {
                    message: action_err.to_string(),
                })
            }
        }
    }

    /// Refund a step's debit and mark it compensated.
    ///
    /// Safe to run from the request path and the sweep concurrently: the
    /// refund is keyed by the step's compensation key, the status flip is a
    /// compare-and-set.
    async fn compensate(&self, step: &SagaStep) -> AppResult<i64> {
        let refund = NewLedgerEntry {
            tenant_id: step.tenant_id,
            entry_type: LedgerEntryType::Refund,
            amount_pence: step.amount_pence,
            idempotency_key: step.compensation_key.clone(),
            related_resource_id: Some(step.id.to_string()),
        };
        let applied = self.ledger.apply_unchecked(refund).await?;

        self.sagas
            .transition(step.id, SagaStatus::Pending, SagaStatus::Compensated)
            .await?;

        Ok(if applied.duplicate { 0 } else { step.amount_pence })
    }

    /// Recovery sweep: refund pending steps older than `timeout_secs`.
    ///
    /// Covers crashes between debit and outcome. A step whose debit never
    /// posted is closed without a refund.
    #[instrument(skip(self))]
    pub async fn recover(&self, timeout_secs: i64) -> AppResult<RecoverySummary> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(timeout_secs);
        let stranded = self.sagas.list_stranded(cutoff).await?;
        let examined = stranded.len();

        let mut refunded = 0u64;
        for step in stranded {
            let debit_posted = self
                .ledger
                .find_entry_by_key(step.tenant_id, &step.debit_key)
                .await?
                .is_some();

            if debit_posted {
                match self.compensate(&step).await {
                    Ok(amount) if amount > 0 => {
                        warn!(
                            "Recovery refunded stranded purchase {} for tenant {}: {}p",
                            step.debit_key, step.tenant_id, amount
                        );
                        refunded += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Recovery failed for saga step {}: {}", step.id, e);
                    }
                }
            } else {
                // Crash landed before the debit; nothing to reverse
                self.sagas
                    .transition(step.id, SagaStatus::Pending, SagaStatus::Compensated)
                    .await?;
            }
        }

        Ok(RecoverySummary { examined, refunded })
    }
}
