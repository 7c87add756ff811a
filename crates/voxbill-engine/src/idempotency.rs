//! Idempotency guard
//!
//! Wraps every mutating engine operation: the first caller to claim a
//! `(tenant, family, key)` executes the side effects, later callers observe
//! the recorded result. Under N concurrent calls with the same key exactly
//! one runs.
//!
//! Failure handling: a closure error abandons the claim so a retry starts
//! fresh - business declines are outcomes, not errors, and are recorded
//! like any other result.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use voxbill_core::{
    models::OpFamily,
    traits::{Claim, IdempotencyStore},
    AppError, AppResult,
};

/// Result of a guarded operation
#[derive(Debug, Clone)]
pub struct GuardResult<T> {
    pub value: T,
    /// False when the value was replayed from a previous execution
    pub first: bool,
}

/// Idempotency guard service
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyGuard {
    /// Create a new guard over the given store
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    /// Run `op` exactly once per `(tenant, family, key)`.
    ///
    /// Returns the operation's result, or the recorded result of the first
    /// execution for duplicate keys. A key currently being executed by
    /// another caller surfaces as `Busy` when the store cannot park the
    /// duplicate.
    #[instrument(skip(self, op), fields(%tenant_id, %family, key))]
    pub async fn run<T, F, Fut>(
        &self,
        tenant_id: Uuid,
        family: OpFamily,
        key: &str,
        op: F,
    ) -> AppResult<GuardResult<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if key.is_empty() {
            return Err(AppError::MissingField("idempotency_key".to_string()));
        }

        match self.store.claim(tenant_id, family, key).await? {
            Claim::Fresh(ticket) => match op().await {
                Ok(value) => {
                    let recorded = serde_json::to_value(&value)?;
                    self.store.complete(ticket, recorded).await?;
                    Ok(GuardResult { value, first: true })
                }
                Err(err) => {
                    // Release the claim so a retry is not locked out
                    if let Err(abandon_err) = self.store.abandon(ticket).await {
                        warn!(
                            "Failed to abandon idempotency claim for {}: {}",
                            key, abandon_err
                        );
                    }
                    Err(err)
                }
            },
            Claim::Duplicate(recorded) => {
                debug!("Duplicate operation {}/{}, replaying result", family, key);
                let value = serde_json::from_value(recorded).map_err(|e| {
                    AppError::Internal(format!("recorded result no longer decodes: {}", e))
                })?;
                Ok(GuardResult {
                    value,
                    first: false,
                })
            }
            Claim::InFlight => Err(AppError::Busy(format!("operation {} in flight", key))),
        }
    }

    /// Drop records claimed before `cutoff`; returns how many were removed
    pub async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.store.sweep_expired(cutoff).await
    }
}
