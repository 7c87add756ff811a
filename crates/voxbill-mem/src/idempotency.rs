//! In-memory idempotency store
//!
//! First claim on a key wins; concurrent claimants park on the winner's
//! `Notify` and wake holding the recorded result. An abandoned claim wakes
//! the waiters and lets exactly one of them re-claim.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use uuid::Uuid;
use voxbill_core::{
    models::OpFamily,
    traits::{Claim, ClaimTicket, IdempotencyStore},
    AppError, AppResult,
};

type KeyScope = (Uuid, OpFamily, String);

struct Slot {
    result: Option<serde_json::Value>,
    notify: Arc<Notify>,
    created_at: DateTime<Utc>,
}

/// In-memory implementation of `IdempotencyStore`
#[derive(Default)]
pub struct MemIdempotencyStore {
    slots: Mutex<HashMap<KeyScope, Slot>>,
}

impl MemIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IdempotencyStore for MemIdempotencyStore {
    async fn claim(&self, tenant_id: Uuid, family: OpFamily, key: &str) -> AppResult<Claim> {
        let scope: KeyScope = (tenant_id, family, key.to_string());

        loop {
            let notify = {
                let mut slots = self.slots.lock().await;
                match slots.get(&scope) {
                    None => {
                        slots.insert(
                            scope.clone(),
                            Slot {
                                result: None,
                                notify: Arc::new(Notify::new()),
                                created_at: Utc::now(),
                            },
                        );
                        debug!("Fresh idempotency claim: {:?}/{}", family, key);
                        return Ok(Claim::Fresh(ClaimTicket {
                            tenant_id,
                            family,
                            key: key.to_string(),
                        }));
                    }
                    Some(slot) => match &slot.result {
                        Some(result) => return Ok(Claim::Duplicate(result.clone())),
                        None => slot.notify.clone(),
                    },
                }
            };

            // In flight: park until the holder completes or abandons. The
            // waiter must be registered before the map lock is released or
            // a completion in between would be missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            notified.await;
        }
    }

    async fn complete(&self, ticket: ClaimTicket, result: serde_json::Value) -> AppResult<()> {
        let scope: KeyScope = (ticket.tenant_id, ticket.family, ticket.key);
        let mut slots = self.slots.lock().await;
        let slot = slots
            .get_mut(&scope)
            .ok_or_else(|| AppError::Internal(format!("no claim to complete for {}", scope.2)))?;
        slot.result = Some(result);
        slot.notify.notify_waiters();
        Ok(())
    }

    async fn abandon(&self, ticket: ClaimTicket) -> AppResult<()> {
        let scope: KeyScope = (ticket.tenant_id, ticket.family, ticket.key);
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.remove(&scope) {
            slot.notify.notify_waiters();
        }
        Ok(())
    }

    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        // Only settled records expire; in-flight claims stay untouched
        slots.retain(|_, slot| slot.result.is_none() || slot.created_at >= cutoff);
        Ok((before - slots.len()) as u64)
    }
}
