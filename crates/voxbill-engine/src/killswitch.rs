//! Kill-switch monitor
//!
//! Cheap, frequent balance check invoked mid-session to decide whether an
//! expensive external session must be cut off. Reads the materialized
//! balance through the snapshot cache - never a table scan, never a lock
//! shared with the slot subsystem - and performs no writes.

use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use voxbill_core::{traits::LedgerStore, AppError, AppResult};

use crate::snapshot::{SnapshotCache, WalletSnapshot};

/// Result of a mid-session balance check
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BalanceCheck {
    /// True when the session must be terminated now
    pub should_terminate: bool,
    /// Balance remaining after the accrued usage, in pence
    pub remaining_pence: i64,
    /// True when the remaining balance is at or below the wallet threshold
    pub low_balance: bool,
}

/// Kill-switch monitor
pub struct KillSwitchMonitor {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn SnapshotCache>,
    snapshot_ttl_secs: u64,
}

impl KillSwitchMonitor {
    /// Create a new kill-switch monitor
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn SnapshotCache>,
        snapshot_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            cache,
            snapshot_ttl_secs,
        }
    }

    /// Decide whether a session that has accrued `accrued_pence` of unposted
    /// usage may continue.
    ///
    /// `remaining = materialized balance - accrued`; the session stops at
    /// `remaining <= 0`. Cache trouble degrades to a direct wallet read
    /// rather than failing the check.
    #[instrument(skip(self))]
    pub async fn check(&self, tenant_id: Uuid, accrued_pence: i64) -> AppResult<BalanceCheck> {
        if accrued_pence < 0 {
            return Err(AppError::InvalidInput(
                "accrued_pence must not be negative".to_string(),
            ));
        }

        let snapshot = match self.cache.get_snapshot(tenant_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => self.refresh(tenant_id).await?,
            Err(e) => {
                warn!("Snapshot cache read failed for {}: {}", tenant_id, e);
                self.refresh(tenant_id).await?
            }
        };

        let remaining_pence = snapshot.balance_pence - accrued_pence;
        let check = BalanceCheck {
            should_terminate: remaining_pence <= 0,
            remaining_pence,
            low_balance: remaining_pence <= snapshot.low_balance_threshold_pence,
        };

        debug!(
            "Balance check for {}: remaining {}p, terminate={}",
            tenant_id, check.remaining_pence, check.should_terminate
        );
        Ok(check)
    }

    async fn refresh(&self, tenant_id: Uuid) -> AppResult<WalletSnapshot> {
        let wallet = self
            .store
            .fetch_wallet(tenant_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(tenant_id.to_string()))?;

        let snapshot = WalletSnapshot {
            balance_pence: wallet.balance_pence,
            low_balance_threshold_pence: wallet.low_balance_threshold_pence,
        };

        if let Err(e) = self
            .cache
            .put_snapshot(tenant_id, &snapshot, self.snapshot_ttl_secs)
            .await
        {
            warn!("Snapshot cache write failed for {}: {}", tenant_id, e);
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbill_core::models::{LedgerEntryType, Wallet};
    use voxbill_core::traits::{LedgerStore as _, NewLedgerEntry, WalletStore};
    use voxbill_mem::{MemCache, MemLedgerStore};

    async fn fixture(balance: i64, threshold: i64) -> (KillSwitchMonitor, Uuid) {
        let store = Arc::new(MemLedgerStore::new());
        let tenant_id = Uuid::new_v4();
        store
            .create_wallet(&Wallet::new(tenant_id, threshold))
            .await
            .unwrap();
        if balance > 0 {
            store
                .apply_entry(
                    NewLedgerEntry {
                        tenant_id,
                        entry_type: LedgerEntryType::Topup,
                        amount_pence: balance,
                        idempotency_key: "seed".to_string(),
                        related_resource_id: None,
                    },
                    Some(0),
                )
                .await
                .unwrap();
        }

        let monitor = KillSwitchMonitor::new(store, Arc::new(MemCache::new()), 5);
        (monitor, tenant_id)
    }

    #[tokio::test]
    async fn test_healthy_session_continues() {
        let (monitor, tenant_id) = fixture(10000, 500).await;

        let check = monitor.check(tenant_id, 2000).await.unwrap();
        assert!(!check.should_terminate);
        assert!(!check.low_balance);
        assert_eq!(check.remaining_pence, 8000);
    }

    #[tokio::test]
    async fn test_terminates_exactly_at_zero_remaining() {
        let (monitor, tenant_id) = fixture(1000, 0).await;

        let check = monitor.check(tenant_id, 999).await.unwrap();
        assert!(!check.should_terminate);
        assert_eq!(check.remaining_pence, 1);

        let check = monitor.check(tenant_id, 1000).await.unwrap();
        assert!(check.should_terminate);
        assert_eq!(check.remaining_pence, 0);

        let check = monitor.check(tenant_id, 1500).await.unwrap();
        assert!(check.should_terminate);
        assert_eq!(check.remaining_pence, -500);
    }

    #[tokio::test]
    async fn test_low_balance_flag_at_threshold() {
        let (monitor, tenant_id) = fixture(1000, 300).await;

        let check = monitor.check(tenant_id, 699).await.unwrap();
        assert!(!check.low_balance);

        let check = monitor.check(tenant_id, 700).await.unwrap();
        assert!(check.low_balance);
        assert!(!check.should_terminate);
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let (monitor, _) = fixture(0, 0).await;
        let err = monitor.check(Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, AppError::WalletNotFound(_)));
    }
}
