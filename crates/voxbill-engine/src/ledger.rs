//! Ledger service
//!
//! The single mutation path for wallet balances. Callers never
//! read-modify-write a balance: they describe the entry and the store
//! applies it atomically against the materialized wallet row. The service
//! layers the configured overdraft policy on top and keeps the kill-switch
//! snapshot cache coherent.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use voxbill_core::{
    models::{LedgerEntry, LedgerEntryType, Wallet},
    traits::{LedgerApplied, LedgerStore, NewLedgerEntry},
    AppError, AppResult,
};

use crate::snapshot::SnapshotCache;

/// Reconciliation report for a tenant
///
/// `drift_pence` must always be zero; anything else means the conservation
/// invariant was violated and the ledger needs forensic attention.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconciliationReport {
    pub tenant_id: Uuid,
    pub balance_pence: i64,
    pub ledger_sum_pence: i64,
    pub drift_pence: i64,
}

/// Ledger service
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn SnapshotCache>,
    overdraft_pence: i64,
}

impl LedgerService {
    /// Create a new ledger service
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn SnapshotCache>,
        overdraft_pence: i64,
    ) -> Self {
        Self {
            store,
            cache,
            overdraft_pence,
        }
    }

    /// Provision the wallet for a new tenant
    #[instrument(skip(self))]
    pub async fn create_wallet(
        &self,
        tenant_id: Uuid,
        low_balance_threshold_pence: i64,
    ) -> AppResult<Wallet> {
        let wallet = Wallet::new(tenant_id, low_balance_threshold_pence);
        let created = self.store.create_wallet(&wallet).await?;
        info!("Provisioned wallet for tenant {}", tenant_id);
        Ok(created)
    }

    /// Fetch a tenant's wallet
    pub async fn wallet(&self, tenant_id: Uuid) -> AppResult<Wallet> {
        self.store
            .fetch_wallet(tenant_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(tenant_id.to_string()))
    }

    /// Materialized balance; never recomputed from entries on this path
    pub async fn balance(&self, tenant_id: Uuid) -> AppResult<i64> {
        Ok(self.wallet(tenant_id).await?.balance_pence)
    }

    /// Soft-archive a wallet with its tenant
    #[instrument(skip(self))]
    pub async fn archive_wallet(&self, tenant_id: Uuid) -> AppResult<Wallet> {
        let wallet = self.store.archive_wallet(tenant_id).await?;
        self.invalidate_snapshot(tenant_id).await;
        Ok(wallet)
    }

    /// Apply an entry under the configured overdraft policy
    #[instrument(skip(self, entry), fields(tenant_id = %entry.tenant_id, entry_type = %entry.entry_type, amount = entry.amount_pence))]
    pub async fn apply(&self, entry: NewLedgerEntry) -> AppResult<LedgerApplied> {
        let tenant_id = entry.tenant_id;
        let applied = self
            .store
            .apply_entry(entry, Some(self.overdraft_pence))
            .await?;
        self.invalidate_snapshot(tenant_id).await;
        Ok(applied)
    }

    /// Apply a settlement or compensation entry with no overdraft check.
    ///
    /// Used where the money is already owed (reservation finalization,
    /// refunds); the kill-switch bounds how far usage can overrun.
    pub(crate) async fn apply_unchecked(&self, entry: NewLedgerEntry) -> AppResult<LedgerApplied> {
        let tenant_id = entry.tenant_id;
        let applied = self.store.apply_entry(entry, None).await?;
        self.invalidate_snapshot(tenant_id).await;
        Ok(applied)
    }

    /// Credit an external payment; the payment event id is the idempotency
    /// key, so a twice-delivered webhook credits once.
    #[instrument(skip(self))]
    pub async fn topup(
        &self,
        tenant_id: Uuid,
        amount_pence: i64,
        event_id: &str,
    ) -> AppResult<LedgerApplied> {
        if amount_pence <= 0 {
            return Err(AppError::InvalidInput(
                "topup amount must be positive".to_string(),
            ));
        }
        if event_id.is_empty() {
            return Err(AppError::MissingField("event_id".to_string()));
        }

        let applied = self
            .apply(NewLedgerEntry {
                tenant_id,
                entry_type: LedgerEntryType::Topup,
                amount_pence,
                idempotency_key: format!("topup:{}", event_id),
                related_resource_id: Some(event_id.to_string()),
            })
            .await?;

        if applied.duplicate {
            info!(
                "Duplicate topup webhook {} for tenant {}, no credit applied",
                event_id, tenant_id
            );
        } else {
            info!(
                "Topup {}p for tenant {}, balance now {}p",
                amount_pence, tenant_id, applied.new_balance_pence
            );
        }
        Ok(applied)
    }

    /// Find an entry by its ledger idempotency key
    pub async fn find_entry_by_key(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> AppResult<Option<LedgerEntry>> {
        self.store.find_entry_by_key(tenant_id, key).await
    }

    /// Most recent entries for a tenant, newest first
    pub async fn entries(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<LedgerEntry>> {
        self.store.entries_for_tenant(tenant_id, limit).await
    }

    /// Audit operation: recompute the entry sum and compare against the
    /// materialized balance.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, tenant_id: Uuid) -> AppResult<ReconciliationReport> {
        let wallet = self.wallet(tenant_id).await?;
        let ledger_sum_pence = self.store.sum_entries(tenant_id).await?;
        let drift_pence = wallet.balance_pence - ledger_sum_pence;

        if drift_pence != 0 {
            warn!(
                "Ledger drift for tenant {}: balance {}p, entries sum {}p",
                tenant_id, wallet.balance_pence, ledger_sum_pence
            );
        }

        Ok(ReconciliationReport {
            tenant_id,
            balance_pence: wallet.balance_pence,
            ledger_sum_pence,
            drift_pence,
        })
    }

    /// Drop the cached snapshot; cache trouble must never fail billing
    async fn invalidate_snapshot(&self, tenant_id: Uuid) {
        if let Err(e) = self.cache.drop_snapshot(tenant_id).await {
            warn!("Failed to invalidate snapshot for {}: {}", tenant_id, e);
        }
    }
}
