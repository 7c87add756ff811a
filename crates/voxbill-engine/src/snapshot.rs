//! Wallet snapshot caching
//!
//! The kill-switch path reads balances thousands of times per minute across
//! active sessions. It goes through this narrow, object-safe seam instead
//! of the full generic `CacheService`, so the rest of the engine can hold a
//! `dyn SnapshotCache` without caring which cache backs it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use voxbill_cache::keys;
use voxbill_core::{traits::CacheService, AppResult};

/// Cached projection of the two wallet fields the kill-switch needs
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub balance_pence: i64,
    pub low_balance_threshold_pence: i64,
}

/// Narrow cache interface for wallet snapshots
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Fetch the cached snapshot for a tenant, if still fresh
    async fn get_snapshot(&self, tenant_id: Uuid) -> AppResult<Option<WalletSnapshot>>;

    /// Store a snapshot with the given TTL
    async fn put_snapshot(
        &self,
        tenant_id: Uuid,
        snapshot: &WalletSnapshot,
        ttl_secs: u64,
    ) -> AppResult<()>;

    /// Invalidate after a ledger apply so the next check re-reads
    async fn drop_snapshot(&self, tenant_id: Uuid) -> AppResult<bool>;
}

// Every CacheService (Redis, in-memory) is usable as a SnapshotCache.
#[async_trait]
impl<C: CacheService> SnapshotCache for C {
    async fn get_snapshot(&self, tenant_id: Uuid) -> AppResult<Option<WalletSnapshot>> {
        self.get(&keys::wallet_snapshot_key(tenant_id)).await
    }

    async fn put_snapshot(
        &self,
        tenant_id: Uuid,
        snapshot: &WalletSnapshot,
        ttl_secs: u64,
    ) -> AppResult<()> {
        self.set(&keys::wallet_snapshot_key(tenant_id), snapshot, ttl_secs)
            .await
    }

    async fn drop_snapshot(&self, tenant_id: Uuid) -> AppResult<bool> {
        self.delete(&keys::wallet_snapshot_key(tenant_id)).await
    }
}
