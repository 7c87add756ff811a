//! In-memory wallet and ledger store
//!
//! All balance mutation for a tenant goes through that tenant's book mutex,
//! so the entry append and the balance update are observed atomically and
//! applies for one tenant are totally ordered. Different tenants never
//! contend.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;
use voxbill_core::{
    models::{LedgerEntry, Wallet},
    traits::{LedgerApplied, LedgerStore, NewLedgerEntry, WalletStore},
    AppError, AppResult,
};

/// One tenant's wallet plus its append-only entry log
struct TenantBook {
    wallet: Wallet,
    entries: Vec<LedgerEntry>,
    /// idempotency_key -> result recorded at first apply
    applied_keys: HashMap<String, LedgerApplied>,
}

/// In-memory implementation of `WalletStore` + `LedgerStore`
#[derive(Default)]
pub struct MemLedgerStore {
    books: RwLock<HashMap<Uuid, Arc<Mutex<TenantBook>>>>,
}

impl MemLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn book(&self, tenant_id: Uuid) -> AppResult<Arc<Mutex<TenantBook>>> {
        let books = self.books.read().await;
        books
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| AppError::WalletNotFound(tenant_id.to_string()))
    }
}

#[async_trait::async_trait]
impl WalletStore for MemLedgerStore {
    async fn create_wallet(&self, wallet: &Wallet) -> AppResult<Wallet> {
        let mut books = self.books.write().await;
        if books.contains_key(&wallet.tenant_id) {
            return Err(AppError::AlreadyExists(format!(
                "wallet for tenant {}",
                wallet.tenant_id
            )));
        }

        books.insert(
            wallet.tenant_id,
            Arc::new(Mutex::new(TenantBook {
                wallet: wallet.clone(),
                entries: Vec::new(),
                applied_keys: HashMap::new(),
            })),
        );

        debug!("Created wallet for tenant {}", wallet.tenant_id);
        Ok(wallet.clone())
    }

    async fn fetch_wallet(&self, tenant_id: Uuid) -> AppResult<Option<Wallet>> {
        let books = self.books.read().await;
        match books.get(&tenant_id) {
            Some(book) => Ok(Some(book.lock().await.wallet.clone())),
            None => Ok(None),
        }
    }

    async fn archive_wallet(&self, tenant_id: Uuid) -> AppResult<Wallet> {
        let book = self.book(tenant_id).await?;
        let mut book = book.lock().await;
        book.wallet.status = voxbill_core::models::WalletStatus::Archived;
        book.wallet.updated_at = Utc::now();
        Ok(book.wallet.clone())
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemLedgerStore {
    async fn apply_entry(
        &self,
        entry: NewLedgerEntry,
        overdraft_pence: Option<i64>,
    ) -> AppResult<LedgerApplied> {
        let book = self.book(entry.tenant_id).await?;
        let mut book = book.lock().await;

        // Replay: prior result, no delta
        if let Some(prior) = book.applied_keys.get(&entry.idempotency_key) {
            debug!(
                "Ledger replay for tenant {} key {}",
                entry.tenant_id, entry.idempotency_key
            );
            return Ok(LedgerApplied {
                duplicate: true,
                ..prior.clone()
            });
        }

        if !book.wallet.is_active() {
            return Err(AppError::WalletArchived(entry.tenant_id.to_string()));
        }

        // Debit guard: balance + amount >= -overdraft
        if let Some(overdraft) = overdraft_pence {
            if entry.amount_pence < 0
                && book.wallet.balance_pence + entry.amount_pence < -overdraft
            {
                warn!(
                    "Insufficient balance for tenant {}: required {}, available {}",
                    entry.tenant_id,
                    -entry.amount_pence,
                    book.wallet.available_balance(overdraft)
                );
                return Err(AppError::InsufficientBalance {
                    required_pence: -entry.amount_pence,
                    available_pence: book.wallet.available_balance(overdraft),
                });
            }
        }

        let record = LedgerEntry {
            id: Uuid::new_v4(),
            tenant_id: entry.tenant_id,
            entry_type: entry.entry_type,
            amount_pence: entry.amount_pence,
            idempotency_key: entry.idempotency_key.clone(),
            related_resource_id: entry.related_resource_id.clone(),
            created_at: Utc::now(),
        };

        // Entry append and balance move happen under the same book lock
        book.wallet.balance_pence += entry.amount_pence;
        book.wallet.updated_at = record.created_at;

        let applied = LedgerApplied {
            entry_id: record.id,
            new_balance_pence: book.wallet.balance_pence,
            duplicate: false,
        };

        book.entries.push(record);
        book.applied_keys
            .insert(entry.idempotency_key, applied.clone());

        Ok(applied)
    }

    async fn find_entry_by_key(
        &self,
        tenant_id: Uuid,
        idempotency_key: &str,
    ) -> AppResult<Option<LedgerEntry>> {
        let book = self.book(tenant_id).await?;
        let book = book.lock().await;
        Ok(book
            .entries
            .iter()
            .find(|e| e.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn sum_entries(&self, tenant_id: Uuid) -> AppResult<i64> {
        let book = self.book(tenant_id).await?;
        let book = book.lock().await;
        Ok(book.entries.iter().map(|e| e.amount_pence).sum())
    }

    async fn entries_for_tenant(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<LedgerEntry>> {
        let book = self.book(tenant_id).await?;
        let book = book.lock().await;
        Ok(book
            .entries
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbill_core::models::LedgerEntryType;

    fn topup(tenant_id: Uuid, amount: i64, key: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            tenant_id,
            entry_type: LedgerEntryType::Topup,
            amount_pence: amount,
            idempotency_key: key.to_string(),
            related_resource_id: None,
        }
    }

    async fn store_with_wallet(tenant_id: Uuid) -> MemLedgerStore {
        let store = MemLedgerStore::new();
        store.create_wallet(&Wallet::new(tenant_id, 500)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_apply_and_balance() {
        let tenant_id = Uuid::new_v4();
        let store = store_with_wallet(tenant_id).await;

        let applied = store.apply_entry(topup(tenant_id, 5000, "evt_1"), Some(0)).await.unwrap();
        assert_eq!(applied.new_balance_pence, 5000);
        assert!(!applied.duplicate);

        let wallet = store.fetch_wallet(tenant_id).await.unwrap().unwrap();
        assert_eq!(wallet.balance_pence, 5000);
        assert_eq!(store.sum_entries(tenant_id).await.unwrap(), 5000);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_noop() {
        let tenant_id = Uuid::new_v4();
        let store = store_with_wallet(tenant_id).await;

        let first = store.apply_entry(topup(tenant_id, 5000, "evt_123"), Some(0)).await.unwrap();
        let second = store.apply_entry(topup(tenant_id, 5000, "evt_123"), Some(0)).await.unwrap();

        assert!(second.duplicate);
        assert_eq!(second.entry_id, first.entry_id);
        assert_eq!(second.new_balance_pence, first.new_balance_pence);

        let wallet = store.fetch_wallet(tenant_id).await.unwrap().unwrap();
        assert_eq!(wallet.balance_pence, 5000);
    }

    #[tokio::test]
    async fn test_insufficient_balance_mutates_nothing() {
        let tenant_id = Uuid::new_v4();
        let store = store_with_wallet(tenant_id).await;
        store.apply_entry(topup(tenant_id, 100, "t1"), Some(0)).await.unwrap();

        let mut debit = topup(tenant_id, -500, "d1");
        debit.entry_type = LedgerEntryType::PurchaseDebit;
        let err = store.apply_entry(debit, Some(0)).await.unwrap_err();

        assert!(matches!(err, AppError::InsufficientBalance { .. }));
        assert_eq!(store.sum_entries(tenant_id).await.unwrap(), 100);
        let wallet = store.fetch_wallet(tenant_id).await.unwrap().unwrap();
        assert_eq!(wallet.balance_pence, 100);
    }

    #[tokio::test]
    async fn test_overdraft_allows_negative_balance() {
        let tenant_id = Uuid::new_v4();
        let store = store_with_wallet(tenant_id).await;
        store.apply_entry(topup(tenant_id, 100, "t1"), Some(0)).await.unwrap();

        let mut debit = topup(tenant_id, -300, "d1");
        debit.entry_type = LedgerEntryType::ReservationCommit;
        let applied = store.apply_entry(debit, Some(200)).await.unwrap();

        assert_eq!(applied.new_balance_pence, -200);
    }

    #[tokio::test]
    async fn test_concurrent_applies_conserve_balance() {
        let tenant_id = Uuid::new_v4();
        let store = Arc::new(store_with_wallet(tenant_id).await);

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_entry(topup(tenant_id, 10, &format!("evt_{}", i)), Some(0))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let wallet = store.fetch_wallet(tenant_id).await.unwrap().unwrap();
        assert_eq!(wallet.balance_pence, 500);
        assert_eq!(store.sum_entries(tenant_id).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_archived_wallet_rejects_activity() {
        let tenant_id = Uuid::new_v4();
        let store = store_with_wallet(tenant_id).await;
        store.archive_wallet(tenant_id).await.unwrap();

        let err = store.apply_entry(topup(tenant_id, 100, "t1"), Some(0)).await.unwrap_err();
        assert!(matches!(err, AppError::WalletArchived(_)));
    }
}
