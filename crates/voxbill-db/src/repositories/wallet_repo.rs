//! Wallet and ledger repository implementation
//!
//! PostgreSQL-backed storage for wallets and their append-only ledger.
//! `apply_entry` is the atomicity primitive of the whole engine: it locks
//! the wallet row, enforces the overdraft rule, and records the entry and
//! the balance move in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;
use voxbill_core::{
    models::{LedgerEntry, LedgerEntryType, Wallet, WalletStatus},
    traits::{LedgerApplied, LedgerStore, NewLedgerEntry, WalletStore},
    AppError, AppResult,
};

/// PostgreSQL implementation of `WalletStore` and `LedgerStore`
pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    /// Create a new wallet repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletStore for PgWalletRepository {
    #[instrument(skip(self, wallet), fields(tenant_id = %wallet.tenant_id))]
    async fn create_wallet(&self, wallet: &Wallet) -> AppResult<Wallet> {
        debug!("Creating wallet for tenant {}", wallet.tenant_id);

        let row = sqlx::query_as::<sqlx::Postgres, WalletRow>(
            r#"
            INSERT INTO wallets (
                tenant_id, balance_pence, low_balance_threshold_pence,
                currency, status
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                tenant_id, balance_pence, low_balance_threshold_pence,
                currency, status, created_at, updated_at
            "#,
        )
        .bind(wallet.tenant_id)
        .bind(wallet.balance_pence)
        .bind(wallet.low_balance_threshold_pence)
        .bind(&wallet.currency)
        .bind(wallet.status.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating wallet: {}", e);
            if e.to_string().contains("unique constraint")
                || e.to_string().contains("duplicate key")
            {
                AppError::AlreadyExists(format!("wallet for tenant {}", wallet.tenant_id))
            } else {
                AppError::Database(format!("Failed to create wallet: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn fetch_wallet(&self, tenant_id: Uuid) -> AppResult<Option<Wallet>> {
        let result = sqlx::query_as::<sqlx::Postgres, WalletRow>(
            r#"
            SELECT
                tenant_id, balance_pence, low_balance_threshold_pence,
                currency, status, created_at, updated_at
            FROM wallets
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error fetching wallet {}: {}", tenant_id, e);
            AppError::Database(format!("Failed to fetch wallet: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn archive_wallet(&self, tenant_id: Uuid) -> AppResult<Wallet> {
        let row = sqlx::query_as::<sqlx::Postgres, WalletRow>(
            r#"
            UPDATE wallets
            SET status = 'archived',
                updated_at = NOW()
            WHERE tenant_id = $1
            RETURNING
                tenant_id, balance_pence, low_balance_threshold_pence,
                currency, status, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error archiving wallet {}: {}", tenant_id, e);
            AppError::Database(format!("Failed to archive wallet: {}", e))
        })?
        .ok_or_else(|| AppError::WalletNotFound(tenant_id.to_string()))?;

        Ok(row.into())
    }
}

#[async_trait]
impl LedgerStore for PgWalletRepository {
    #[instrument(skip(self, entry), fields(tenant_id = %entry.tenant_id, entry_type = %entry.entry_type))]
    async fn apply_entry(
        &self,
        entry: NewLedgerEntry,
        overdraft_pence: Option<i64>,
    ) -> AppResult<LedgerApplied> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        // Lock the wallet row; all applies for this tenant serialize here
        let wallet = sqlx::query_as::<sqlx::Postgres, WalletRow>(
            r#"
            SELECT
                tenant_id, balance_pence, low_balance_threshold_pence,
                currency, status, created_at, updated_at
            FROM wallets
            WHERE tenant_id = $1
            FOR UPDATE
            "#,
        )
        .bind(entry.tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to lock wallet: {}", e);
            AppError::Database(format!("Failed to lock wallet: {}", e))
        })?
        .ok_or_else(|| AppError::WalletNotFound(entry.tenant_id.to_string()))?;

        let wallet: Wallet = wallet.into();

        // Replay: return the recorded result, apply nothing
        let prior = sqlx::query_as::<sqlx::Postgres, LedgerEntryRow>(
            r#"
            SELECT
                id, tenant_id, entry_type, amount_pence, balance_after_pence,
                idempotency_key, related_resource_id, created_at
            FROM ledger_entries
            WHERE tenant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(entry.tenant_id)
        .bind(&entry.idempotency_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::Database(format!("Failed to check idempotency key: {}", e)))?;

        if let Some(prior) = prior {
            debug!(
                "Ledger replay for tenant {} key {}",
                entry.tenant_id, entry.idempotency_key
            );
            return Ok(LedgerApplied {
                entry_id: prior.id,
                new_balance_pence: prior.balance_after_pence,
                duplicate: true,
            });
        }

        if !wallet.is_active() {
            return Err(AppError::WalletArchived(entry.tenant_id.to_string()));
        }

        if let Some(overdraft) = overdraft_pence {
            if entry.amount_pence < 0 && wallet.balance_pence + entry.amount_pence < -overdraft {
                warn!(
                    "Insufficient balance for tenant {}: required {}, available {}",
                    entry.tenant_id,
                    -entry.amount_pence,
                    wallet.available_balance(overdraft)
                );
                return Err(AppError::InsufficientBalance {
                    required_pence: -entry.amount_pence,
                    available_pence: wallet.available_balance(overdraft),
                });
            }
        }

        let new_balance = wallet.balance_pence + entry.amount_pence;
        let entry_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, tenant_id, entry_type, amount_pence, balance_after_pence,
                idempotency_key, related_resource_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry_id)
        .bind(entry.tenant_id)
        .bind(entry.entry_type.to_string())
        .bind(entry.amount_pence)
        .bind(new_balance)
        .bind(&entry.idempotency_key)
        .bind(&entry.related_resource_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert ledger entry: {}", e);
            AppError::Database(format!("Failed to insert ledger entry: {}", e))
        })?;

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance_pence = $2,
                updated_at = NOW()
            WHERE tenant_id = $1
            "#,
        )
        .bind(entry.tenant_id)
        .bind(new_balance)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to update wallet balance: {}", e);
            AppError::Database(format!("Failed to update balance: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(LedgerApplied {
            entry_id,
            new_balance_pence: new_balance,
            duplicate: false,
        })
    }

    #[instrument(skip(self))]
    async fn find_entry_by_key(
        &self,
        tenant_id: Uuid,
        idempotency_key: &str,
    ) -> AppResult<Option<LedgerEntry>> {
        let result = sqlx::query_as::<sqlx::Postgres, LedgerEntryRow>(
            r#"
            SELECT
                id, tenant_id, entry_type, amount_pence, balance_after_pence,
                idempotency_key, related_resource_id, created_at
            FROM ledger_entries
            WHERE tenant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to find ledger entry: {}", e)))?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn sum_entries(&self, tenant_id: Uuid) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount_pence), 0) FROM ledger_entries WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to sum ledger entries: {}", e)))?;

        Ok(result.0)
    }

    #[instrument(skip(self))]
    async fn entries_for_tenant(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<sqlx::Postgres, LedgerEntryRow>(
            r#"
            SELECT
                id, tenant_id, entry_type, amount_pence, balance_after_pence,
                idempotency_key, related_resource_id, created_at
            FROM ledger_entries
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch ledger entries: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for wallet row mapping
#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    tenant_id: Uuid,
    balance_pence: i64,
    low_balance_threshold_pence: i64,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            balance_pence: row.balance_pence,
            low_balance_threshold_pence: row.low_balance_threshold_pence,
            currency: row.currency,
            status: WalletStatus::from_str(&row.status).unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Helper struct for ledger entry row mapping
#[derive(Debug, sqlx::FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    tenant_id: Uuid,
    entry_type: String,
    amount_pence: i64,
    balance_after_pence: i64,
    idempotency_key: String,
    related_resource_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<LedgerEntryRow> for LedgerEntry {
    fn from(row: LedgerEntryRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            entry_type: LedgerEntryType::from_str(&row.entry_type)
                .unwrap_or(LedgerEntryType::Topup),
            amount_pence: row.amount_pence,
            idempotency_key: row.idempotency_key,
            related_resource_id: row.related_resource_id,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_row_mapping() {
        let now = Utc::now();
        let row = WalletRow {
            tenant_id: Uuid::new_v4(),
            balance_pence: 9300,
            low_balance_threshold_pence: 500,
            currency: "GBP".to_string(),
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        };

        let wallet: Wallet = row.into();
        assert_eq!(wallet.balance_pence, 9300);
        assert_eq!(wallet.status, WalletStatus::Active);
    }

    #[test]
    fn test_ledger_entry_row_mapping() {
        let now = Utc::now();
        let row = LedgerEntryRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            entry_type: "reservation_hold".to_string(),
            amount_pence: -1000,
            balance_after_pence: 9000,
            idempotency_key: "reservation_hold:call-1".to_string(),
            related_resource_id: Some("call-1".to_string()),
            created_at: now,
        };

        let entry: LedgerEntry = row.into();
        assert_eq!(entry.entry_type, LedgerEntryType::ReservationHold);
        assert!(entry.is_debit());
    }
}
