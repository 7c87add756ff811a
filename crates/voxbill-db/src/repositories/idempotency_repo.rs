//! Idempotency repository implementation
//!
//! The unique index on `(tenant_id, family, key)` picks the single fresh
//! claimant: `INSERT ... ON CONFLICT DO NOTHING` either wins the key or
//! reads the recorded state. There is no cross-process wait primitive, so a
//! claimed-but-incomplete key reports `InFlight` and the caller backs off.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;
use voxbill_core::{
    models::OpFamily,
    traits::{Claim, ClaimTicket, IdempotencyStore},
    AppError, AppResult,
};

/// PostgreSQL implementation of `IdempotencyStore`
pub struct PgIdempotencyRepository {
    pool: PgPool,
}

impl PgIdempotencyRepository {
    /// Create a new idempotency repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyRepository {
    #[instrument(skip(self))]
    async fn claim(&self, tenant_id: Uuid, family: OpFamily, key: &str) -> AppResult<Claim> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records (tenant_id, family, key)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, family, key) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(family.to_string())
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim idempotency key: {}", e);
            AppError::Database(format!("Failed to claim idempotency key: {}", e))
        })?;

        if inserted.rows_affected() == 1 {
            debug!("Fresh idempotency claim: {}/{}", family, key);
            return Ok(Claim::Fresh(ClaimTicket {
                tenant_id,
                family,
                key: key.to_string(),
            }));
        }

        let recorded: Option<(Option<serde_json::Value>,)> = sqlx::query_as(
            r#"
            SELECT result
            FROM idempotency_records
            WHERE tenant_id = $1 AND family = $2 AND key = $3
            "#,
        )
        .bind(tenant_id)
        .bind(family.to_string())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to read idempotency record: {}", e)))?;

        match recorded {
            Some((Some(result),)) => Ok(Claim::Duplicate(result)),
            Some((None,)) => Ok(Claim::InFlight),
            // The record vanished between insert and read (abandoned);
            // treat as contention and let the caller retry
            None => Ok(Claim::InFlight),
        }
    }

    #[instrument(skip(self, result))]
    async fn complete(&self, ticket: ClaimTicket, result: serde_json::Value) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_records
            SET result = $4
            WHERE tenant_id = $1 AND family = $2 AND key = $3
            "#,
        )
        .bind(ticket.tenant_id)
        .bind(ticket.family.to_string())
        .bind(&ticket.key)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to complete idempotency record: {}", e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn abandon(&self, ticket: ClaimTicket) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE tenant_id = $1 AND family = $2 AND key = $3 AND result IS NULL
            "#,
        )
        .bind(ticket.tenant_id)
        .bind(ticket.family.to_string())
        .bind(&ticket.key)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to abandon idempotency record: {}", e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        // Settled records past retention, plus claims stranded by crashes
        let result = sqlx::query("DELETE FROM idempotency_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to sweep idempotency records: {}", e)))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Store behavior is covered end-to-end in the engine suite against the
    // in-memory implementation; this exercises the SQL paths.
    #[tokio::test]
    #[ignore] // Requires database
    async fn test_claim_complete_roundtrip() {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/voxbill".to_string());
        let pool = crate::create_pool(&database_url, Some(2)).await.unwrap();
        let repo = PgIdempotencyRepository::new(pool);

        let tenant_id = Uuid::new_v4();
        let ticket = match repo.claim(tenant_id, OpFamily::Topup, "evt_1").await.unwrap() {
            Claim::Fresh(ticket) => ticket,
            _ => panic!("expected fresh claim"),
        };

        match repo.claim(tenant_id, OpFamily::Topup, "evt_1").await.unwrap() {
            Claim::InFlight => {}
            _ => panic!("expected in-flight"),
        }

        repo.complete(ticket, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        match repo.claim(tenant_id, OpFamily::Topup, "evt_1").await.unwrap() {
            Claim::Duplicate(result) => assert_eq!(result["ok"], true),
            _ => panic!("expected duplicate"),
        }
    }
}
