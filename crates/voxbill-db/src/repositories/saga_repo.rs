//! Saga step repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{error, instrument};
use uuid::Uuid;
use voxbill_core::{
    models::{SagaStatus, SagaStep},
    traits::SagaStore,
    AppError, AppResult,
};

/// PostgreSQL implementation of `SagaStore`
pub struct PgSagaRepository {
    pool: PgPool,
}

impl PgSagaRepository {
    /// Create a new saga repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SAGA_COLUMNS: &str = r#"
    id, tenant_id, debit_entry_id, debit_key, compensation_key,
    amount_pence, related_resource_id, status, created_at, updated_at
"#;

#[async_trait]
impl SagaStore for PgSagaRepository {
    #[instrument(skip(self, step), fields(id = %step.id))]
    async fn insert(&self, step: &SagaStep) -> AppResult<SagaStep> {
        let row = sqlx::query_as::<sqlx::Postgres, SagaRow>(&format!(
            r#"
            INSERT INTO saga_steps (
                id, tenant_id, debit_key, compensation_key,
                amount_pence, related_resource_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SAGA_COLUMNS}
            "#
        ))
        .bind(step.id)
        .bind(step.tenant_id)
        .bind(&step.debit_key)
        .bind(&step.compensation_key)
        .bind(step.amount_pence)
        .bind(&step.related_resource_id)
        .bind(step.status.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating saga step: {}", e);
            AppError::Database(format!("Failed to create saga step: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn set_debit_entry(&self, id: Uuid, debit_entry_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE saga_steps
            SET debit_entry_id = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(debit_entry_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to attach debit entry: {}", e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn transition(
        &self,
        id: Uuid,
        from: SagaStatus,
        to: SagaStatus,
    ) -> AppResult<Option<SagaStep>> {
        let result = sqlx::query_as::<sqlx::Postgres, SagaRow>(&format!(
            r#"
            UPDATE saga_steps
            SET status = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {SAGA_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error transitioning saga step {}: {}", id, e);
            AppError::Database(format!("Failed to transition saga step: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_stranded(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<SagaStep>> {
        let rows = sqlx::query_as::<sqlx::Postgres, SagaRow>(&format!(
            r#"
            SELECT {SAGA_COLUMNS}
            FROM saga_steps
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list stranded saga steps: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for saga step row mapping
#[derive(Debug, sqlx::FromRow)]
struct SagaRow {
    id: Uuid,
    tenant_id: Uuid,
    debit_entry_id: Option<Uuid>,
    debit_key: String,
    compensation_key: String,
    amount_pence: i64,
    related_resource_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SagaRow> for SagaStep {
    fn from(row: SagaRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            debit_entry_id: row.debit_entry_id,
            debit_key: row.debit_key,
            compensation_key: row.compensation_key,
            amount_pence: row.amount_pence,
            related_resource_id: row.related_resource_id,
            status: SagaStatus::from_str(&row.status).unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
