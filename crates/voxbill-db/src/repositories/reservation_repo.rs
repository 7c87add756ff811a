//! Reservation repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;
use voxbill_core::{
    models::{Reservation, ReservationStatus},
    traits::ReservationStore,
    AppError, AppResult,
};

/// PostgreSQL implementation of `ReservationStore`
pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    /// Create a new reservation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationStore for PgReservationRepository {
    #[instrument(skip(self, reservation), fields(id = %reservation.id))]
    async fn insert(&self, reservation: &Reservation) -> AppResult<Reservation> {
        debug!("Creating reservation {}", reservation.id);

        let row = sqlx::query_as::<sqlx::Postgres, ReservationRow>(
            r#"
            INSERT INTO reservations (
                id, tenant_id, resource_id, held_pence, estimated_units,
                unit_cost_pence, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
                id, tenant_id, resource_id, held_pence, estimated_units,
                unit_cost_pence, status, final_delta_pence,
                created_at, updated_at, finalized_at
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.tenant_id)
        .bind(&reservation.resource_id)
        .bind(reservation.held_pence)
        .bind(reservation.estimated_units)
        .bind(reservation.unit_cost_pence)
        .bind(reservation.status.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating reservation: {}", e);
            AppError::Database(format!("Failed to create reservation: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        let result = sqlx::query_as::<sqlx::Postgres, ReservationRow>(
            r#"
            SELECT
                id, tenant_id, resource_id, held_pence, estimated_units,
                unit_cost_pence, status, final_delta_pence,
                created_at, updated_at, finalized_at
            FROM reservations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch reservation: {}", e)))?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn finalize(
        &self,
        id: Uuid,
        status: ReservationStatus,
        final_delta_pence: i64,
    ) -> AppResult<Option<Reservation>> {
        // Compare-and-set on open: the row lock makes the first finalizer
        // the only finalizer
        let result = sqlx::query_as::<sqlx::Postgres, ReservationRow>(
            r#"
            UPDATE reservations
            SET status = $2,
                final_delta_pence = $3,
                finalized_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'open'
            RETURNING
                id, tenant_id, resource_id, held_pence, estimated_units,
                unit_cost_pence, status, final_delta_pence,
                created_at, updated_at, finalized_at
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(final_delta_pence)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finalizing reservation {}: {}", id, e);
            AppError::Database(format!("Failed to finalize reservation: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_stale_open(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<sqlx::Postgres, ReservationRow>(
            r#"
            SELECT
                id, tenant_id, resource_id, held_pence, estimated_units,
                unit_cost_pence, status, final_delta_pence,
                created_at, updated_at, finalized_at
            FROM reservations
            WHERE status = 'open' AND created_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list stale reservations: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for reservation row mapping
#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    tenant_id: Uuid,
    resource_id: String,
    held_pence: i64,
    estimated_units: i64,
    unit_cost_pence: i64,
    status: String,
    final_delta_pence: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            resource_id: row.resource_id,
            held_pence: row.held_pence,
            estimated_units: row.estimated_units,
            unit_cost_pence: row.unit_cost_pence,
            status: ReservationStatus::from_str(&row.status).unwrap_or_default(),
            final_delta_pence: row.final_delta_pence,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finalized_at: row.finalized_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_row_mapping() {
        let now = Utc::now();
        let row = ReservationRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            resource_id: "call-1".to_string(),
            held_pence: 1000,
            estimated_units: 10,
            unit_cost_pence: 100,
            status: "committed".to_string(),
            final_delta_pence: Some(300),
            created_at: now,
            updated_at: now,
            finalized_at: Some(now),
        };

        let reservation: Reservation = row.into();
        assert_eq!(reservation.status, ReservationStatus::Committed);
        assert_eq!(reservation.final_delta_pence, Some(300));
    }
}
