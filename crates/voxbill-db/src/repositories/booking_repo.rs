//! Booking repository implementation
//!
//! The overlap check and insert run in one transaction under a
//! transaction-scoped advisory lock on the resource id, so the
//! no-double-booking property holds even across engine instances. A
//! GiST exclusion constraint on the table backstops the same invariant at
//! the storage level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;
use voxbill_core::{
    models::{Booking, BookingStatus},
    traits::{BookingStore, SlotInsert},
    AppError, AppResult,
};

/// PostgreSQL implementation of `BookingStore`
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    /// Create a new booking repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BOOKING_COLUMNS: &str = r#"
    id, tenant_id, resource_id, start_time, end_time,
    status, idempotency_key, created_at, updated_at
"#;

#[async_trait]
impl BookingStore for PgBookingRepository {
    #[instrument(skip(self, booking), fields(resource_id = %booking.resource_id))]
    async fn insert_if_free(&self, booking: &Booking) -> AppResult<SlotInsert> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        // Serialize attempts on this resource for the rest of the transaction
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&booking.resource_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to take advisory lock: {}", e)))?;

        let existing = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE resource_id = $1
              AND status IN ('pending', 'confirmed')
              AND start_time < $3
              AND $2 < end_time
            LIMIT 1
            "#
        ))
        .bind(&booking.resource_id)
        .bind(booking.start_time)
        .bind(booking.end_time)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::Database(format!("Failed to check overlap: {}", e)))?;

        if let Some(existing) = existing {
            debug!(
                "Overlap on {}: booking {} holds the window",
                booking.resource_id, existing.id
            );
            return Ok(SlotInsert::Overlap(existing.into()));
        }

        let created = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            r#"
            INSERT INTO bookings (
                id, tenant_id, resource_id, start_time, end_time,
                status, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(booking.id)
        .bind(booking.tenant_id)
        .bind(&booking.resource_id)
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.status.to_string())
        .bind(&booking.idempotency_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert booking: {}", e);
            AppError::Database(format!("Failed to insert booking: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(SlotInsert::Inserted(created.into()))
    }

    #[instrument(skip(self))]
    async fn fetch(&self, id: Uuid) -> AppResult<Option<Booking>> {
        let result = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch booking: {}", e)))?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn transition(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> AppResult<Option<Booking>> {
        let result = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET status = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error transitioning booking {}: {}", id, e);
            AppError::Database(format!("Failed to transition booking: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_for_resource(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Booking>> {
        let rows = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE resource_id = $1
              AND start_time < $3
              AND $2 < end_time
            ORDER BY start_time
            "#
        ))
        .bind(resource_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list bookings: {}", e)))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for booking row mapping
#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    tenant_id: Uuid,
    resource_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: String,
    idempotency_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            resource_id: row.resource_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status: BookingStatus::from_str(&row.status).unwrap_or_default(),
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_row_mapping() {
        let now = Utc::now();
        let row = BookingRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            resource_id: "prov-1".to_string(),
            start_time: now,
            end_time: now + chrono::Duration::hours(1),
            status: "confirmed".to_string(),
            idempotency_key: "k1".to_string(),
            created_at: now,
            updated_at: now,
        };

        let booking: Booking = row.into();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(booking.status.holds_slot());
    }
}
