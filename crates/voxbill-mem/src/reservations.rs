//! In-memory reservation store

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use voxbill_core::{
    models::{Reservation, ReservationStatus},
    traits::ReservationStore,
    AppError, AppResult,
};

/// In-memory implementation of `ReservationStore`
#[derive(Default)]
pub struct MemReservationStore {
    reservations: RwLock<HashMap<Uuid, Reservation>>,
}

impl MemReservationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ReservationStore for MemReservationStore {
    async fn insert(&self, reservation: &Reservation) -> AppResult<Reservation> {
        let mut reservations = self.reservations.write().await;
        if reservations.contains_key(&reservation.id) {
            return Err(AppError::AlreadyExists(format!(
                "reservation {}",
                reservation.id
            )));
        }
        reservations.insert(reservation.id, reservation.clone());
        Ok(reservation.clone())
    }

    async fn fetch(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        Ok(self.reservations.read().await.get(&id).cloned())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: ReservationStatus,
        final_delta_pence: i64,
    ) -> AppResult<Option<Reservation>> {
        let mut reservations = self.reservations.write().await;
        let reservation = reservations
            .get_mut(&id)
            .ok_or_else(|| AppError::ReservationNotFound(id.to_string()))?;

        if !reservation.status.is_open() {
            return Ok(None);
        }

        let now = Utc::now();
        reservation.status = status;
        reservation.final_delta_pence = Some(final_delta_pence);
        reservation.finalized_at = Some(now);
        reservation.updated_at = now;

        Ok(Some(reservation.clone()))
    }

    async fn list_stale_open(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let reservations = self.reservations.read().await;
        Ok(reservations
            .values()
            .filter(|r| r.status.is_open() && r.created_at < cutoff)
            .cloned()
            .collect())
    }
}
