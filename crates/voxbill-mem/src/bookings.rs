//! In-memory booking store
//!
//! `insert_if_free` runs the overlap check and the insert under one store
//! mutex: two concurrent calls for overlapping ranges on the same resource
//! cannot both insert, whatever the slot lock manager above is doing.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;
use voxbill_core::{
    models::{Booking, BookingStatus},
    traits::{BookingStore, SlotInsert},
    AppError, AppResult,
};

#[derive(Default)]
struct Inner {
    by_id: HashMap<Uuid, Booking>,
    by_resource: HashMap<String, Vec<Uuid>>,
}

impl Inner {
    fn find_overlap(
        &self,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<&Booking> {
        self.by_resource.get(resource_id).and_then(|ids| {
            ids.iter()
                .filter_map(|id| self.by_id.get(id))
                .find(|b| b.status.holds_slot() && b.overlaps(start, end))
        })
    }
}

/// In-memory implementation of `BookingStore`
#[derive(Default)]
pub struct MemBookingStore {
    inner: Mutex<Inner>,
}

impl MemBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BookingStore for MemBookingStore {
    async fn insert_if_free(&self, booking: &Booking) -> AppResult<SlotInsert> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) =
            inner.find_overlap(&booking.resource_id, booking.start_time, booking.end_time)
        {
            return Ok(SlotInsert::Overlap(existing.clone()));
        }

        inner.by_id.insert(booking.id, booking.clone());
        inner
            .by_resource
            .entry(booking.resource_id.clone())
            .or_default()
            .push(booking.id);

        Ok(SlotInsert::Inserted(booking.clone()))
    }

    async fn fetch(&self, id: Uuid) -> AppResult<Option<Booking>> {
        Ok(self.inner.lock().await.by_id.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> AppResult<Option<Booking>> {
        let mut inner = self.inner.lock().await;
        let booking = inner
            .by_id
            .get_mut(&id)
            .ok_or_else(|| AppError::BookingNotFound(id.to_string()))?;

        if booking.status != from {
            return Ok(None);
        }

        booking.status = to;
        booking.updated_at = Utc::now();
        Ok(Some(booking.clone()))
    }

    async fn list_for_resource(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Booking>> {
        let inner = self.inner.lock().await;
        let mut bookings: Vec<Booking> = inner
            .by_resource
            .get(resource_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .filter(|b| b.overlaps(from, to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        bookings.sort_by_key(|b| b.start_time);
        Ok(bookings)
    }
}
