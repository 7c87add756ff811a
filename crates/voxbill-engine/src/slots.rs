//! Slot lock manager
//!
//! Serializes concurrent booking attempts against the same provider
//! time-window so exactly one attempt wins. The overlap check and the
//! insert run inside one critical section: a lock table keyed by
//! `(resource_id, time bucket)` picks the winner, and the booking store's
//! own check-and-insert backstops the property across processes.
//!
//! Lock acquisition waits a bounded interval for a contended bucket and
//! then reports `Busy` - retryable, and distinct from `Conflict`, which
//! means the window is genuinely taken.

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use voxbill_core::{
    models::{Booking, BookingStatus, OpFamily},
    traits::{BookingStore, SlotInsert},
    AppError, AppResult,
};

use crate::idempotency::IdempotencyGuard;

/// Outcome of a slot reservation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReserveOutcome {
    /// The slot was free; this booking holds it now
    Booked(Booking),
    /// An existing booking holds an overlapping window
    Conflict {
        resource_id: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    /// The lock stayed contended past the wait budget; retry is safe
    Busy { resource_id: String },
}

/// Lock table sharded by `(resource_id, bucket)`
///
/// The outer map lock is held only to look up or mint a bucket mutex; the
/// bucket mutex itself is what callers wait on.
#[derive(Default)]
struct LockTable {
    buckets: SyncMutex<HashMap<(String, i64), Arc<Mutex<()>>>>,
}

impl LockTable {
    fn handle(&self, resource_id: &str, bucket: i64) -> Arc<Mutex<()>> {
        let mut buckets = self.buckets.lock();
        buckets
            .entry((resource_id.to_string(), bucket))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire every bucket in ascending order within `wait`.
    ///
    /// Ordered acquisition keeps multi-bucket ranges deadlock-free; the
    /// shared deadline bounds the whole attempt, not each bucket.
    async fn acquire(
        &self,
        resource_id: &str,
        buckets: &[i64],
        wait: Duration,
    ) -> AppResult<Vec<OwnedMutexGuard<()>>> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut guards = Vec::with_capacity(buckets.len());

        for &bucket in buckets {
            let handle = self.handle(resource_id, bucket);
            match tokio::time::timeout_at(deadline, handle.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    debug!(
                        "Lock wait expired for {} bucket {}",
                        resource_id, bucket
                    );
                    return Err(AppError::Busy(resource_id.to_string()));
                }
            }
        }

        Ok(guards)
    }
}

/// Slot lock manager
pub struct SlotLockManager {
    bookings: Arc<dyn BookingStore>,
    guard: Arc<IdempotencyGuard>,
    locks: LockTable,
    bucket_secs: i64,
    lock_wait: Duration,
}

impl SlotLockManager {
    /// Create a new slot lock manager
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        guard: Arc<IdempotencyGuard>,
        bucket_secs: i64,
        lock_wait: Duration,
    ) -> Self {
        Self {
            bookings,
            guard,
            locks: LockTable::default(),
            bucket_secs: bucket_secs.max(1),
            lock_wait,
        }
    }

    /// Buckets covered by `[start, end)`, ascending
    fn bucket_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<i64> {
        let first = start.timestamp().div_euclid(self.bucket_secs);
        let last = (end.timestamp() - 1).div_euclid(self.bucket_secs);
        (first..=last).collect()
    }

    /// Attempt to reserve `[start_time, end_time)` on a resource.
    ///
    /// Duplicate requests (same tenant and idempotency key) return the
    /// original outcome. Among concurrent distinct requests for overlapping
    /// windows, exactly one receives `Booked`; the rest receive `Conflict`,
    /// or `Busy` if they never obtained the lock inside the wait budget.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        tenant_id: Uuid,
        resource_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        idempotency_key: &str,
        confirm_immediately: bool,
    ) -> AppResult<ReserveOutcome> {
        self.reserve_with_wait(
            tenant_id,
            resource_id,
            start_time,
            end_time,
            idempotency_key,
            confirm_immediately,
            None,
        )
        .await
    }

    /// `reserve` with a caller-chosen lock wait.
    ///
    /// `None` uses the configured default; `Some(Duration::ZERO)` is the
    /// immediate-reject policy.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self))]
    pub async fn reserve_with_wait(
        &self,
        tenant_id: Uuid,
        resource_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        idempotency_key: &str,
        confirm_immediately: bool,
        max_wait: Option<Duration>,
    ) -> AppResult<ReserveOutcome> {
        if start_time >= end_time {
            return Err(AppError::InvalidInput(
                "start_time must precede end_time".to_string(),
            ));
        }
        let wait = max_wait.unwrap_or(self.lock_wait);

        let attempt = self
            .guard
            .run(tenant_id, OpFamily::Booking, idempotency_key, || async {
                self.reserve_locked(
                    tenant_id,
                    resource_id,
                    start_time,
                    end_time,
                    idempotency_key,
                    confirm_immediately,
                    wait,
                )
                .await
            })
            .await;

        match attempt {
            Ok(result) => Ok(result.value),
            // Contention is an outcome, not a failure; the claim was
            // abandoned so the same key retries cleanly
            Err(AppError::Busy(resource)) => Ok(ReserveOutcome::Busy { resource_id: resource }),
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn reserve_locked(
        &self,
        tenant_id: Uuid,
        resource_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        idempotency_key: &str,
        confirm_immediately: bool,
        wait: Duration,
    ) -> AppResult<ReserveOutcome> {
        let buckets = self.bucket_range(start_time, end_time);
        let _held = self.locks.acquire(resource_id, &buckets, wait).await?;

        // Token held: the overlap check and insert are one critical section
        let status = if confirm_immediately {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };
        let booking = Booking::new(
            tenant_id,
            resource_id.to_string(),
            start_time,
            end_time,
            status,
            idempotency_key.to_string(),
        );

        match self.bookings.insert_if_free(&booking).await? {
            SlotInsert::Inserted(created) => {
                info!(
                    "Booked {} on {} [{} .. {})",
                    created.id, resource_id, start_time, end_time
                );
                Ok(ReserveOutcome::Booked(created))
            }
            SlotInsert::Overlap(existing) => {
                debug!(
                    "Slot conflict on {}: existing booking {}",
                    resource_id, existing.id
                );
                Ok(ReserveOutcome::Conflict {
                    resource_id: resource_id.to_string(),
                    start_time,
                    end_time,
                })
            }
        }
    }

    /// Confirm a pending booking
    #[instrument(skip(self))]
    pub async fn confirm(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.advance(booking_id, BookingStatus::Confirmed).await
    }

    /// Mark a confirmed booking completed
    #[instrument(skip(self))]
    pub async fn complete(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.advance(booking_id, BookingStatus::Completed).await
    }

    /// Cancel a pending or confirmed booking; terminal
    #[instrument(skip(self))]
    pub async fn cancel(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.advance(booking_id, BookingStatus::Cancelled).await
    }

    /// Fetch a booking by id
    pub async fn booking(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.bookings
            .fetch(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))
    }

    /// Bookings on a resource intersecting `[from, to)`
    pub async fn list(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Booking>> {
        self.bookings.list_for_resource(resource_id, from, to).await
    }

    /// Drive the booking state machine one legal step
    async fn advance(&self, booking_id: Uuid, target: BookingStatus) -> AppResult<Booking> {
        let booking = self.booking(booking_id).await?;

        if !booking.status.can_transition(target) {
            return Err(AppError::InvalidTransition {
                entity: "booking",
                from: booking.status.to_string(),
                to: target.to_string(),
            });
        }

        match self
            .bookings
            .transition(booking_id, booking.status, target)
            .await?
        {
            Some(updated) => {
                info!("Booking {} {} -> {}", booking_id, booking.status, target);
                Ok(updated)
            }
            None => {
                // Raced with another transition; report against fresh state
                let current = self.booking(booking_id).await?;
                warn!(
                    "Booking {} transition raced: now {}",
                    booking_id, current.status
                );
                if current.status == target {
                    Ok(current)
                } else {
                    Err(AppError::InvalidTransition {
                        entity: "booking",
                        from: current.status.to_string(),
                        to: target.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use voxbill_mem::{MemBookingStore, MemIdempotencyStore};

    fn manager() -> SlotLockManager {
        SlotLockManager::new(
            Arc::new(MemBookingStore::new()),
            Arc::new(IdempotencyGuard::new(Arc::new(MemIdempotencyStore::new()))),
            3600,
            Duration::from_millis(250),
        )
    }

    fn slot(start_h: u32, end_h: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2026, 1, 20, start_h, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 20, end_h, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_first_booking_wins_second_conflicts() {
        let manager = manager();
        let (start, end) = slot(14, 15);

        let first = manager
            .reserve(Uuid::new_v4(), "prov-1", start, end, "k1", false)
            .await
            .unwrap();
        assert!(matches!(first, ReserveOutcome::Booked(_)));

        let second = manager
            .reserve(Uuid::new_v4(), "prov-1", start, end, "k2", false)
            .await
            .unwrap();
        assert!(matches!(second, ReserveOutcome::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_five_concurrent_reserves_one_winner() {
        let manager = Arc::new(manager());
        let (start, end) = slot(14, 15);

        let mut handles = Vec::new();
        for i in 0..5 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .reserve(
                        Uuid::new_v4(),
                        "prov-1",
                        start,
                        end,
                        &format!("caller-{}", i),
                        false,
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut booked = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ReserveOutcome::Booked(_) => booked += 1,
                ReserveOutcome::Conflict { .. } => conflicts += 1,
                ReserveOutcome::Busy { .. } => panic!("250ms budget must cover 5 callers"),
            }
        }

        assert_eq!(booked, 1);
        assert_eq!(conflicts, 4);
    }

    #[tokio::test]
    async fn test_duplicate_request_returns_original_booking() {
        let manager = manager();
        let tenant_id = Uuid::new_v4();
        let (start, end) = slot(14, 15);

        let first = match manager
            .reserve(tenant_id, "prov-1", start, end, "k1", false)
            .await
            .unwrap()
        {
            ReserveOutcome::Booked(b) => b,
            other => panic!("expected booked, got {:?}", other),
        };

        let replay = match manager
            .reserve(tenant_id, "prov-1", start, end, "k1", false)
            .await
            .unwrap()
        {
            ReserveOutcome::Booked(b) => b,
            other => panic!("expected replayed booking, got {:?}", other),
        };

        assert_eq!(replay.id, first.id);
    }

    #[tokio::test]
    async fn test_busy_when_lock_contended_past_budget() {
        let manager = SlotLockManager::new(
            Arc::new(MemBookingStore::new()),
            Arc::new(IdempotencyGuard::new(Arc::new(MemIdempotencyStore::new()))),
            3600,
            Duration::from_millis(20),
        );
        let (start, end) = slot(14, 15);

        // Hold the bucket lock directly so the reserve cannot get it
        let bucket = start.timestamp().div_euclid(3600);
        let handle = manager.locks.handle("prov-1", bucket);
        let _held = handle.lock_owned().await;

        let outcome = manager
            .reserve(Uuid::new_v4(), "prov-1", start, end, "k1", false)
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Busy { .. }));
    }

    #[tokio::test]
    async fn test_immediate_reject_policy() {
        let manager = manager();
        let (start, end) = slot(14, 15);

        let bucket = start.timestamp().div_euclid(3600);
        let handle = manager.locks.handle("prov-1", bucket);
        let _held = handle.lock_owned().await;

        // Zero wait: contended lock rejects without blocking
        let outcome = manager
            .reserve_with_wait(
                Uuid::new_v4(),
                "prov-1",
                start,
                end,
                "k1",
                false,
                Some(Duration::ZERO),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Busy { .. }));
    }

    #[tokio::test]
    async fn test_busy_key_retries_cleanly_after_release() {
        let manager = SlotLockManager::new(
            Arc::new(MemBookingStore::new()),
            Arc::new(IdempotencyGuard::new(Arc::new(MemIdempotencyStore::new()))),
            3600,
            Duration::from_millis(20),
        );
        let (start, end) = slot(14, 15);
        let tenant_id = Uuid::new_v4();

        let bucket = start.timestamp().div_euclid(3600);
        {
            let handle = manager.locks.handle("prov-1", bucket);
            let _held = handle.lock_owned().await;
            let outcome = manager
                .reserve(tenant_id, "prov-1", start, end, "k1", false)
                .await
                .unwrap();
            assert!(matches!(outcome, ReserveOutcome::Busy { .. }));
        }

        // Lock released: the same key must now succeed, not replay Busy
        let outcome = manager
            .reserve(tenant_id, "prov-1", start, end, "k1", false)
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Booked(_)));
    }

    #[tokio::test]
    async fn test_range_spanning_buckets_locks_all() {
        let manager = manager();
        let start = Utc.with_ymd_and_hms(2026, 1, 20, 14, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 20, 16, 30, 0).unwrap();

        assert_eq!(manager.bucket_range(start, end).len(), 3);

        // Exact bucket boundary: end is exclusive, so only one bucket
        let (start, end) = slot(14, 15);
        assert_eq!(manager.bucket_range(start, end).len(), 1);
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let manager = manager();
        let (start, end) = slot(14, 15);

        let booking = match manager
            .reserve(Uuid::new_v4(), "prov-1", start, end, "k1", false)
            .await
            .unwrap()
        {
            ReserveOutcome::Booked(b) => b,
            other => panic!("expected booked, got {:?}", other),
        };

        // pending -> completed is illegal
        let err = manager.complete(booking.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let confirmed = manager.confirm(booking.id).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);

        let completed = manager.complete(booking.id).await.unwrap();
        assert_eq!(completed.status, BookingStatus::Completed);

        // completed is terminal
        let err = manager.cancel(booking.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_frees_the_window() {
        let manager = manager();
        let (start, end) = slot(14, 15);

        let booking = match manager
            .reserve(Uuid::new_v4(), "prov-1", start, end, "k1", false)
            .await
            .unwrap()
        {
            ReserveOutcome::Booked(b) => b,
            other => panic!("expected booked, got {:?}", other),
        };
        manager.cancel(booking.id).await.unwrap();

        let retry = manager
            .reserve(Uuid::new_v4(), "prov-1", start, end, "k2", false)
            .await
            .unwrap();
        assert!(matches!(retry, ReserveOutcome::Booked(_)));
    }

    #[tokio::test]
    async fn test_confirm_immediately() {
        let manager = manager();
        let (start, end) = slot(9, 10);

        let booking = match manager
            .reserve(Uuid::new_v4(), "prov-1", start, end, "k1", true)
            .await
            .unwrap()
        {
            ReserveOutcome::Booked(b) => b,
            other => panic!("expected booked, got {:?}", other),
        };
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let manager = manager();
        let (start, end) = slot(14, 15);

        let err = manager
            .reserve(Uuid::new_v4(), "prov-1", end, start, "k1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
