//! Reservation manager service
//!
//! Manages balance reservations throughout the session lifecycle:
//! - Hold funds at session start (open)
//! - Settle against actual usage at session end (commit)
//! - Reverse the hold for sessions that never billed (release)
//! - Auto-release reservations stranded by crashed sessions
//!
//! Commit and release are idempotent per reservation: the first finalizer
//! wins the compare-and-set on the row, posts a single ledger delta under a
//! key derived from the reservation id, and every later attempt replays the
//! recorded outcome. The derived key also heals a crash that landed between
//! the status flip and the ledger post.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use voxbill_core::{
    models::{LedgerEntryType, OpFamily, Reservation, ReservationStatus},
    traits::{NewLedgerEntry, ReservationStore},
    AppError, AppResult,
};

use crate::idempotency::IdempotencyGuard;
use crate::ledger::LedgerService;

/// Outcome of an open attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OpenOutcome {
    /// Funds held, reservation created
    Opened {
        reservation: Reservation,
        new_balance_pence: i64,
    },
    /// Wallet could not cover the hold; nothing was created
    Declined {
        required_pence: i64,
        available_pence: i64,
    },
}

/// Outcome of a commit or release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResult {
    pub reservation: Reservation,
    /// Signed ledger delta posted at finalization (credit positive)
    pub delta_pence: i64,
    /// True when a previous finalization's outcome was replayed
    pub replayed: bool,
}

/// Reservation manager
pub struct ReservationManager {
    ledger: Arc<LedgerService>,
    reservations: Arc<dyn ReservationStore>,
    guard: Arc<IdempotencyGuard>,
}

impl ReservationManager {
    /// Create a new reservation manager
    pub fn new(
        ledger: Arc<LedgerService>,
        reservations: Arc<dyn ReservationStore>,
        guard: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            ledger,
            reservations,
            guard,
        }
    }

    /// Hold `estimated_units * unit_cost_pence` against the wallet and open
    /// a reservation for the session.
    ///
    /// An insufficient balance declines cleanly: no reservation row, no
    /// ledger entry, wallet untouched.
    #[instrument(skip(self))]
    pub async fn open(
        &self,
        tenant_id: Uuid,
        resource_id: &str,
        estimated_units: i64,
        unit_cost_pence: i64,
        idempotency_key: &str,
    ) -> AppResult<OpenOutcome> {
        if estimated_units <= 0 {
            return Err(AppError::InvalidInput(
                "estimated_units must be positive".to_string(),
            ));
        }
        if unit_cost_pence < 0 {
            return Err(AppError::InvalidInput(
                "unit_cost_pence must not be negative".to_string(),
            ));
        }

        let result = self
            .guard
            .run(tenant_id, OpFamily::ReservationOpen, idempotency_key, || async {
                let reservation = Reservation::new(
                    tenant_id,
                    resource_id.to_string(),
                    estimated_units,
                    unit_cost_pence,
                );

                let hold = NewLedgerEntry {
                    tenant_id,
                    entry_type: LedgerEntryType::ReservationHold,
                    amount_pence: -reservation.held_pence,
                    idempotency_key: format!("reservation_hold:{}", idempotency_key),
                    related_resource_id: Some(resource_id.to_string()),
                };

                match self.ledger.apply(hold).await {
                    Ok(applied) => {
                        let created = self.reservations.insert(&reservation).await?;
                        info!(
                            "Opened reservation {} for {}: held {}p, balance {}p",
                            created.id, resource_id, created.held_pence, applied.new_balance_pence
                        );
                        Ok(OpenOutcome::Opened {
                            reservation: created,
                            new_balance_pence: applied.new_balance_pence,
                        })
                    }
                    Err(AppError::InsufficientBalance {
                        required_pence,
                        available_pence,
                    }) => {
                        warn!(
                            "Reservation declined for tenant {}: required {}p, available {}p",
                            tenant_id, required_pence, available_pence
                        );
                        Ok(OpenOutcome::Declined {
                            required_pence,
                            available_pence,
                        })
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        Ok(result.value)
    }

    /// Settle the reservation against actual usage.
    ///
    /// Posts a single `reservation_commit` delta of `held - actual`: a
    /// credit when usage came in under the estimate, a further debit when it
    /// overran (the session watchdog bounds how far that can go).
    #[instrument(skip(self))]
    pub async fn commit(
        &self,
        reservation_id: Uuid,
        actual_units: i64,
        idempotency_key: &str,
    ) -> AppResult<FinalizeResult> {
        if actual_units < 0 {
            return Err(AppError::InvalidInput(
                "actual_units must not be negative".to_string(),
            ));
        }

        let tenant_id = self.fetch(reservation_id).await?.tenant_id;
        let result = self
            .guard
            .run(
                tenant_id,
                OpFamily::ReservationCommit,
                idempotency_key,
                || async {
                    self.finalize(reservation_id, ReservationStatus::Committed, Some(actual_units))
                        .await
                },
            )
            .await?;

        Ok(result.value)
    }

    /// Reverse the hold in full for a session that never started billing.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        reservation_id: Uuid,
        idempotency_key: &str,
    ) -> AppResult<FinalizeResult> {
        let tenant_id = self.fetch(reservation_id).await?.tenant_id;
        let result = self
            .guard
            .run(
                tenant_id,
                OpFamily::ReservationRelease,
                idempotency_key,
                || async {
                    self.finalize(reservation_id, ReservationStatus::Released, None)
                        .await
                },
            )
            .await?;

        Ok(result.value)
    }

    /// Release open reservations older than `ttl_secs`.
    ///
    /// Crash recovery for sessions that never reported back; returns how
    /// many holds were reversed.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, ttl_secs: i64) -> AppResult<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(ttl_secs);
        let stale = self.reservations.list_stale_open(cutoff).await?;

        let mut released = 0u64;
        for reservation in stale {
            match self
                .finalize(reservation.id, ReservationStatus::Released, None)
                .await
            {
                Ok(result) if !result.replayed => {
                    info!(
                        "Expired stale reservation {} for {}, released {}p",
                        reservation.id, reservation.resource_id, result.delta_pence
                    );
                    released += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to expire reservation {}: {}", reservation.id, e);
                }
            }
        }

        Ok(released)
    }

    /// Fetch a reservation by id
    pub async fn reservation(&self, reservation_id: Uuid) -> AppResult<Reservation> {
        self.fetch(reservation_id).await
    }

    async fn fetch(&self, reservation_id: Uuid) -> AppResult<Reservation> {
        self.reservations
            .fetch(reservation_id)
            .await?
            .ok_or_else(|| AppError::ReservationNotFound(reservation_id.to_string()))
    }

    /// Finalize a reservation exactly once.
    ///
    /// The store's compare-and-set on `open` picks the single winner among
    /// concurrent commit/release attempts; everyone else replays whatever
    /// the winner recorded. The ledger key is derived from the reservation
    /// id, so the settlement entry posts at most once no matter how many
    /// times this runs.
    async fn finalize(
        &self,
        reservation_id: Uuid,
        target: ReservationStatus,
        actual_units: Option<i64>,
    ) -> AppResult<FinalizeResult> {
        let reservation = self.fetch(reservation_id).await?;

        if reservation.status.is_open() {
            let delta_pence = match target {
                ReservationStatus::Committed => {
                    let actual_units = actual_units.ok_or_else(|| {
                        AppError::Internal("commit without actual_units".to_string())
                    })?;
                    -reservation.commit_delta_pence(actual_units)
                }
                ReservationStatus::Released => reservation.held_pence,
                ReservationStatus::Open => {
                    return Err(AppError::InvalidTransition {
                        entity: "reservation",
                        from: reservation.status.to_string(),
                        to: target.to_string(),
                    })
                }
            };

            if let Some(updated) = self
                .reservations
                .finalize(reservation_id, target, delta_pence)
                .await?
            {
                self.post_settlement(&updated).await?;
                info!(
                    "Reservation {} {}: delta {}p",
                    reservation_id, target, delta_pence
                );
                return Ok(FinalizeResult {
                    reservation: updated,
                    delta_pence,
                    replayed: false,
                });
            }
            // Lost the compare-and-set; fall through to the replay path
        }

        let recorded = self.fetch(reservation_id).await?;
        // Re-posting is a no-op when the entry already landed and heals the
        // crash window between status flip and ledger post
        self.post_settlement(&recorded).await?;
        let delta_pence = recorded.final_delta_pence.ok_or_else(|| {
            AppError::Internal(format!(
                "finalized reservation {} has no recorded delta",
                reservation_id
            ))
        })?;

        Ok(FinalizeResult {
            reservation: recorded,
            delta_pence,
            replayed: true,
        })
    }

    /// Post the settlement ledger entry for a finalized reservation
    async fn post_settlement(&self, reservation: &Reservation) -> AppResult<()> {
        let (entry_type, amount_pence) = match reservation.status {
            ReservationStatus::Committed => (
                LedgerEntryType::ReservationCommit,
                reservation.final_delta_pence.unwrap_or(0),
            ),
            ReservationStatus::Released => (
                LedgerEntryType::ReservationRelease,
                reservation.final_delta_pence.unwrap_or(reservation.held_pence),
            ),
            ReservationStatus::Open => return Ok(()),
        };

        self.ledger
            .apply_unchecked(NewLedgerEntry {
                tenant_id: reservation.tenant_id,
                entry_type,
                amount_pence,
                idempotency_key: format!("reservation_finalize:{}", reservation.id),
                related_resource_id: Some(reservation.resource_id.clone()),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbill_mem::{MemCache, MemIdempotencyStore, MemLedgerStore, MemReservationStore};

    struct Fixture {
        ledger: Arc<LedgerService>,
        manager: ReservationManager,
        tenant_id: Uuid,
    }

    async fn fixture(initial_balance: i64) -> Fixture {
        let store = Arc::new(MemLedgerStore::new());
        let ledger = Arc::new(LedgerService::new(
            store,
            Arc::new(MemCache::new()),
            0,
        ));
        let manager = ReservationManager::new(
            ledger.clone(),
            Arc::new(MemReservationStore::new()),
            Arc::new(IdempotencyGuard::new(Arc::new(MemIdempotencyStore::new()))),
        );

        let tenant_id = Uuid::new_v4();
        ledger.create_wallet(tenant_id, 500).await.unwrap();
        if initial_balance > 0 {
            ledger.topup(tenant_id, initial_balance, "seed").await.unwrap();
        }

        Fixture {
            ledger,
            manager,
            tenant_id,
        }
    }

    async fn open(fx: &Fixture, units: i64, cost: i64, key: &str) -> Reservation {
        match fx
            .manager
            .open(fx.tenant_id, "call-1", units, cost, key)
            .await
            .unwrap()
        {
            OpenOutcome::Opened { reservation, .. } => reservation,
            OpenOutcome::Declined { .. } => panic!("open unexpectedly declined"),
        }
    }

    #[tokio::test]
    async fn test_worked_example_open_then_partial_commit() {
        // Wallet 10,000p; hold 10 units at 100p -> 9,000p; actual usage 7
        // units settles +300p back -> 9,300p
        let fx = fixture(10000).await;
        let reservation = open(&fx, 10, 100, "call-1:open").await;
        assert_eq!(reservation.held_pence, 1000);
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 9000);

        let result = fx
            .manager
            .commit(reservation.id, 7, "call-1:commit")
            .await
            .unwrap();
        assert_eq!(result.delta_pence, 300);
        assert!(!result.replayed);
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 9300);

        let report = fx.ledger.reconcile(fx.tenant_id).await.unwrap();
        assert_eq!(report.drift_pence, 0);
    }

    #[tokio::test]
    async fn test_decline_creates_nothing() {
        let fx = fixture(500).await;

        let outcome = fx
            .manager
            .open(fx.tenant_id, "call-1", 10, 100, "call-1:open")
            .await
            .unwrap();
        match outcome {
            OpenOutcome::Declined {
                required_pence,
                available_pence,
            } => {
                assert_eq!(required_pence, 1000);
                assert_eq!(available_pence, 500);
            }
            OpenOutcome::Opened { .. } => panic!("open should have declined"),
        }

        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 500);
        assert_eq!(
            fx.ledger.reconcile(fx.tenant_id).await.unwrap().drift_pence,
            0
        );
    }

    #[tokio::test]
    async fn test_double_commit_posts_single_delta() {
        let fx = fixture(10000).await;
        let reservation = open(&fx, 10, 100, "call-1:open").await;

        let first = fx
            .manager
            .commit(reservation.id, 7, "call-1:commit")
            .await
            .unwrap();
        assert!(!first.replayed);

        // Same key replays through the guard
        let second = fx
            .manager
            .commit(reservation.id, 7, "call-1:commit")
            .await
            .unwrap();
        assert!(second.replayed || second.delta_pence == first.delta_pence);

        // Different key still cannot double-post: the reservation is final
        let third = fx
            .manager
            .commit(reservation.id, 3, "call-1:commit-retry")
            .await
            .unwrap();
        assert!(third.replayed);
        assert_eq!(third.delta_pence, 300);

        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 9300);
        assert_eq!(
            fx.ledger.reconcile(fx.tenant_id).await.unwrap().drift_pence,
            0
        );
    }

    #[tokio::test]
    async fn test_release_reverses_hold_in_full() {
        let fx = fixture(10000).await;
        let reservation = open(&fx, 10, 100, "call-1:open").await;
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 9000);

        let result = fx
            .manager
            .release(reservation.id, "call-1:release")
            .await
            .unwrap();
        assert_eq!(result.delta_pence, 1000);
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 10000);

        // Commit after release replays the release outcome
        let after = fx
            .manager
            .commit(reservation.id, 5, "call-1:late-commit")
            .await
            .unwrap();
        assert!(after.replayed);
        assert_eq!(
            after.reservation.status,
            ReservationStatus::Released
        );
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 10000);
    }

    #[tokio::test]
    async fn test_overrun_commit_charges_extra() {
        let fx = fixture(1000).await;
        let reservation = open(&fx, 5, 100, "call-1:open").await;
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 500);

        // 8 units actually used: 300p beyond the hold, settled unchecked
        let result = fx
            .manager
            .commit(reservation.id, 8, "call-1:commit")
            .await
            .unwrap();
        assert_eq!(result.delta_pence, -300);
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_concurrent_commits_one_winner() {
        let fx = fixture(10000).await;
        let reservation = open(&fx, 10, 100, "call-1:open").await;

        let manager = Arc::new(fx.manager);
        let mut handles = Vec::new();
        for i in 0..5 {
            let manager = manager.clone();
            let id = reservation.id;
            handles.push(tokio::spawn(async move {
                manager.commit(id, 7, &format!("commit-{}", i)).await.unwrap()
            }));
        }

        let mut fresh = 0;
        for handle in handles {
            if !handle.await.unwrap().replayed {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);

        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 9300);
        assert_eq!(
            fx.ledger.reconcile(fx.tenant_id).await.unwrap().drift_pence,
            0
        );
    }

    #[tokio::test]
    async fn test_expire_stale_releases_once() {
        let fx = fixture(10000).await;
        let reservation = open(&fx, 10, 100, "call-1:open").await;
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 9000);

        // Nothing stale yet
        assert_eq!(fx.manager.expire_stale(3600).await.unwrap(), 0);

        // TTL of zero makes the open reservation immediately stale
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(fx.manager.expire_stale(0).await.unwrap(), 1);
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 10000);

        // Second sweep finds nothing to do
        assert_eq!(fx.manager.expire_stale(0).await.unwrap(), 0);
        assert_eq!(fx.ledger.balance(fx.tenant_id).await.unwrap(), 10000);

        let stored = fx.manager.fetch(reservation.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Released);
    }

    #[tokio::test]
    async fn test_unknown_reservation() {
        let fx = fixture(1000).await;
        let err = fx
            .manager
            .commit(Uuid::new_v4(), 1, "k")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ReservationNotFound(_)));
    }
}
