//! End-to-end engine properties
//!
//! Exercises the composed engine (ledger + guard + reservations + refunds +
//! kill-switch + slots) over the in-memory stores, concentrating on the
//! guarantees the request path depends on: conservation, exactly-once,
//! single-winner booking, and refund-on-failure.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use voxbill_core::models::OpFamily;
use voxbill_core::AppError;
use voxbill_engine::{
    IdempotencyGuard, KillSwitchMonitor, LedgerService, OpenOutcome, PurchaseOutcome,
    RefundCoordinator, ReservationManager, ReserveOutcome, SlotLockManager,
};
use voxbill_mem::{
    MemBookingStore, MemCache, MemIdempotencyStore, MemLedgerStore, MemReservationStore,
    MemSagaStore,
};

struct Engine {
    ledger: Arc<LedgerService>,
    guard: Arc<IdempotencyGuard>,
    reservations: Arc<ReservationManager>,
    refunds: Arc<RefundCoordinator>,
    killswitch: Arc<KillSwitchMonitor>,
    slots: Arc<SlotLockManager>,
}

fn engine() -> Engine {
    let ledger_store = Arc::new(MemLedgerStore::new());
    let cache = Arc::new(MemCache::new());
    let guard = Arc::new(IdempotencyGuard::new(Arc::new(MemIdempotencyStore::new())));

    let ledger = Arc::new(LedgerService::new(ledger_store.clone(), cache.clone(), 0));
    let reservations = Arc::new(ReservationManager::new(
        ledger.clone(),
        Arc::new(MemReservationStore::new()),
        guard.clone(),
    ));
    let refunds = Arc::new(RefundCoordinator::new(
        ledger.clone(),
        Arc::new(MemSagaStore::new()),
        guard.clone(),
    ));
    let killswitch = Arc::new(KillSwitchMonitor::new(ledger_store, cache, 5));
    let slots = Arc::new(SlotLockManager::new(
        Arc::new(MemBookingStore::new()),
        guard.clone(),
        3600,
        Duration::from_millis(250),
    ));

    Engine {
        ledger,
        guard,
        reservations,
        refunds,
        killswitch,
        slots,
    }
}

async fn seeded_tenant(engine: &Engine, balance_pence: i64) -> Uuid {
    let tenant_id = Uuid::new_v4();
    engine.ledger.create_wallet(tenant_id, 500).await.unwrap();
    if balance_pence > 0 {
        engine
            .ledger
            .topup(tenant_id, balance_pence, "seed")
            .await
            .unwrap();
    }
    tenant_id
}

fn slot_times() -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
    use chrono::TimeZone;
    (
        chrono::Utc.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap(),
        chrono::Utc.with_ymd_and_hms(2026, 1, 20, 15, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn conservation_holds_across_a_full_call_lifecycle() {
    let engine = engine();
    let tenant_id = seeded_tenant(&engine, 10000).await;

    // Open: hold 10 units at 100p
    let reservation = match engine
        .reservations
        .open(tenant_id, "call-1", 10, 100, "call-1:open")
        .await
        .unwrap()
    {
        OpenOutcome::Opened { reservation, .. } => reservation,
        other => panic!("unexpected open outcome: {:?}", other),
    };
    assert_eq!(engine.ledger.balance(tenant_id).await.unwrap(), 9000);

    // Mid-call check: 3 minutes accrued at 100p
    let check = engine.killswitch.check(tenant_id, 300).await.unwrap();
    assert!(!check.should_terminate);

    // Commit at 7 actual units: surplus of 300p comes back
    let result = engine
        .reservations
        .commit(reservation.id, 7, "call-1:commit")
        .await
        .unwrap();
    assert_eq!(result.delta_pence, 300);
    assert_eq!(engine.ledger.balance(tenant_id).await.unwrap(), 9300);

    let report = engine.ledger.reconcile(tenant_id).await.unwrap();
    assert_eq!(report.drift_pence, 0);
}

#[tokio::test]
async fn concurrent_identical_topups_credit_once() {
    let engine = Arc::new(engine());
    let tenant_id = seeded_tenant(&engine, 0).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.ledger.topup(tenant_id, 5000, "evt_123").await.unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // N identical responses, exactly one side effect
    assert!(results.iter().all(|r| r.new_balance_pence == 5000));
    assert_eq!(results.iter().filter(|r| !r.duplicate).count(), 1);
    assert_eq!(engine.ledger.balance(tenant_id).await.unwrap(), 5000);
    assert_eq!(
        engine.ledger.reconcile(tenant_id).await.unwrap().drift_pence,
        0
    );
}

#[tokio::test]
async fn five_concurrent_reserves_exactly_one_booking() {
    let engine = Arc::new(engine());
    let (start, end) = slot_times();

    let mut handles = Vec::new();
    for i in 0..5 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .slots
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

    let mut booked = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReserveOutcome::Booked(b) => booked.push(b),
            ReserveOutcome::Conflict { .. } => conflicts += 1,
            ReserveOutcome::Busy { .. } => panic!("lock wait budget should cover the burst"),
        }
    }

    assert_eq!(booked.len(), 1);
    assert_eq!(conflicts, 4);

    // The stored state agrees: one booking holds the window
    let holding = engine.slots.list("prov-1", start, end).await.unwrap();
    assert_eq!(holding.len(), 1);
    assert_eq!(holding[0].id, booked[0].id);
}

#[tokio::test]
async fn failed_purchase_round_trips_the_balance() {
    let engine = engine();
    let tenant_id = seeded_tenant(&engine, 10000).await;
    let before = engine.ledger.balance(tenant_id).await.unwrap();

    let outcome = engine
        .refunds
        .with_compensation(tenant_id, 2500, "p1", || async {
            Err(AppError::Internal("provider exploded".to_string()))
        })
        .await
        .unwrap();

    assert!(matches!(outcome, PurchaseOutcome::Failed { .. }));
    assert_eq!(engine.ledger.balance(tenant_id).await.unwrap(), before);
    assert_eq!(
        engine.ledger.reconcile(tenant_id).await.unwrap().drift_pence,
        0
    );
}

#[tokio::test]
async fn commit_twice_posts_one_net_delta() {
    let engine = engine();
    let tenant_id = seeded_tenant(&engine, 10000).await;

    let reservation = match engine
        .reservations
        .open(tenant_id, "call-1", 10, 100, "open")
        .await
        .unwrap()
    {
        OpenOutcome::Opened { reservation, .. } => reservation,
        other => panic!("unexpected open outcome: {:?}", other),
    };

    engine
        .reservations
        .commit(reservation.id, 7, "commit-a")
        .await
        .unwrap();
    engine
        .reservations
        .commit(reservation.id, 7, "commit-b")
        .await
        .unwrap();

    assert_eq!(engine.ledger.balance(tenant_id).await.unwrap(), 9300);
    // hold + topup + single settlement entry
    let entries = engine.ledger.entries(tenant_id, 50).await.unwrap();
    assert_eq!(entries.len(), 3);
}

#[tokio::test]
async fn cross_tenant_keys_never_collide() {
    let engine = engine();
    let tenant_a = seeded_tenant(&engine, 1000).await;
    let tenant_b = seeded_tenant(&engine, 1000).await;

    // Same event id from two tenants credits both
    engine.ledger.topup(tenant_a, 500, "evt_1").await.unwrap();
    engine.ledger.topup(tenant_b, 500, "evt_1").await.unwrap();

    assert_eq!(engine.ledger.balance(tenant_a).await.unwrap(), 1500);
    assert_eq!(engine.ledger.balance(tenant_b).await.unwrap(), 1500);
}

#[tokio::test]
async fn retention_window_treats_old_keys_as_new() {
    let engine = engine();
    let tenant_id = seeded_tenant(&engine, 0).await;

    let first = engine
        .guard
        .run(tenant_id, OpFamily::Topup, "evt_old", || async { Ok(1u32) })
        .await
        .unwrap();
    assert!(first.first);

    // Sweep everything settled so far
    let swept = engine
        .guard
        .sweep_expired(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(swept, 1);

    let second = engine
        .guard
        .run(tenant_id, OpFamily::Topup, "evt_old", || async { Ok(2u32) })
        .await
        .unwrap();
    assert!(second.first);
    assert_eq!(second.value, 2);
}

#[tokio::test]
async fn killswitch_and_slots_do_not_interfere() {
    let engine = Arc::new(engine());
    let tenant_id = seeded_tenant(&engine, 10000).await;
    let (start, end) = slot_times();

    // Slot activity in flight while the kill-switch polls the same tenant
    let slots_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                engine
                    .slots
                    .reserve(
                        tenant_id,
                        "prov-1",
                        start,
                        end,
                        &format!("attempt-{}", i),
                        false,
                    )
                    .await
                    .unwrap();
            }
        })
    };

    for _ in 0..20 {
        let check = engine.killswitch.check(tenant_id, 100).await.unwrap();
        assert!(!check.should_terminate);
    }

    slots_task.await.unwrap();
}

#[tokio::test]
async fn declined_session_then_topup_then_success() {
    let engine = engine();
    let tenant_id = seeded_tenant(&engine, 500).await;

    let declined = engine
        .reservations
        .open(tenant_id, "call-1", 10, 100, "attempt-1")
        .await
        .unwrap();
    assert!(matches!(declined, OpenOutcome::Declined { .. }));

    engine.ledger.topup(tenant_id, 1000, "evt_topup").await.unwrap();

    // New logical intent, new key
    let opened = engine
        .reservations
        .open(tenant_id, "call-1", 10, 100, "attempt-2")
        .await
        .unwrap();
    assert!(matches!(opened, OpenOutcome::Opened { .. }));
    assert_eq!(engine.ledger.balance(tenant_id).await.unwrap(), 500);
}
