//! Atomic reservation and ledger engine for VoxBill
//!
//! This crate contains the business logic that allocates the platform's two
//! scarce resources - prepaid call time and provider appointment slots -
//! under concurrent access with exactly-once semantics.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its dependencies behind the store traits from
//!   voxbill-core, so Postgres, Redis and in-memory backends interchange
//! - Services are wrapped in Arc for safe sharing across async tasks
//! - All operations are instrumented with tracing
//! - Expected business conditions (declines, conflicts, contention) are
//!   returned as structured outcomes, never raised
//!
//! # Services
//!
//! - `LedgerService` - atomic wallet/ledger applies, reconciliation
//! - `IdempotencyGuard` - first-claim-wins dedup around every mutation
//! - `ReservationManager` - reserve/commit/release lifecycle for calls
//! - `RefundCoordinator` - compensating-transaction purchases + recovery
//! - `KillSwitchMonitor` - cheap mid-session balance check
//! - `SessionWatchdog` - periodic kill-switch driver per active session
//! - `SlotLockManager` - serialized slot booking, one winner per window

pub mod idempotency;
pub mod killswitch;
pub mod ledger;
pub mod refund;
pub mod reservation_manager;
pub mod slots;
pub mod snapshot;
pub mod watchdog;

pub use idempotency::IdempotencyGuard;
pub use killswitch::{BalanceCheck, KillSwitchMonitor};
pub use ledger::{LedgerService, ReconciliationReport};
pub use refund::{PurchaseOutcome, RefundCoordinator, RecoverySummary};
pub use reservation_manager::{FinalizeResult, OpenOutcome, ReservationManager};
pub use slots::{ReserveOutcome, SlotLockManager};
pub use snapshot::{SnapshotCache, WalletSnapshot};
pub use watchdog::{SessionTerminator, SessionWatchdog};

/// Engine constants
pub mod constants {
    /// How long a booking attempt waits for a contended slot lock
    pub const DEFAULT_LOCK_WAIT_MS: u64 = 250;

    /// Width of a slot lock bucket in seconds
    pub const DEFAULT_BUCKET_SECS: i64 = 3600;

    /// Retention window for idempotency records (24 hours)
    pub const IDEMPOTENCY_RETENTION_SECS: i64 = 86400;

    /// Pending purchase steps older than this are auto-refunded
    pub const SAGA_RECOVERY_TIMEOUT_SECS: i64 = 300;

    /// Open reservations older than this are auto-released
    pub const RESERVATION_TTL_SECS: i64 = 2700;

    /// TTL for cached wallet snapshots on the kill-switch path
    pub const SNAPSHOT_TTL_SECS: u64 = 5;

    /// Interval between watchdog balance checks
    pub const WATCHDOG_INTERVAL_SECS: u64 = 5;
}
