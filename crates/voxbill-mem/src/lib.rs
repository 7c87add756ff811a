//! VoxBill In-Memory Store Layer
//!
//! Store implementations backed by process-local state, for single-instance
//! deployments and for the engine's concurrency test-suite. Atomicity is
//! provided the way the design notes prescribe for single-instance mode:
//! a per-tenant async mutex serializes ledger applies, and the booking
//! store runs its overlap-check-and-insert under one lock.
//!
//! These stores honor the exact same trait contracts as the Postgres
//! implementations in `voxbill-db`.

pub mod bookings;
pub mod cache;
pub mod idempotency;
pub mod ledger;
pub mod reservations;
pub mod saga;

pub use bookings::MemBookingStore;
pub use cache::MemCache;
pub use idempotency::MemIdempotencyStore;
pub use ledger::MemLedgerStore;
pub use reservations::MemReservationStore;
pub use saga::MemSagaStore;
