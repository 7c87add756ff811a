//! Domain models for VoxBill
//!
//! This module contains all the core domain models used throughout the engine.

pub mod booking;
pub mod idempotency;
pub mod ledger;
pub mod reservation;
pub mod saga;
pub mod wallet;

pub use booking::{Booking, BookingStatus};
pub use idempotency::{IdempotencyRecord, OpFamily};
pub use ledger::{LedgerEntry, LedgerEntryType};
pub use reservation::{Reservation, ReservationStatus};
pub use saga::{SagaStatus, SagaStep};
pub use wallet::{Wallet, WalletStatus};
