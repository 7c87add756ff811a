//! VoxBill Database Layer
//!
//! This crate provides PostgreSQL database access and store implementations
//! for the VoxBill engine. It includes:
//!
//! - Connection pool management with sqlx
//! - Store implementations for wallets/ledger, reservations, bookings,
//!   idempotency records and saga steps
//! - Row-level locking (`FOR UPDATE`) for atomic ledger applies
//! - Advisory-lock-guarded check-and-insert for slot bookings

pub mod pool;
pub mod repositories;

pub use pool::create_pool;
pub use repositories::*;

// Re-export commonly used types
pub use sqlx::{PgPool, Postgres, Transaction};
pub use voxbill_core::{AppError, AppResult};
