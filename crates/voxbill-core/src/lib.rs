//! VoxBill Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the VoxBill reservation and ledger engine. It includes:
//!
//! - Domain models (Wallet, LedgerEntry, Reservation, Booking, SagaStep)
//! - Store traits the engine is generic over
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
