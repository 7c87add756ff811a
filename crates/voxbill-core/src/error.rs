//! Unified error handling for VoxBill
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the engine, with automatic HTTP response mapping.
//!
//! Expected business conditions (a declined debit, a lost booking race, a
//! contended lock) surface as structured values; only this type's transient
//! and programmer-error variants represent real failures.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Store Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Business Logic Errors ====================
    #[error("Wallet not found for tenant: {0}")]
    WalletNotFound(String),

    #[error("Wallet archived for tenant: {0}")]
    WalletArchived(String),

    #[error("Insufficient balance: required {required_pence}p, available {available_pence}p")]
    InsufficientBalance {
        required_pence: i64,
        available_pence: i64,
    },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Booking not found: {0}")]
    BookingNotFound(String),

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Slot no longer available on resource: {0}")]
    SlotConflict(String),

    #[error("Resource busy, retry later: {0}")]
    Busy(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) | AppError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            // 402 Payment Required
            AppError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::WalletArchived(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::WalletNotFound(_)
            | AppError::ReservationNotFound(_)
            | AppError::BookingNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::SlotConflict(_) | AppError::Conflict(_) | AppError::AlreadyExists(_) => {
                StatusCode::CONFLICT
            }

            // 422 Unprocessable Entity
            AppError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::Busy(_) => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::WalletNotFound(_) => "wallet_not_found",
            AppError::WalletArchived(_) => "wallet_archived",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::ReservationNotFound(_) => "reservation_not_found",
            AppError::BookingNotFound(_) => "booking_not_found",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::SlotConflict(_) => "slot_conflict",
            AppError::Busy(_) => "busy",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether a caller may retry the operation with backoff.
    ///
    /// Matches the transient-failure classes: lock contention and store
    /// unavailability. Business declines are never retryable as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Busy(_)
                | AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::Cache(_)
                | AppError::CacheConnection(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
            "retryable": self.is_retryable(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::InsufficientBalance {
                required_pence: 1000,
                available_pence: 500
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::SlotConflict("prov-1".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Busy("prov-1".to_string()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::WalletNotFound("t-1".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::SlotConflict("prov-1".to_string()).error_code(),
            "slot_conflict"
        );
        assert_eq!(
            AppError::InvalidTransition {
                entity: "booking",
                from: "completed".to_string(),
                to: "confirmed".to_string(),
            }
            .error_code(),
            "invalid_transition"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Busy("prov-1".to_string()).is_retryable());
        assert!(AppError::Database("down".to_string()).is_retryable());
        assert!(!AppError::InsufficientBalance {
            required_pence: 100,
            available_pence: 0
        }
        .is_retryable());
        assert!(!AppError::SlotConflict("prov-1".to_string()).is_retryable());
    }
}
