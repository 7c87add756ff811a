//! Purchase DTOs

use serde::Deserialize;
use validator::Validate;

/// One-shot purchase (e.g. phone-number provisioning) wrapped in
/// compensation: on downstream failure the debit is refunded before the
/// error surfaces
#[derive(Debug, Deserialize, Validate)]
pub struct PurchaseRequest {
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount_pence: i64,

    /// What to provision (provider-specific resource descriptor)
    #[validate(length(min = 1, max = 255))]
    pub resource: String,

    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: String,
}
