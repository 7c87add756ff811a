//! Cache key constants and builders for VoxBill
//!
//! Provides standardized key naming patterns for all cached entities,
//! ensuring consistency across the application and preventing key collisions.
//!
//! # Key Patterns
//!
//! - `wallet_snapshot:{tenant_id}` - Materialized balance snapshot for the kill-switch path
//! - `active_session:{resource_id}` - Metered session bookkeeping for the watchdog

use uuid::Uuid;

/// Prefix for wallet balance snapshots
///
/// Format: `wallet_snapshot:{tenant_id}`
pub const WALLET_SNAPSHOT_PREFIX: &str = "wallet_snapshot";

/// Prefix for active metered sessions
///
/// Format: `active_session:{resource_id}`
pub const ACTIVE_SESSION_PREFIX: &str = "active_session";

/// Default TTL for wallet snapshots (seconds)
///
/// Deliberately short: the kill-switch tolerates a few seconds of staleness
/// but not more.
pub const WALLET_SNAPSHOT_TTL_SECS: u64 = 5;

/// Default TTL for active session records (4 hours - maximum session duration)
pub const ACTIVE_SESSION_TTL_SECS: u64 = 14400;

/// Build a cache key for a tenant's wallet snapshot
///
/// # Example
///
/// ```
/// use uuid::Uuid;
/// use voxbill_cache::keys::wallet_snapshot_key;
///
/// let tenant_id = Uuid::nil();
/// assert_eq!(
///     wallet_snapshot_key(tenant_id),
///     "wallet_snapshot:00000000-0000-0000-0000-000000000000"
/// );
/// ```
pub fn wallet_snapshot_key(tenant_id: Uuid) -> String {
    format!("{}:{}", WALLET_SNAPSHOT_PREFIX, tenant_id)
}

/// Build a cache key for an active session by resource id
pub fn active_session_key(resource_id: &str) -> String {
    format!("{}:{}", ACTIVE_SESSION_PREFIX, resource_id)
}
