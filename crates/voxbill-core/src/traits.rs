//! Common traits for stores and services
//!
//! Defines the seams between the engine and its backing stores. Postgres
//! implementations live in `voxbill-db`, in-memory ones in `voxbill-mem`,
//! the Redis cache in `voxbill-cache`. Every implementation must honor the
//! atomicity contracts documented on each method; the engine's correctness
//! properties rest on them.

use crate::error::AppError;
use crate::models::{
    Booking, BookingStatus, LedgerEntry, LedgerEntryType, OpFamily, Reservation,
    ReservationStatus, SagaStatus, SagaStep, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// A ledger entry about to be applied
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub tenant_id: Uuid,
    pub entry_type: LedgerEntryType,
    /// Signed: debits negative, credits positive
    pub amount_pence: i64,
    /// Unique per tenant; a reused key makes the apply a no-op replay
    pub idempotency_key: String,
    pub related_resource_id: Option<String>,
}

/// Result of applying a ledger entry
#[derive(Debug, Clone, Serialize)]
pub struct LedgerApplied {
    pub entry_id: Uuid,
    pub new_balance_pence: i64,
    /// True when the idempotency key had been used before and nothing was re-applied
    pub duplicate: bool,
}

/// Wallet lifecycle operations
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Create the wallet for a newly provisioned tenant
    async fn create_wallet(&self, wallet: &Wallet) -> Result<Wallet, AppError>;

    /// Fetch a tenant's wallet
    async fn fetch_wallet(&self, tenant_id: Uuid) -> Result<Option<Wallet>, AppError>;

    /// Soft-archive a wallet with its tenant; balance history is preserved
    async fn archive_wallet(&self, tenant_id: Uuid) -> Result<Wallet, AppError>;
}

/// Append-only ledger with a materialized balance projection
#[async_trait]
pub trait LedgerStore: WalletStore {
    /// Atomically record `entry` and move the wallet balance.
    ///
    /// Either the entry is durably recorded and the balance updated
    /// together, or neither happens. A reused `(tenant, key)` returns the
    /// prior result with `duplicate = true` and applies no delta. With
    /// `overdraft_pence = Some(o)`, debits beyond `balance + o` fail with
    /// `InsufficientBalance` and mutate nothing; `None` skips the check
    /// (settlement and compensation entries, where the money is already
    /// owed and the kill-switch bounds the exposure).
    async fn apply_entry(
        &self,
        entry: NewLedgerEntry,
        overdraft_pence: Option<i64>,
    ) -> Result<LedgerApplied, AppError>;

    /// Find an entry by its idempotency key
    async fn find_entry_by_key(
        &self,
        tenant_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>, AppError>;

    /// Recompute the balance by summing all entries.
    ///
    /// Reconciliation/audit only; never called on a request path.
    async fn sum_entries(&self, tenant_id: Uuid) -> Result<i64, AppError>;

    /// Most recent entries for a tenant, newest first
    async fn entries_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, AppError>;
}

/// Reservation persistence
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Insert a new open reservation
    async fn insert(&self, reservation: &Reservation) -> Result<Reservation, AppError>;

    /// Fetch a reservation by id
    async fn fetch(&self, id: Uuid) -> Result<Option<Reservation>, AppError>;

    /// Compare-and-set finalization: `open -> status`.
    ///
    /// Returns `None` when the reservation was no longer open, so the
    /// caller can fetch and replay the recorded outcome instead.
    async fn finalize(
        &self,
        id: Uuid,
        status: ReservationStatus,
        final_delta_pence: i64,
    ) -> Result<Option<Reservation>, AppError>;

    /// Open reservations created before `cutoff` (crash/expiry sweep input)
    async fn list_stale_open(&self, cutoff: DateTime<Utc>) -> Result<Vec<Reservation>, AppError>;
}

/// Outcome of a serialized check-and-insert on a slot
#[derive(Debug, Clone)]
pub enum SlotInsert {
    /// The slot was free and the booking is recorded
    Inserted(Booking),
    /// An existing pending/confirmed booking overlaps the requested range
    Overlap(Booking),
}

/// Booking persistence
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Overlap check and insert in one store-level critical section.
    ///
    /// The store must guarantee that two concurrent calls for overlapping
    /// ranges on one resource cannot both insert, even across processes.
    async fn insert_if_free(&self, booking: &Booking) -> Result<SlotInsert, AppError>;

    /// Fetch a booking by id
    async fn fetch(&self, id: Uuid) -> Result<Option<Booking>, AppError>;

    /// Compare-and-set status transition: `from -> to`.
    ///
    /// Returns `None` when the current status differed from `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Option<Booking>, AppError>;

    /// Bookings on a resource intersecting `[from, to)`, any status
    async fn list_for_resource(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Booking>, AppError>;
}

/// Ticket handed to the single caller that wins a fresh claim
#[derive(Debug, Clone)]
pub struct ClaimTicket {
    pub tenant_id: Uuid,
    pub family: OpFamily,
    pub key: String,
}

/// Result of an idempotency claim
#[derive(Debug)]
pub enum Claim {
    /// First use of the key; the holder must `complete` or `abandon`
    Fresh(ClaimTicket),
    /// Key seen before; the stored first result
    Duplicate(serde_json::Value),
    /// Key claimed by a concurrent caller whose result is not recorded yet
    InFlight,
}

/// Idempotency key bookkeeping
///
/// Keys are scoped per `(tenant, family)`. Implementations differ in how
/// they treat a claimed-but-incomplete key: the in-memory store parks the
/// caller until the holder completes, the Postgres store reports
/// `Claim::InFlight` and lets the caller back off.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claim a key or learn its recorded result
    async fn claim(
        &self,
        tenant_id: Uuid,
        family: OpFamily,
        key: &str,
    ) -> Result<Claim, AppError>;

    /// Record the first result and release any waiting duplicates
    async fn complete(
        &self,
        ticket: ClaimTicket,
        result: serde_json::Value,
    ) -> Result<(), AppError>;

    /// Drop a claim after a transient failure so a retry starts fresh
    async fn abandon(&self, ticket: ClaimTicket) -> Result<(), AppError>;

    /// Delete records claimed before `cutoff`; returns how many were removed
    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Saga step persistence for the refund coordinator
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Record a pending step before its debit posts
    async fn insert(&self, step: &SagaStep) -> Result<SagaStep, AppError>;

    /// Attach the posted debit's ledger entry id to the step
    async fn set_debit_entry(&self, id: Uuid, debit_entry_id: Uuid) -> Result<(), AppError>;

    /// Compare-and-set status transition: `from -> to`.
    ///
    /// Returns `None` when the current status differed from `from` (the
    /// sweep and the request path racing; exactly one wins).
    async fn transition(
        &self,
        id: Uuid,
        from: SagaStatus,
        to: SagaStatus,
    ) -> Result<Option<SagaStep>, AppError>;

    /// Pending steps created before `cutoff` (recovery sweep input)
    async fn list_stranded(&self, cutoff: DateTime<Utc>) -> Result<Vec<SagaStep>, AppError>;
}

/// Cache service trait
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Get value from cache
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError>;

    /// Set value in cache with TTL
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError>;

    /// Delete value from cache
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool, AppError>;
}

/// Downstream provisioning hook the purchase flow wraps in compensation
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Perform the external provisioning action (e.g. order a phone number)
    async fn provision(
        &self,
        tenant_id: Uuid,
        resource: &str,
    ) -> Result<serde_json::Value, AppError>;
}

/// Pagination parameters
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 1000),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };

        Self {
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination() {
        let p = Pagination::new(1, 10);
        assert_eq!(p.offset(), 0);
        assert_eq!(p.limit(), 10);

        let p = Pagination::new(3, 20);
        assert_eq!(p.offset(), 40);
        assert_eq!(p.limit(), 20);
    }

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination::new(0, 10); // page 0 becomes 1
        assert_eq!(p.page, 1);

        let p = Pagination::new(1, 2000); // per_page capped at 1000
        assert_eq!(p.per_page, 1000);
    }

    #[test]
    fn test_pagination_meta() {
        let meta = PaginationMeta::new(95, 1, 10);
        assert_eq!(meta.total_pages, 10);

        let meta = PaginationMeta::new(101, 1, 10);
        assert_eq!(meta.total_pages, 11);
    }
}
