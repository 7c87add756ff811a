//! HTTP API layer for VoxBill
//!
//! Thin actix-web adapter over the engine: DTO validation, tenant
//! resolution, and mapping of engine outcomes onto HTTP responses. All
//! business rules live in voxbill-engine; no handler touches a store
//! directly.
//!
//! Callers are identified upstream; the resolved tenant arrives in the
//! `X-Tenant-Id` header. Every mutating endpoint requires a caller-supplied
//! idempotency key and may be retried verbatim.

pub mod dto;
pub mod handlers;
pub mod tenant;

pub use tenant::TenantId;
