//! Tenant resolution
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the caller is already identified and the gateway injects the
//! tenant id as a header. The extractor only parses and validates it.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;
use voxbill_core::AppError;

/// Header carrying the pre-resolved tenant id
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Extractor for the calling tenant
#[derive(Debug, Clone, Copy)]
pub struct TenantId(pub Uuid);

impl FromRequest for TenantId {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = req
            .headers()
            .get(TENANT_HEADER)
            .ok_or_else(|| AppError::MissingField(TENANT_HEADER.to_string()))
            .and_then(|value| {
                value
                    .to_str()
                    .map_err(|_| AppError::InvalidInput("malformed tenant header".to_string()))
            })
            .and_then(|value| {
                Uuid::parse_str(value)
                    .map_err(|_| AppError::InvalidInput("tenant id is not a UUID".to_string()))
            })
            .map(TenantId);

        ready(result)
    }
}
