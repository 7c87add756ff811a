//! Booking handlers
//!
//! Slot reservation and state-machine transitions. A lost race surfaces as
//! "slot no longer available" so callers can offer alternatives; a
//! contended lock surfaces as a retryable busy signal.

use actix_web::{web, HttpResponse};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;
use voxbill_engine::{ReserveOutcome, SlotLockManager};

use crate::dto::booking::{BookingQueryParams, BookingResponse, ReserveSlotRequest};
use crate::tenant::TenantId;
use voxbill_core::AppError;

/// Attempt to reserve a slot
///
/// POST /api/v1/bookings
#[instrument(skip(slots, request))]
pub async fn reserve_slot(
    slots: web::Data<SlotLockManager>,
    tenant: TenantId,
    request: web::Json<ReserveSlotRequest>,
) -> Result<HttpResponse, AppError> {
    request.validate()?;

    let outcome = slots
        .reserve_with_wait(
            tenant.0,
            &request.resource_id,
            request.start_time,
            request.end_time,
            &request.idempotency_key,
            request.confirm,
            request.max_wait_ms.map(std::time::Duration::from_millis),
        )
        .await?;

    match outcome {
        ReserveOutcome::Booked(booking) => {
            Ok(HttpResponse::Created().json(BookingResponse::from(booking)))
        }
        ReserveOutcome::Conflict { .. } => Ok(HttpResponse::Conflict().json(serde_json::json!({
            "error": "slot_conflict",
            "message": "slot no longer available",
            "retryable": false,
        }))),
        ReserveOutcome::Busy { .. } => {
            Ok(HttpResponse::TooManyRequests().json(serde_json::json!({
                "error": "busy",
                "message": "slot lock contended, retry shortly",
                "retryable": true,
            })))
        }
    }
}

/// Confirm a pending booking
///
/// POST /api/v1/bookings/{id}/confirm
#[instrument(skip(slots))]
pub async fn confirm_booking(
    slots: web::Data<SlotLockManager>,
    tenant: TenantId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    owned_booking(&slots, tenant, booking_id).await?;
    let booking = slots.confirm(booking_id).await?;
    Ok(HttpResponse::Ok().json(BookingResponse::from(booking)))
}

/// Mark a confirmed booking completed
///
/// POST /api/v1/bookings/{id}/complete
#[instrument(skip(slots))]
pub async fn complete_booking(
    slots: web::Data<SlotLockManager>,
    tenant: TenantId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    owned_booking(&slots, tenant, booking_id).await?;
    let booking = slots.complete(booking_id).await?;
    Ok(HttpResponse::Ok().json(BookingResponse::from(booking)))
}

/// Cancel a pending or confirmed booking
///
/// POST /api/v1/bookings/{id}/cancel
#[instrument(skip(slots))]
pub async fn cancel_booking(
    slots: web::Data<SlotLockManager>,
    tenant: TenantId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    owned_booking(&slots, tenant, booking_id).await?;
    let booking = slots.cancel(booking_id).await?;
    Ok(HttpResponse::Ok().json(BookingResponse::from(booking)))
}

/// Fetch a booking
///
/// GET /api/v1/bookings/{id}
#[instrument(skip(slots))]
pub async fn get_booking(
    slots: web::Data<SlotLockManager>,
    tenant: TenantId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    owned_booking(&slots, tenant, booking_id).await?;
    let booking = slots.booking(booking_id).await?;
    Ok(HttpResponse::Ok().json(BookingResponse::from(booking)))
}

/// Tenants only ever act on their own bookings; a foreign id reads as
/// not-found rather than confirming it exists
async fn owned_booking(
    slots: &SlotLockManager,
    tenant: TenantId,
    booking_id: Uuid,
) -> Result<(), AppError> {
    let booking = slots.booking(booking_id).await?;
    if booking.tenant_id != tenant.0 {
        return Err(AppError::BookingNotFound(booking_id.to_string()));
    }
    Ok(())
}

/// List a resource's bookings in a window
///
/// GET /api/v1/bookings
#[instrument(skip(slots))]
pub async fn list_bookings(
    slots: web::Data<SlotLockManager>,
    query: web::Query<BookingQueryParams>,
) -> Result<HttpResponse, AppError> {
    let bookings = slots
        .list(&query.resource_id, query.from, query.to)
        .await?;
    let response: Vec<BookingResponse> = bookings.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(response))
}

/// Configure booking routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/bookings")
            .route("", web::post().to(reserve_slot))
            .route("", web::get().to(list_bookings))
            .route("/{id}", web::get().to(get_booking))
            .route("/{id}/confirm", web::post().to(confirm_booking))
            .route("/{id}/complete", web::post().to(complete_booking))
            .route("/{id}/cancel", web::post().to(cancel_booking)),
    );
}
