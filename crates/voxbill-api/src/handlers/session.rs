//! Metered session handlers
//!
//! The session orchestrator drives these: open at session start, heartbeat
//! every few seconds, commit with actual usage at session end, release when
//! the session never started billing.

use actix_web::{web, HttpResponse};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;
use voxbill_engine::{
    KillSwitchMonitor, OpenOutcome, ReservationManager, SessionWatchdog,
};

use crate::dto::session::{
    CommitSessionRequest, HeartbeatRequest, OpenSessionRequest, ReleaseSessionRequest,
    ReservationResponse,
};
use crate::tenant::TenantId;
use voxbill_core::AppError;

/// Open a session: hold estimated funds and start the watchdog
///
/// POST /api/v1/sessions
#[instrument(skip(manager, watchdog, request))]
pub async fn open_session(
    manager: web::Data<ReservationManager>,
    watchdog: web::Data<SessionWatchdog>,
    tenant: TenantId,
    request: web::Json<OpenSessionRequest>,
) -> Result<HttpResponse, AppError> {
    request.validate()?;

    let outcome = manager
        .open(
            tenant.0,
            &request.resource_id,
            request.estimated_units,
            request.unit_cost_pence,
            &request.idempotency_key,
        )
        .await?;

    match outcome {
        OpenOutcome::Opened {
            reservation,
            new_balance_pence,
        } => {
            watchdog
                .watch(
                    tenant.0,
                    reservation.resource_id.clone(),
                    reservation.unit_cost_pence,
                )
                .await;

            Ok(HttpResponse::Created().json(serde_json::json!({
                "reservation": ReservationResponse::from(reservation),
                "new_balance_pence": new_balance_pence,
            })))
        }
        OpenOutcome::Declined {
            required_pence,
            available_pence,
        } => Ok(HttpResponse::PaymentRequired().json(serde_json::json!({
            "error": "insufficient_balance",
            "message": "insufficient balance",
            "required_pence": required_pence,
            "available_pence": available_pence,
        }))),
    }
}

/// Mid-session balance check
///
/// POST /api/v1/sessions/heartbeat
#[instrument(skip(killswitch, request))]
pub async fn heartbeat(
    killswitch: web::Data<KillSwitchMonitor>,
    tenant: TenantId,
    request: web::Json<HeartbeatRequest>,
) -> Result<HttpResponse, AppError> {
    request.validate()?;

    let check = killswitch.check(tenant.0, request.accrued_pence).await?;
    Ok(HttpResponse::Ok().json(check))
}

/// Settle a session against actual usage
///
/// POST /api/v1/sessions/{id}/commit
#[instrument(skip(manager, watchdog, request))]
pub async fn commit_session(
    manager: web::Data<ReservationManager>,
    watchdog: web::Data<SessionWatchdog>,
    tenant: TenantId,
    path: web::Path<Uuid>,
    request: web::Json<CommitSessionRequest>,
) -> Result<HttpResponse, AppError> {
    request.validate()?;

    let reservation_id = path.into_inner();
    owned_reservation(&manager, tenant, reservation_id).await?;

    let result = manager
        .commit(reservation_id, request.actual_units, &request.idempotency_key)
        .await?;
    watchdog.unwatch(&result.reservation.resource_id).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "reservation": ReservationResponse::from(result.reservation),
        "delta_pence": result.delta_pence,
        "replayed": result.replayed,
    })))
}

/// Release the hold for a session that never billed
///
/// POST /api/v1/sessions/{id}/release
#[instrument(skip(manager, watchdog, request))]
pub async fn release_session(
    manager: web::Data<ReservationManager>,
    watchdog: web::Data<SessionWatchdog>,
    tenant: TenantId,
    path: web::Path<Uuid>,
    request: web::Json<ReleaseSessionRequest>,
) -> Result<HttpResponse, AppError> {
    request.validate()?;

    let reservation_id = path.into_inner();
    owned_reservation(&manager, tenant, reservation_id).await?;

    let result = manager
        .release(reservation_id, &request.idempotency_key)
        .await?;
    watchdog.unwatch(&result.reservation.resource_id).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "reservation": ReservationResponse::from(result.reservation),
        "delta_pence": result.delta_pence,
        "replayed": result.replayed,
    })))
}

/// Tenants only ever see their own reservations; a foreign id reads as
/// not-found rather than confirming it exists
async fn owned_reservation(
    manager: &ReservationManager,
    tenant: TenantId,
    reservation_id: Uuid,
) -> Result<(), AppError> {
    let reservation = manager.reservation(reservation_id).await?;
    if reservation.tenant_id != tenant.0 {
        return Err(AppError::ReservationNotFound(reservation_id.to_string()));
    }
    Ok(())
}

/// Configure session routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sessions")
            .route("", web::post().to(open_session))
            .route("/heartbeat", web::post().to(heartbeat))
            .route("/{id}/commit", web::post().to(commit_session))
            .route("/{id}/release", web::post().to(release_session)),
    );
}
