//! Wallet handlers
//!
//! Topup (payment webhook), balance read, ledger listing, reconciliation.

use actix_web::{web, HttpResponse};
use tracing::{debug, instrument};
use validator::Validate;
use voxbill_engine::LedgerService;

use crate::dto::wallet::{LedgerEntryResponse, LedgerQueryParams, TopupRequest, WalletResponse};
use crate::tenant::TenantId;
use voxbill_core::AppError;

/// Default and maximum ledger page sizes
const DEFAULT_LEDGER_LIMIT: i64 = 50;
const MAX_LEDGER_LIMIT: i64 = 500;

/// Create the calling tenant's wallet
///
/// POST /api/v1/wallet
#[instrument(skip(ledger))]
pub async fn create_wallet(
    ledger: web::Data<LedgerService>,
    tenant: TenantId,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let threshold = body
        .get("low_balance_threshold_pence")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if threshold < 0 {
        return Err(AppError::InvalidInput(
            "low_balance_threshold_pence must not be negative".to_string(),
        ));
    }

    let wallet = ledger.create_wallet(tenant.0, threshold).await?;
    Ok(HttpResponse::Created().json(WalletResponse::from(wallet)))
}

/// Fetch the calling tenant's wallet
///
/// GET /api/v1/wallet
#[instrument(skip(ledger))]
pub async fn get_wallet(
    ledger: web::Data<LedgerService>,
    tenant: TenantId,
) -> Result<HttpResponse, AppError> {
    let wallet = ledger.wallet(tenant.0).await?;
    Ok(HttpResponse::Ok().json(WalletResponse::from(wallet)))
}

/// Credit an external payment
///
/// POST /api/v1/wallet/topup
///
/// The payment event id is the idempotency key: a redelivered webhook
/// returns the original result and credits nothing.
#[instrument(skip(ledger, request))]
pub async fn topup(
    ledger: web::Data<LedgerService>,
    tenant: TenantId,
    request: web::Json<TopupRequest>,
) -> Result<HttpResponse, AppError> {
    request.validate()?;

    let applied = ledger
        .topup(tenant.0, request.amount_pence, &request.event_id)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "entry_id": applied.entry_id,
        "new_balance_pence": applied.new_balance_pence,
        "duplicate": applied.duplicate,
    })))
}

/// Recent ledger entries, newest first
///
/// GET /api/v1/wallet/ledger
#[instrument(skip(ledger))]
pub async fn list_ledger(
    ledger: web::Data<LedgerService>,
    tenant: TenantId,
    query: web::Query<LedgerQueryParams>,
) -> Result<HttpResponse, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEDGER_LIMIT)
        .clamp(1, MAX_LEDGER_LIMIT);
    debug!("Listing {} ledger entries for {}", limit, tenant.0);

    let entries = ledger.entries(tenant.0, limit).await?;
    let response: Vec<LedgerEntryResponse> = entries.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(response))
}

/// Reconciliation audit: entry sum vs materialized balance
///
/// GET /api/v1/wallet/reconcile
#[instrument(skip(ledger))]
pub async fn reconcile(
    ledger: web::Data<LedgerService>,
    tenant: TenantId,
) -> Result<HttpResponse, AppError> {
    let report = ledger.reconcile(tenant.0).await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Configure wallet routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/wallet")
            .route("", web::post().to(create_wallet))
            .route("", web::get().to(get_wallet))
            .route("/topup", web::post().to(topup))
            .route("/ledger", web::get().to(list_ledger))
            .route("/reconcile", web::get().to(reconcile)),
    );
}
