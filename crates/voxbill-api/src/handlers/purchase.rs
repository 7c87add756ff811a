//! Purchase handlers
//!
//! One-shot purchases (number provisioning) wrapped in compensation: the
//! tenant is never left charged for something that was not delivered.

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tracing::instrument;
use validator::Validate;
use voxbill_core::traits::Provisioner;
use voxbill_engine::{PurchaseOutcome, RefundCoordinator};

use crate::dto::purchase::PurchaseRequest;
use crate::tenant::TenantId;
use voxbill_core::AppError;

/// Execute a compensated purchase
///
/// POST /api/v1/purchases
#[instrument(skip(coordinator, provisioner, request))]
pub async fn create_purchase(
    coordinator: web::Data<RefundCoordinator>,
    provisioner: web::Data<Arc<dyn Provisioner>>,
    tenant: TenantId,
    request: web::Json<PurchaseRequest>,
) -> Result<HttpResponse, AppError> {
    request.validate()?;

    let resource = request.resource.clone();
    let provisioner = provisioner.get_ref().clone();
    let tenant_id = tenant.0;

    let outcome = coordinator
        .with_compensation(
            tenant_id,
            request.amount_pence,
            &request.idempotency_key,
            move || async move { provisioner.provision(tenant_id, &resource).await },
        )
        .await?;

    match outcome {
        PurchaseOutcome::Completed {
            receipt,
            new_balance_pence,
        } => Ok(HttpResponse::Created().json(serde_json::json!({
            "receipt": receipt,
            "new_balance_pence": new_balance_pence,
        }))),
        PurchaseOutcome::Declined {
            required_pence,
            available_pence,
        } => Ok(HttpResponse::PaymentRequired().json(serde_json::json!({
            "error": "insufficient_balance",
            "message": "insufficient balance",
            "required_pence": required_pence,
            "available_pence": available_pence,
        }))),
        PurchaseOutcome::Failed { message } => {
            Ok(HttpResponse::BadGateway().json(serde_json::json!({
                "error": "provisioning_failed",
                "message": message,
                "refunded": true,
            })))
        }
    }
}

/// Configure purchase routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/purchases").route("", web::post().to(create_purchase)));
}
