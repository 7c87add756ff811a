//! External collaborator stubs
//!
//! The session orchestrator (voice stack) and the provisioning provider are
//! external systems. These implementations are the wiring points a
//! deployment replaces with real clients; they keep the binary runnable on
//! its own.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;
use voxbill_core::{traits::Provisioner, AppError, AppResult};
use voxbill_engine::SessionTerminator;

/// Terminator that surfaces the kill decision to the orchestrator's logs.
///
/// A production deployment replaces this with the voice-stack client that
/// actually hangs up the call.
pub struct LoggingTerminator;

#[async_trait]
impl SessionTerminator for LoggingTerminator {
    async fn terminate(&self, resource_id: &str) {
        warn!(
            "Kill-switch fired for session {}; orchestrator must hang up",
            resource_id
        );
    }
}

/// Provisioner that acknowledges orders without calling a provider.
///
/// A production deployment replaces this with the telephony provider
/// client; failures it returns trigger the refund path.
pub struct AcknowledgingProvisioner;

#[async_trait]
impl Provisioner for AcknowledgingProvisioner {
    async fn provision(&self, tenant_id: Uuid, resource: &str) -> AppResult<serde_json::Value> {
        if resource.is_empty() {
            return Err(AppError::InvalidInput("empty resource".to_string()));
        }

        info!("Provisioning {} for tenant {}", resource, tenant_id);
        Ok(json!({
            "order_ref": format!("order-{}", Uuid::new_v4()),
            "resource": resource,
        }))
    }
}
