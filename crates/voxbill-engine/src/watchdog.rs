//! Session watchdog
//!
//! Drives the kill-switch for each active metered session: a background
//! task per session ticks every few seconds, computes the accrued cost from
//! elapsed time, and fires the terminator when the check says stop. The
//! session orchestrator registers sessions at start and deregisters them at
//! end; a deregistered monitor is aborted.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::killswitch::KillSwitchMonitor;

/// Callback the watchdog fires when a session runs out of funds
#[async_trait::async_trait]
pub trait SessionTerminator: Send + Sync {
    /// Cut off the external session for `resource_id`
    async fn terminate(&self, resource_id: &str);
}

/// Per-session kill-switch driver
pub struct SessionWatchdog {
    killswitch: Arc<KillSwitchMonitor>,
    terminator: Arc<dyn SessionTerminator>,
    check_interval: Duration,
    monitors: Arc<RwLock<HashMap<String, tokio::task::JoinHandle<()>>>>,
}

impl SessionWatchdog {
    /// Create a new watchdog
    pub fn new(
        killswitch: Arc<KillSwitchMonitor>,
        terminator: Arc<dyn SessionTerminator>,
        check_interval: Duration,
    ) -> Self {
        Self {
            killswitch,
            terminator,
            check_interval,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start monitoring a session.
    ///
    /// Accrued cost is `ceil(elapsed minutes) * unit_cost_pence`; a restart
    /// for an already-watched resource replaces the old monitor.
    pub async fn watch(&self, tenant_id: Uuid, resource_id: String, unit_cost_pence: i64) {
        info!("Watching session {} for tenant {}", resource_id, tenant_id);

        let killswitch = self.killswitch.clone();
        let terminator = self.terminator.clone();
        let check_interval = self.check_interval;
        let task_resource_id = resource_id.clone();

        let handle = tokio::spawn(async move {
            Self::monitor_session(
                killswitch,
                terminator,
                check_interval,
                tenant_id,
                task_resource_id,
                unit_cost_pence,
            )
            .await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(resource_id, handle) {
            old.abort();
        }
    }

    /// Stop monitoring a session (normal session end)
    pub async fn unwatch(&self, resource_id: &str) {
        let mut monitors = self.monitors.write().await;
        if let Some(handle) = monitors.remove(resource_id) {
            handle.abort();
            info!("Stopped watching session {}", resource_id);
        }
    }

    /// Number of sessions currently under watch
    pub async fn active_count(&self) -> usize {
        self.monitors.read().await.len()
    }

    async fn monitor_session(
        killswitch: Arc<KillSwitchMonitor>,
        terminator: Arc<dyn SessionTerminator>,
        check_interval: Duration,
        tenant_id: Uuid,
        resource_id: String,
        unit_cost_pence: i64,
    ) {
        let started_at = Utc::now();
        let mut ticker = interval(check_interval);
        // The first tick fires immediately; skip it so a just-opened
        // reservation is not re-counted as accrued usage
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let elapsed_secs = (Utc::now() - started_at).num_seconds().max(0);
            let accrued_units = (elapsed_secs + 59) / 60;
            let accrued_pence = accrued_units * unit_cost_pence;

            match killswitch.check(tenant_id, accrued_pence).await {
                Ok(check) if check.should_terminate => {
                    warn!(
                        "Funds exhausted for session {} (remaining {}p), terminating",
                        resource_id, check.remaining_pence
                    );
                    terminator.terminate(&resource_id).await;
                    break;
                }
                Ok(check) => {
                    if check.low_balance {
                        warn!(
                            "Low balance for session {}: {}p remaining",
                            resource_id, check.remaining_pence
                        );
                    }
                }
                Err(e) => {
                    // A failed check never kills the session on its own
                    error!("Balance check failed for session {}: {}", resource_id, e);
                }
            }
        }
    }
}
