//! In-memory saga step store

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use voxbill_core::{
    models::{SagaStatus, SagaStep},
    traits::SagaStore,
    AppError, AppResult,
};

/// In-memory implementation of `SagaStore`
#[derive(Default)]
pub struct MemSagaStore {
    steps: RwLock<HashMap<Uuid, SagaStep>>,
}

impl MemSagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SagaStore for MemSagaStore {
    async fn insert(&self, step: &SagaStep) -> AppResult<SagaStep> {
        let mut steps = self.steps.write().await;
        if steps.contains_key(&step.id) {
            return Err(AppError::AlreadyExists(format!("saga step {}", step.id)));
        }
        steps.insert(step.id, step.clone());
        Ok(step.clone())
    }

    async fn set_debit_entry(&self, id: Uuid, debit_entry_id: Uuid) -> AppResult<()> {
        let mut steps = self.steps.write().await;
        let step = steps
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("saga step {}", id)))?;
        step.debit_entry_id = Some(debit_entry_id);
        step.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SagaStatus,
        to: SagaStatus,
    ) -> AppResult<Option<SagaStep>> {
        let mut steps = self.steps.write().await;
        let step = steps
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("saga step {}", id)))?;

        if step.status != from {
            return Ok(None);
        }

        step.status = to;
        step.updated_at = Utc::now();
        Ok(Some(step.clone()))
    }

    async fn list_stranded(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<SagaStep>> {
        let steps = self.steps.read().await;
        Ok(steps
            .values()
            .filter(|s| s.status == SagaStatus::Pending && s.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transition_cas_single_winner() {
        let store = MemSagaStore::new();
        let step = SagaStep::new(Uuid::new_v4(), "p1".to_string(), 2500, None);
        store.insert(&step).await.unwrap();

        let completed = store
            .transition(step.id, SagaStatus::Pending, SagaStatus::Completed)
            .await
            .unwrap();
        assert!(completed.is_some());

        // The sweep racing the request path loses
        let compensated = store
            .transition(step.id, SagaStatus::Pending, SagaStatus::Compensated)
            .await
            .unwrap();
        assert!(compensated.is_none());
    }

    #[tokio::test]
    async fn test_stranded_listing() {
        let store = MemSagaStore::new();

        let mut old_pending = SagaStep::new(Uuid::new_v4(), "p1".to_string(), 100, None);
        old_pending.created_at = Utc::now() - chrono::Duration::minutes(30);
        store.insert(&old_pending).await.unwrap();

        let fresh_pending = SagaStep::new(Uuid::new_v4(), "p2".to_string(), 100, None);
        store.insert(&fresh_pending).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        let stranded = store.list_stranded(cutoff).await.unwrap();
        assert_eq!(stranded.len(), 1);
        assert_eq!(stranded[0].id, old_pending.id);
    }
}
