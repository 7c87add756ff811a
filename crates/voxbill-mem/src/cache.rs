//! In-memory cache
//!
//! TTL map implementing the same `CacheService` trait as the Redis cache,
//! for single-instance deployments and tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use voxbill_core::{traits::CacheService, AppError, AppResult};

struct Entry {
    json: String,
    expires_at: Instant,
}

/// In-memory implementation of `CacheService`
#[derive(Default)]
pub struct MemCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheService for MemCache {
    async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let value = serde_json::from_str(&entry.json)
                    .map_err(|e| AppError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set<T: serde::Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> AppResult<()> {
        let json =
            serde_json::to_string(value).map_err(|e| AppError::Serialization(e.to_string()))?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                json,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
