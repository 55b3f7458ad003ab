//! Versioned response cache over the persistent store.

use std::sync::Arc;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::CacheError;
use crate::models::{ApiRequest, ApiResponse, CacheEntry, ResponseSnapshot};
use crate::store::{Collection, PersistentStore};

pub struct CacheStore {
    store: Arc<dyn PersistentStore>,
    version: RwLock<String>,
    max_entries: usize,
    max_body_bytes: usize,
}

impl CacheStore {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        version: impl Into<String>,
        max_entries: usize,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            store,
            version: RwLock::new(version.into()),
            max_entries,
            max_body_bytes,
        }
    }

    pub fn version(&self) -> String {
        self.version.read().expect("cache version lock poisoned").clone()
    }

    /// Look up the cached snapshot for a request under the active version.
    /// Entries from a prior version are unreachable (their store id embeds
    /// the old version) and behave as a miss.
    pub async fn lookup(&self, request: &ApiRequest) -> Result<Option<CacheEntry>, CacheError> {
        let id = CacheEntry::store_id_for(&self.version(), &request.request_key());
        let Some(value) = self.store.get(Collection::CacheEntries, &id).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_value(value)?;
        Ok(Some(entry))
    }

    /// Record a successful response under the canonical request key.
    /// Last writer for a given key wins; there is no cross-request ordering
    /// guarantee here, unlike the mutation queue.
    pub async fn record(
        &self,
        request: &ApiRequest,
        response: &ApiResponse,
    ) -> Result<(), CacheError> {
        let body_bytes = serde_json::to_string(&response.body)?.len();
        if body_bytes > self.max_body_bytes {
            return Err(CacheError::QuotaExceeded {
                bytes: body_bytes,
                limit: self.max_body_bytes,
            });
        }

        let entry = CacheEntry::new(
            request.request_key(),
            ResponseSnapshot {
                status: response.status,
                headers: response.headers.clone(),
                body: response.body.clone(),
            },
            self.version(),
        );
        let id = entry.store_id();
        self.store
            .put(Collection::CacheEntries, &id, serde_json::to_value(&entry)?)
            .await?;
        debug!(key = %entry.request_key, "response cached");

        self.evict_over_budget().await?;
        Ok(())
    }

    /// Drop oldest entries once the collection exceeds its entry budget.
    async fn evict_over_budget(&self) -> Result<(), CacheError> {
        let values = self.store.get_all(Collection::CacheEntries).await?;
        if values.len() <= self.max_entries {
            return Ok(());
        }

        let mut entries: Vec<CacheEntry> = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        entries.sort_by(|a, b| a.stored_at.cmp(&b.stored_at));

        let excess = entries.len().saturating_sub(self.max_entries);
        for entry in entries.iter().take(excess) {
            self.store
                .delete(Collection::CacheEntries, &entry.store_id())
                .await?;
            debug!(key = %entry.request_key, "evicted oldest cache entry");
        }
        Ok(())
    }

    /// Activate a new cache version, purging every entry from prior
    /// versions. Called once when a new release takes over.
    pub async fn activate_version(&self, version: impl Into<String>) -> Result<usize, CacheError> {
        let version = version.into();
        {
            let mut current = self.version.write().expect("cache version lock poisoned");
            *current = version.clone();
        }

        let values = self.store.get_all(Collection::CacheEntries).await?;
        let mut purged = 0;
        for value in values {
            let Ok(entry) = serde_json::from_value::<CacheEntry>(value) else {
                continue;
            };
            if entry.cache_version != version {
                self.store
                    .delete(Collection::CacheEntries, &entry.store_id())
                    .await?;
                purged += 1;
            }
        }
        info!(%version, purged, "cache version activated");
        Ok(purged)
    }

    pub async fn entry_count(&self) -> Result<usize, CacheError> {
        Ok(self.store.get_all(Collection::CacheEntries).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseSource;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn response(body: serde_json::Value) -> ApiResponse {
        ApiResponse {
            status: 200,
            headers: BTreeMap::new(),
            body,
            source: ResponseSource::Network,
        }
    }

    fn cache_with(version: &str) -> CacheStore {
        CacheStore::new(Arc::new(MemoryStore::new()), version, 8, 64 * 1024)
    }

    #[tokio::test]
    async fn test_record_then_lookup() {
        let cache = cache_with("v1");
        let req = ApiRequest::get("/api/giveaways");
        cache
            .record(&req, &response(json!([{"title": "Chair"}])))
            .await
            .expect("record");

        let entry = cache.lookup(&req).await.expect("lookup").expect("hit");
        assert_eq!(entry.snapshot.body, json!([{"title": "Chair"}]));
        assert_eq!(entry.cache_version, "v1");
    }

    #[tokio::test]
    async fn test_prior_version_entries_read_as_miss() {
        let cache = cache_with("v1");
        let req = ApiRequest::get("/api/giveaways");
        cache
            .record(&req, &response(json!("old")))
            .await
            .expect("record");

        let purged = cache.activate_version("v2").await.expect("activate");
        assert_eq!(purged, 1);
        assert!(cache.lookup(&req).await.expect("lookup").is_none());
        assert_eq!(cache.entry_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_oversized_bodies_are_refused() {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), "v1", 8, 16);
        let req = ApiRequest::get("/api/giveaways");
        let err = cache
            .record(&req, &response(json!("a very large response body")))
            .await
            .expect_err("should exceed quota");
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));
        assert!(cache.lookup(&req).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn test_oldest_entries_evicted_over_budget() {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), "v1", 2, 64 * 1024);
        for i in 0..3 {
            let req = ApiRequest::get(format!("/api/giveaways/{}", i));
            cache.record(&req, &response(json!(i))).await.expect("record");
        }
        assert_eq!(cache.entry_count().await.expect("count"), 2);
        // The first-recorded key is the one that was evicted
        let oldest = ApiRequest::get("/api/giveaways/0");
        assert!(cache.lookup(&oldest).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn test_last_writer_wins_per_key() {
        let cache = cache_with("v1");
        let req = ApiRequest::get("/api/profile");
        cache.record(&req, &response(json!({"v": 1}))).await.expect("record");
        cache.record(&req, &response(json!({"v": 2}))).await.expect("record");

        let entry = cache.lookup(&req).await.expect("lookup").expect("hit");
        assert_eq!(entry.snapshot.body, json!({"v": 2}));
        assert_eq!(cache.entry_count().await.expect("count"), 1);
    }
}
