//! In-memory store: the unit-test fake and the degraded-mode fallback.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Collection, PersistentStore};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn put(
        &self,
        collection: Collection,
        id: &str,
        record: Value,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection)
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        if let Some(records) = collections.get_mut(&collection) {
            records.remove(id);
        }
        Ok(())
    }

    async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.remove(&collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store
            .put(Collection::PendingMutations, "a", json!({"n": 1}))
            .await
            .expect("put");

        let got = store
            .get(Collection::PendingMutations, "a")
            .await
            .expect("get");
        assert_eq!(got, Some(json!({"n": 1})));

        store
            .delete(Collection::PendingMutations, "a")
            .await
            .expect("delete");
        let got = store
            .get(Collection::PendingMutations, "a")
            .await
            .expect("get");
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = MemoryStore::new();
        store
            .put(Collection::PendingMutations, "a", json!(1))
            .await
            .expect("put");
        store
            .put(Collection::CacheEntries, "a", json!(2))
            .await
            .expect("put");

        store.clear(Collection::PendingMutations).await.expect("clear");
        assert!(store
            .get_all(Collection::PendingMutations)
            .await
            .expect("get_all")
            .is_empty());
        assert_eq!(
            store
                .get_all(Collection::CacheEntries)
                .await
                .expect("get_all")
                .len(),
            1
        );
    }
}
