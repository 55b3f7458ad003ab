//! JSON-file-backed store.
//!
//! Each collection is a single JSON document under the data directory
//! (`pending-mutations.json`, `cache-entries.json`) holding a map of
//! id -> record. Writes serialize the whole map to a temp file and rename
//! it over the target, so a single call either fully commits or fully
//! fails. A per-collection mutex serializes writers across tasks the same
//! way a storage engine would across tabs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Collection, PersistentStore};
use crate::error::StoreError;

pub struct JsonFileStore {
    dir: PathBuf,
    pending_lock: Mutex<()>,
    cache_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opening is lazy: the directory is created on first write.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            pending_lock: Mutex::new(()),
            cache_lock: Mutex::new(()),
        }
    }

    fn lock_for(&self, collection: Collection) -> &Mutex<()> {
        match collection {
            Collection::PendingMutations => &self.pending_lock,
            Collection::CacheEntries => &self.cache_lock,
        }
    }

    fn path_for(&self, collection: Collection) -> PathBuf {
        self.dir.join(format!("{}.json", collection.as_str()))
    }

    async fn read_map(&self, collection: Collection) -> Result<BTreeMap<String, Value>, StoreError> {
        let path = self.path_for(collection);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        // A file we wrote but can no longer parse means the storage layer is
        // corrupted, which callers must treat as durability unavailable.
        serde_json::from_str(&contents).map_err(|e| {
            StoreError::Unavailable(format!("corrupted collection {}: {}", path.display(), e))
        })
    }

    async fn write_map(
        &self,
        collection: Collection,
        map: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to create data dir: {}", e)))?;

        let path = self.path_for(collection);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(map)?;

        tokio::fs::write(&tmp, contents).await.map_err(|e| {
            StoreError::Unavailable(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            StoreError::Unavailable(format!("failed to commit {}: {}", path.display(), e))
        })?;

        debug!(collection = collection.as_str(), records = map.len(), "collection committed");
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn put(
        &self,
        collection: Collection,
        id: &str,
        record: Value,
    ) -> Result<(), StoreError> {
        let _guard = self.lock_for(collection).lock().await;
        let mut map = self.read_map(collection).await?;
        map.insert(id.to_string(), record);
        self.write_map(collection, &map).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock_for(collection).lock().await;
        let map = self.read_map(collection).await?;
        Ok(map.get(id).cloned())
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let _guard = self.lock_for(collection).lock().await;
        let map = self.read_map(collection).await?;
        Ok(map.into_values().collect())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock_for(collection).lock().await;
        let mut map = self.read_map(collection).await?;
        if map.remove(id).is_some() {
            self.write_map(collection, &map).await?;
        }
        Ok(())
    }

    async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        let _guard = self.lock_for(collection).lock().await;
        self.write_map(collection, &BTreeMap::new()).await
    }
}
