//! Durable keyed object storage shared by every other component.
//!
//! Consumers must not assume anything about the on-disk format beyond
//! "keyed object store": records go in and come out as JSON values, which
//! lets tests substitute [`MemoryStore`] and keeps the underlying engine
//! swappable.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// The two durable collections, each keyed by record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    PendingMutations,
    CacheEntries,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::PendingMutations => "pending-mutations",
            Collection::CacheEntries => "cache-entries",
        }
    }
}

/// Asynchronous, per-call-transactional keyed storage.
///
/// A single `put` or `delete` either fully commits or fully fails; there are
/// no partial writes. Opening is lazy and idempotent - the first operation
/// creates the backing schema, later ones reuse it. When the underlying
/// storage is broken (quota, corruption) operations reject with
/// [`StoreError::Unavailable`] and callers degrade to best-effort in-memory
/// queuing with a user-visible warning, never a silent no-op.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn put(&self, collection: Collection, id: &str, record: Value)
        -> Result<(), StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    async fn clear(&self, collection: Collection) -> Result<(), StoreError>;
}
