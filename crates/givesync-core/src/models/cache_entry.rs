//! Cached response snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Consider a cached snapshot stale after 1 hour.
/// Balances freshness with reducing unnecessary network traffic for
/// slowly-changing data.
const CACHE_STALE_MINUTES: i64 = 60;

/// Serialized response: enough to reproduce the reply faithfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical `METHOD path` form of the originating request.
    pub request_key: String,
    pub snapshot: ResponseSnapshot,
    pub stored_at: DateTime<Utc>,
    /// Entries from a prior version are purged on activation of a new one.
    pub cache_version: String,
}

impl CacheEntry {
    pub fn new(request_key: String, snapshot: ResponseSnapshot, cache_version: String) -> Self {
        Self {
            request_key,
            snapshot,
            stored_at: Utc::now(),
            cache_version,
        }
    }

    /// Primary key in the cache-entries collection. Versioned, so at most
    /// one entry exists per request key per cache version.
    pub fn store_id(&self) -> String {
        Self::store_id_for(&self.cache_version, &self.request_key)
    }

    pub fn store_id_for(cache_version: &str, request_key: &str) -> String {
        format!("{}|{}", cache_version, request_key)
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.stored_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}
