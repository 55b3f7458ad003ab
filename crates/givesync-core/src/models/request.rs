//! Request and response shapes seen by the interceptor.
//!
//! These are deliberately transport-neutral: the interceptor and strategy
//! classification work on them directly, and only `HttpTransport` translates
//! to real wire requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::cache_entry::ResponseSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

/// An outbound request as issued by the client shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API origin, e.g. `/api/giveaways/42`.
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Cross-origin requests are never intercepted.
    #[serde(default = "default_same_origin")]
    pub same_origin: bool,
    /// Originating user, carried onto queued mutations.
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn default_same_origin() -> bool {
    true
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
            same_origin: true,
            owner_id: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: BTreeMap::new(),
            body: Some(body),
            same_origin: true,
            owner_id: None,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Canonical cache key: method plus path.
    pub fn request_key(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }
}

/// Where a response came from. Callers and tests use this to tell a fresh
/// network answer from a stale cached snapshot or a synthesized reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    Network,
    Cache { stale: bool },
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub source: ResponseSource,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn from_snapshot(snapshot: &ResponseSnapshot, stale: bool) -> Self {
        Self {
            status: snapshot.status,
            headers: snapshot.headers.clone(),
            body: snapshot.body.clone(),
            source: ResponseSource::Cache { stale },
        }
    }

    /// Structured placeholder for offline-safe reads with no cached snapshot.
    pub fn offline_placeholder() -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: json!({ "offline": true, "data": null }),
            source: ResponseSource::Synthetic,
        }
    }

    /// Generic offline error for reads that must not serve stale data.
    pub fn offline_error() -> Self {
        Self {
            status: 503,
            headers: BTreeMap::new(),
            body: json!({ "offline": true, "error": "service unavailable while offline" }),
            source: ResponseSource::Synthetic,
        }
    }

    /// Minimal offline fallback page for shell/asset requests.
    pub fn offline_page() -> Self {
        Self {
            status: 503,
            headers: BTreeMap::new(),
            body: json!({ "offline": true, "page": "offline" }),
            source: ResponseSource::Synthetic,
        }
    }

    /// Optimistic acknowledgment for a queued write.
    pub fn queued(mutation_id: &str, degraded: bool) -> Self {
        Self {
            status: 202,
            headers: BTreeMap::new(),
            body: json!({
                "queued": true,
                "id": mutation_id,
                "durable": !degraded,
            }),
            source: ResponseSource::Synthetic,
        }
    }

    /// Pass a permanent upstream rejection through to the caller as a
    /// response object rather than an error.
    pub fn rejection(status: u16, body: String) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: serde_json::from_str(&body).unwrap_or(Value::String(body)),
            source: ResponseSource::Network,
        }
    }
}
