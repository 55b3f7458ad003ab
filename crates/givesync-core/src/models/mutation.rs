//! Queued write mutations and their replay lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::Method;
use crate::sync::SyncTag;

/// Which remote endpoint a queued mutation replays against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    CreateGiveaway,
    UpdateGiveaway,
    ClaimGiveaway,
    SubmitFeedback,
}

impl MutationKind {
    /// Background-sync tag this mutation registers under.
    pub fn sync_tag(&self) -> SyncTag {
        match self {
            MutationKind::CreateGiveaway
            | MutationKind::UpdateGiveaway
            | MutationKind::ClaimGiveaway => SyncTag::Giveaways,
            MutationKind::SubmitFeedback => SyncTag::Feedback,
        }
    }

    /// Resolve the replay endpoint for this mutation.
    ///
    /// Update/claim mutations address a specific giveaway; the interceptor
    /// merges the path id into the payload as `giveaway_id` at queue time.
    /// Returns `None` when the payload cannot address an endpoint - the
    /// coordinator dead-letters such a mutation instead of retrying it.
    pub fn endpoint(&self, payload: &Value) -> Option<(Method, String)> {
        match self {
            MutationKind::CreateGiveaway => Some((Method::Post, "/api/giveaways".to_string())),
            MutationKind::SubmitFeedback => Some((Method::Post, "/api/feedback".to_string())),
            MutationKind::UpdateGiveaway => {
                let id = giveaway_id(payload)?;
                Some((Method::Put, format!("/api/giveaways/{}", id)))
            }
            MutationKind::ClaimGiveaway => {
                let id = giveaway_id(payload)?;
                Some((Method::Post, format!("/api/giveaways/{}/claim", id)))
            }
        }
    }
}

fn giveaway_id(payload: &Value) -> Option<String> {
    let id = payload.get("giveaway_id")?;
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationStatus {
    Pending,
    InFlight,
    FailedPermanent,
}

/// A durable, replayable write queued while offline.
///
/// The `id` doubles as the idempotency key sent on every replay attempt, so
/// at-least-once delivery collapses to exactly one server-side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: String,
    pub kind: MutationKind,
    pub payload: Value,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: MutationStatus,
}

impl PendingMutation {
    pub fn new(kind: MutationKind, payload: Value, owner_id: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            kind,
            payload,
            owner_id: owner_id.into(),
            created_at: Utc::now(),
            retry_count: 0,
            status: MutationStatus::Pending,
        }
    }
}

/// Millisecond timestamp plus a random hex suffix. Globally unique enough
/// for an idempotency key generated client-side without coordination.
fn generate_id() -> String {
    format!("{}-{:08x}", Utc::now().timestamp_millis(), rand::random::<u32>())
}
