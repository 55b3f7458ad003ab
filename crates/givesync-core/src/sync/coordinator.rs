//! Owns the pending-mutation queue: durable enqueue, ordered replay with
//! retry/backoff, dead-lettering, and user-facing sync notifications.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::scheduler::SyncScheduler;
use super::state::SyncState;
use crate::error::{NetError, StoreError, SyncError};
use crate::models::{ApiRequest, MutationKind, MutationStatus, PendingMutation};
use crate::net::{Transport, IDEMPOTENCY_HEADER};
use crate::notify::{ClientMessage, NotificationBridge};
use crate::store::{Collection, PersistentStore};

/// Maximum replay attempts before a mutation is dead-lettered.
/// 5 attempts with exponential backoff covers multi-minute outages without
/// retrying a genuinely broken mutation forever.
const MAX_REPLAY_ATTEMPTS: u32 = 5;

/// Per-attempt network bound. A timed-out replay counts as a transient
/// network failure.
const REPLAY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ReplayPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_REPLAY_ATTEMPTS,
            attempt_timeout: Duration::from_secs(REPLAY_TIMEOUT_SECS),
        }
    }
}

/// Acknowledgment returned to the caller of `enqueue`. `degraded` means the
/// durable store was unavailable and the mutation is held in memory only.
#[derive(Debug, Clone)]
pub struct EnqueueAck {
    pub id: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DrainReport {
    pub replayed: usize,
    pub dead_lettered: usize,
    /// Mutations cancelled between load and replay.
    pub skipped: usize,
    /// Another drain pass already held the slot; nothing was done.
    pub already_draining: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Durable,
    Overflow,
}

/// Releases the drain slot on every exit path, including propagated errors.
struct DrainGuard(Arc<SyncState>);

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.0.end_drain();
    }
}

pub struct SyncCoordinator {
    store: Arc<dyn PersistentStore>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn SyncScheduler>,
    bridge: NotificationBridge,
    state: Arc<SyncState>,
    policy: ReplayPolicy,
    /// Best-effort holding pen used while durable storage is unavailable.
    overflow: Mutex<Vec<PendingMutation>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn SyncScheduler>,
        bridge: NotificationBridge,
        state: Arc<SyncState>,
        policy: ReplayPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            scheduler,
            bridge,
            state,
            policy,
            overflow: Mutex::new(Vec::new()),
        }
    }

    /// Persist a mutation and request a deferred replay opportunity.
    ///
    /// If the durable store rejects the write, the mutation is kept in the
    /// in-memory overflow and the caller gets a degraded acknowledgment -
    /// queued writes are never silently dropped.
    pub async fn enqueue(
        &self,
        kind: MutationKind,
        payload: Value,
        owner_id: impl Into<String>,
    ) -> Result<EnqueueAck, SyncError> {
        let mutation = PendingMutation::new(kind, payload, owner_id);
        let record = serde_json::to_value(&mutation).map_err(StoreError::from)?;

        let degraded = match self
            .store
            .put(Collection::PendingMutations, &mutation.id, record)
            .await
        {
            Ok(()) => false,
            Err(StoreError::Unavailable(reason)) => {
                warn!(id = %mutation.id, %reason, "durable queue unavailable, holding mutation in memory");
                self.bridge
                    .broadcast(ClientMessage::DurabilityDegraded { reason });
                self.overflow.lock().await.push(mutation.clone());
                true
            }
            Err(e) => return Err(e.into()),
        };

        self.scheduler.register(kind.sync_tag()).await;
        info!(id = %mutation.id, kind = ?kind, degraded, "mutation queued");
        self.broadcast_queue_len().await;

        Ok(EnqueueAck {
            id: mutation.id,
            degraded,
        })
    }

    /// Remove a queued mutation before it replays. The drain pass re-checks
    /// existence immediately before each attempt, so a cancel that lands
    /// mid-pass still wins.
    pub async fn cancel(&self, id: &str) -> Result<bool, SyncError> {
        let mut existed = false;
        if self
            .store
            .get(Collection::PendingMutations, id)
            .await?
            .is_some()
        {
            self.store.delete(Collection::PendingMutations, id).await?;
            existed = true;
        }

        {
            let mut overflow = self.overflow.lock().await;
            let before = overflow.len();
            overflow.retain(|m| m.id != id);
            existed |= overflow.len() != before;
        }

        if existed {
            info!(id, "queued mutation cancelled");
            self.broadcast_queue_len().await;
        }
        Ok(existed)
    }

    /// Count of mutations still awaiting replay. Always derived, never
    /// cached.
    pub async fn pending_count(&self) -> usize {
        let durable = match self.store.get_all(Collection::PendingMutations).await {
            Ok(values) => values
                .into_iter()
                .filter_map(|v| serde_json::from_value::<PendingMutation>(v).ok())
                .filter(|m| m.status == MutationStatus::Pending)
                .count(),
            Err(e) => {
                debug!(error = %e, "pending count unavailable from durable store");
                0
            }
        };
        let overflow = self
            .overflow
            .lock()
            .await
            .iter()
            .filter(|m| m.status == MutationStatus::Pending)
            .count();
        durable + overflow
    }

    /// Replay every queued mutation in `created_at` order, strictly
    /// sequentially.
    ///
    /// Exactly one pass runs at a time; a concurrent call returns
    /// immediately with `already_draining`. A transient failure stops the
    /// pass and propagates, so the scheduler reschedules with backoff
    /// instead of letting later mutations overtake one that will be
    /// retried. Permanent rejections dead-letter the mutation and the pass
    /// continues.
    pub async fn drain(&self) -> Result<DrainReport, SyncError> {
        if !self.state.begin_drain() {
            debug!("drain already in progress");
            return Ok(DrainReport {
                already_draining: true,
                ..Default::default()
            });
        }
        let _guard = DrainGuard(self.state.clone());
        self.state.mark_attempt();

        let mut batch: Vec<(PendingMutation, Origin)> = Vec::new();
        match self.store.get_all(Collection::PendingMutations).await {
            Ok(values) => {
                for value in values {
                    match serde_json::from_value::<PendingMutation>(value) {
                        Ok(m) if m.status != MutationStatus::FailedPermanent => {
                            batch.push((m, Origin::Durable))
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "skipping unreadable queue record"),
                    }
                }
            }
            Err(StoreError::Unavailable(reason)) => {
                warn!(%reason, "durable queue unreadable, draining memory overflow only");
            }
            Err(e) => return Err(e.into()),
        }
        {
            let overflow = self.overflow.lock().await;
            for m in overflow.iter() {
                if m.status != MutationStatus::FailedPermanent {
                    batch.push((m.clone(), Origin::Overflow));
                }
            }
        }

        // InFlight rows are crash leftovers: the drain slot guarantees no
        // other pass is live, so resurrect them for replay.
        for (mutation, _) in batch.iter_mut() {
            if mutation.status == MutationStatus::InFlight {
                mutation.status = MutationStatus::Pending;
            }
        }

        // Earlier writes must not be reordered behind later ones; later
        // mutations may depend on earlier ones having succeeded.
        batch.sort_by(|a, b| {
            a.0.created_at
                .cmp(&b.0.created_at)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        let mut report = DrainReport::default();
        for (mut mutation, origin) in batch {
            if self.was_cancelled(&mutation, origin).await {
                report.skipped += 1;
                continue;
            }

            mutation.status = MutationStatus::InFlight;
            self.persist(&mutation, origin).await;

            let Some((method, path)) = mutation.kind.endpoint(&mutation.payload) else {
                self.dead_letter(&mut mutation, origin, "payload does not address a replay endpoint")
                    .await;
                report.dead_lettered += 1;
                continue;
            };

            let mut headers = BTreeMap::new();
            headers.insert(IDEMPOTENCY_HEADER.to_string(), mutation.id.clone());
            let request = ApiRequest {
                method,
                path: path.clone(),
                headers,
                body: Some(mutation.payload.clone()),
                same_origin: true,
                owner_id: Some(mutation.owner_id.clone()),
            };

            info!(id = %mutation.id, attempt = mutation.retry_count + 1, %path, "replaying mutation");
            let outcome =
                tokio::time::timeout(self.policy.attempt_timeout, self.transport.send(&request))
                    .await;
            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(NetError::Timeout),
            };

            match result {
                Ok(_response) => {
                    self.remove(&mutation, origin).await;
                    self.state.mark_success();
                    report.replayed += 1;
                    self.bridge.broadcast(Self::synced_message(&mutation));
                    info!(id = %mutation.id, "mutation replayed");
                }
                Err(e) if e.is_transient() => {
                    mutation.retry_count += 1;
                    if mutation.retry_count >= self.policy.max_attempts {
                        warn!(id = %mutation.id, error = %e, "retry budget exhausted");
                        self.dead_letter(&mut mutation, origin, &e.to_string()).await;
                        report.dead_lettered += 1;
                        continue;
                    }

                    mutation.status = MutationStatus::Pending;
                    self.persist(&mutation, origin).await;
                    warn!(
                        id = %mutation.id,
                        retry_count = mutation.retry_count,
                        error = %e,
                        "transient replay failure, stopping pass"
                    );
                    self.broadcast_queue_len().await;
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(id = %mutation.id, error = %e, "permanent replay rejection");
                    self.dead_letter(&mut mutation, origin, &e.to_string()).await;
                    report.dead_lettered += 1;
                }
            }
        }

        self.broadcast_queue_len().await;
        Ok(report)
    }

    async fn was_cancelled(&self, mutation: &PendingMutation, origin: Origin) -> bool {
        match origin {
            Origin::Durable => match self.store.get(Collection::PendingMutations, &mutation.id).await
            {
                Ok(record) => record.is_none(),
                Err(e) => {
                    // Replay from the in-memory copy; at-least-once beats
                    // dropping the write.
                    warn!(id = %mutation.id, error = %e, "cancel check failed, replaying anyway");
                    false
                }
            },
            Origin::Overflow => {
                let overflow = self.overflow.lock().await;
                !overflow.iter().any(|m| m.id == mutation.id)
            }
        }
    }

    async fn persist(&self, mutation: &PendingMutation, origin: Origin) {
        match origin {
            Origin::Durable => {
                let record = match serde_json::to_value(mutation) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(id = %mutation.id, error = %e, "failed to serialize mutation");
                        return;
                    }
                };
                if let Err(e) = self
                    .store
                    .put(Collection::PendingMutations, &mutation.id, record)
                    .await
                {
                    warn!(id = %mutation.id, error = %e, "failed to persist mutation state");
                }
            }
            Origin::Overflow => {
                let mut overflow = self.overflow.lock().await;
                if let Some(slot) = overflow.iter_mut().find(|m| m.id == mutation.id) {
                    *slot = mutation.clone();
                }
            }
        }
    }

    async fn remove(&self, mutation: &PendingMutation, origin: Origin) {
        match origin {
            Origin::Durable => {
                if let Err(e) = self
                    .store
                    .delete(Collection::PendingMutations, &mutation.id)
                    .await
                {
                    // The idempotency key makes an eventual double replay a
                    // server-side no-op.
                    warn!(id = %mutation.id, error = %e, "failed to delete replayed mutation");
                }
            }
            Origin::Overflow => {
                let mut overflow = self.overflow.lock().await;
                overflow.retain(|m| m.id != mutation.id);
            }
        }
    }

    async fn dead_letter(&self, mutation: &mut PendingMutation, origin: Origin, reason: &str) {
        mutation.status = MutationStatus::FailedPermanent;
        self.persist(mutation, origin).await;
        self.bridge.broadcast(ClientMessage::SyncFailed {
            id: mutation.id.clone(),
            reason: reason.to_string(),
        });
    }

    fn synced_message(mutation: &PendingMutation) -> ClientMessage {
        match mutation.kind {
            MutationKind::SubmitFeedback => {
                ClientMessage::FeedbackSynced(mutation.payload.clone())
            }
            _ => ClientMessage::GiveawaySynced(mutation.payload.clone()),
        }
    }

    async fn broadcast_queue_len(&self) {
        let pending = self.pending_count().await;
        self.bridge.broadcast(ClientMessage::QueueUpdated { pending });
    }
}
