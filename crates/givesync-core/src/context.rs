//! Background context: explicit wiring of every component plus the event
//! loop reacting to connectivity transitions and deferred sync requests.
//!
//! Nothing here is ambient or global. The context is constructed at
//! activation, recreates its view of the world from the persistent store,
//! and is driven entirely through its handler entry points - which keeps
//! the control flow testable without any platform runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::error::CacheError;
use crate::models::{ApiRequest, ApiResponse};
use crate::monitor::NetworkMonitor;
use crate::net::{NetworkInterceptor, Transport};
use crate::notify::{NotificationBridge, PushNotification, PushSink};
use crate::store::PersistentStore;
use crate::sync::{
    ChannelScheduler, ReplayPolicy, SyncCoordinator, SyncState, SyncStatus, SyncTag,
};

/// Requests a foreground view can send to the background context.
#[derive(Debug, Clone)]
pub enum ClientRequest {
    PendingCount,
    Cancel { id: String },
    SyncNow,
    Status,
}

#[derive(Debug, Clone)]
pub enum ClientReply {
    PendingCount(usize),
    Cancelled(bool),
    SyncFinished { replayed: usize },
    Status(SyncStatus),
}

/// Upper bound on the backoff between failed drain passes.
const BACKOFF_CAP_SECS: u64 = 60;

/// Fully wired engine. The agent (or a test) takes the handles it needs and
/// hands `context` to a task running the event loop.
pub struct Engine {
    pub context: BackgroundContext,
    pub monitor: Arc<NetworkMonitor>,
    pub bridge: NotificationBridge,
    pub coordinator: Arc<SyncCoordinator>,
    pub interceptor: Arc<NetworkInterceptor>,
    pub cache: Arc<CacheStore>,
    pub state: Arc<SyncState>,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn PersistentStore>,
        transport: Arc<dyn Transport>,
        push: Option<Arc<dyn PushSink>>,
    ) -> Self {
        let state = Arc::new(SyncState::new());
        let bridge = NotificationBridge::new(64, push);
        let (scheduler, sync_rx) = ChannelScheduler::new();

        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            transport.clone(),
            Arc::new(scheduler),
            bridge.clone(),
            state.clone(),
            ReplayPolicy {
                max_attempts: config.max_replay_attempts,
                attempt_timeout: Duration::from_secs(config.request_timeout_secs),
            },
        ));
        let cache = Arc::new(CacheStore::new(
            store,
            config.cache_version.clone(),
            config.max_cache_entries,
            config.max_cache_body_bytes,
        ));
        let interceptor = Arc::new(NetworkInterceptor::new(
            transport,
            cache.clone(),
            coordinator.clone(),
            state.clone(),
        ));
        let monitor = Arc::new(NetworkMonitor::new(false));

        let context = BackgroundContext {
            interceptor: interceptor.clone(),
            coordinator: coordinator.clone(),
            cache: cache.clone(),
            bridge: bridge.clone(),
            state: state.clone(),
            monitor_rx: monitor.subscribe(),
            sync_rx,
            debounce: Duration::from_millis(config.debounce_window_ms),
            backoff_base: Duration::from_millis(config.retry_base_delay_ms),
            backoff_cap: Duration::from_secs(BACKOFF_CAP_SECS),
        };

        Self {
            context,
            monitor,
            bridge,
            coordinator,
            interceptor,
            cache,
            state,
        }
    }
}

pub struct BackgroundContext {
    interceptor: Arc<NetworkInterceptor>,
    coordinator: Arc<SyncCoordinator>,
    cache: Arc<CacheStore>,
    bridge: NotificationBridge,
    state: Arc<SyncState>,
    monitor_rx: watch::Receiver<bool>,
    sync_rx: mpsc::UnboundedReceiver<SyncTag>,
    debounce: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl BackgroundContext {
    /// Fetch entry point: every outbound request flows through here.
    pub async fn handle_fetch(&self, request: ApiRequest) -> ApiResponse {
        self.interceptor.handle(request).await
    }

    /// Message entry point for foreground views.
    pub async fn handle_message(&self, request: ClientRequest) -> ClientReply {
        match request {
            ClientRequest::PendingCount => {
                ClientReply::PendingCount(self.coordinator.pending_count().await)
            }
            ClientRequest::Cancel { id } => match self.coordinator.cancel(&id).await {
                Ok(existed) => ClientReply::Cancelled(existed),
                Err(e) => {
                    warn!(%id, error = %e, "cancel failed");
                    ClientReply::Cancelled(false)
                }
            },
            ClientRequest::SyncNow => match self.coordinator.drain().await {
                Ok(report) => ClientReply::SyncFinished {
                    replayed: report.replayed,
                },
                Err(e) => {
                    warn!(error = %e, "manual sync stopped on transient failure");
                    ClientReply::SyncFinished { replayed: 0 }
                }
            },
            ClientRequest::Status => ClientReply::Status(self.state.status()),
        }
    }

    /// Push entry point: a server-initiated push becomes a system
    /// notification.
    pub fn handle_push(&self, notification: PushNotification) {
        info!(title = %notification.title, "push received");
        self.bridge.push_detached(notification);
    }

    /// Activation of a new release: purge cache entries from prior versions.
    pub async fn activate(&self, cache_version: &str) -> Result<usize, CacheError> {
        self.cache.activate_version(cache_version).await
    }

    /// Event loop. Reacts to connectivity transitions (debounced, one drain
    /// per offline-to-online transition) and deferred sync registrations;
    /// failed drain passes are retried with exponential backoff.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("background context running");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("background context shutting down");
                    break;
                }
                changed = self.monitor_rx.changed() => {
                    if changed.is_err() {
                        // Monitor dropped; nothing can wake us for sync again
                        break;
                    }
                    let online = *self.monitor_rx.borrow_and_update();
                    if online && !self.state.is_online() {
                        self.on_online_transition().await;
                    } else if !online && self.state.is_online() {
                        self.state.set_online(false);
                        info!("connectivity lost");
                    }
                }
                Some(tag) = self.sync_rx.recv() => {
                    debug!(%tag, "deferred sync requested");
                    if self.state.is_online() {
                        self.drain_with_backoff().await;
                    }
                    // Offline: the queue is durable, the next online
                    // transition picks it up.
                }
            }
        }
    }

    async fn on_online_transition(&mut self) {
        // Wait out rapid flapping; only a transition that survives the
        // quiet window triggers a drain.
        tokio::time::sleep(self.debounce).await;
        if !*self.monitor_rx.borrow() {
            debug!("online signal did not survive debounce window");
            return;
        }
        self.state.set_online(true);
        info!("connectivity restored, draining queue");
        self.drain_with_backoff().await;
    }

    async fn drain_with_backoff(&self) {
        let mut backoff = self.backoff_base;
        loop {
            match self.coordinator.drain().await {
                Ok(report) => {
                    debug!(
                        replayed = report.replayed,
                        dead_lettered = report.dead_lettered,
                        skipped = report.skipped,
                        "drain pass finished"
                    );
                    return;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "drain failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.backoff_cap);
                    if !*self.monitor_rx.borrow() {
                        debug!("went offline during backoff, deferring to next transition");
                        return;
                    }
                }
            }
        }
    }
}
