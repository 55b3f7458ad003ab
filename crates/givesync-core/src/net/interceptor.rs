//! Policy execution for every outbound request.
//!
//! The interceptor is registered once per background-context lifetime. It
//! classifies each request and fulfills it from cache, network, or a
//! synthesized offline response; it always returns a response object, never
//! an error - callers expect an answer either way.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::transport::Transport;
use crate::cache::{classify, CachePolicy, CacheStore};
use crate::error::NetError;
use crate::models::{ApiRequest, ApiResponse, Method, MutationKind};
use crate::sync::{SyncCoordinator, SyncState};

pub struct NetworkInterceptor {
    transport: Arc<dyn Transport>,
    cache: Arc<CacheStore>,
    coordinator: Arc<SyncCoordinator>,
    state: Arc<SyncState>,
}

impl NetworkInterceptor {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<CacheStore>,
        coordinator: Arc<SyncCoordinator>,
        state: Arc<SyncState>,
    ) -> Self {
        Self {
            transport,
            cache,
            coordinator,
            state,
        }
    }

    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        match classify(&request) {
            CachePolicy::Bypass => self.pass_through(&request).await,
            CachePolicy::CacheFirst => self.cache_first(&request).await,
            CachePolicy::StaleWhileRevalidate => self.stale_while_revalidate(&request).await,
            CachePolicy::NetworkFirst => self.network_first(&request).await,
            CachePolicy::NetworkOnly => self.network_only(&request).await,
            CachePolicy::QueueOnWrite => self.queue_on_write(request).await,
        }
    }

    /// Outside the intercepted namespace: no cache reads, no cache writes.
    async fn pass_through(&self, request: &ApiRequest) -> ApiResponse {
        match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(rejection) = rejection_response(&e) {
                    return rejection;
                }
                debug!(path = %request.path, error = %e, "pass-through request failed");
                ApiResponse::offline_error()
            }
        }
    }

    async fn cache_first(&self, request: &ApiRequest) -> ApiResponse {
        match self.cache.lookup(request).await {
            Ok(Some(entry)) => return ApiResponse::from_snapshot(&entry.snapshot, entry.is_stale()),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "cache lookup failed, falling through to network"),
        }

        match self.fetch_and_record(request).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(rejection) = rejection_response(&e) {
                    return rejection;
                }
                debug!(path = %request.path, error = %e, "asset fetch failed");
                ApiResponse::offline_page()
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &ApiRequest) -> ApiResponse {
        match self.cache.lookup(request).await {
            Ok(Some(entry)) => {
                self.revalidate_detached(request.clone());
                return ApiResponse::from_snapshot(&entry.snapshot, entry.is_stale());
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "cache lookup failed, falling through to network"),
        }

        match self.fetch_and_record(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(path = %request.path, error = %e, "asset fetch failed");
                ApiResponse::offline_page()
            }
        }
    }

    /// Refresh the cached copy for next time. The caller was already served
    /// from cache, so errors here are swallowed.
    fn revalidate_detached(&self, request: ApiRequest) {
        let transport = self.transport.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            match transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = cache.record(&request, &response).await {
                        debug!(path = %request.path, error = %e, "failed to cache revalidated response");
                    }
                }
                Ok(response) => {
                    debug!(path = %request.path, status = response.status, "revalidation not cached")
                }
                Err(e) => debug!(path = %request.path, error = %e, "background revalidation failed"),
            }
        });
    }

    async fn network_first(&self, request: &ApiRequest) -> ApiResponse {
        match self.fetch_and_record(request).await {
            Ok(response) => return response,
            Err(e) => {
                if let Some(rejection) = rejection_response(&e) {
                    return rejection;
                }
                debug!(path = %request.path, error = %e, "network-first fetch failed, trying cache");
            }
        }

        match self.cache.lookup(request).await {
            // The snapshot is older than what the network would have
            // returned, so it is tagged stale regardless of its age.
            Ok(Some(entry)) => ApiResponse::from_snapshot(&entry.snapshot, true),
            Ok(None) => ApiResponse::offline_placeholder(),
            Err(e) => {
                debug!(error = %e, "cache fallback unavailable");
                ApiResponse::offline_placeholder()
            }
        }
    }

    /// Reads where a stale answer is worse than an offline error.
    async fn network_only(&self, request: &ApiRequest) -> ApiResponse {
        match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(rejection) = rejection_response(&e) {
                    return rejection;
                }
                debug!(path = %request.path, error = %e, "read failed while offline");
                ApiResponse::offline_error()
            }
        }
    }

    async fn queue_on_write(&self, request: ApiRequest) -> ApiResponse {
        if self.state.is_online() {
            match self.transport.send(&request).await {
                Ok(response) => {
                    if response.is_success() {
                        if let Err(e) = self.cache.record(&request, &response).await {
                            debug!(path = %request.path, error = %e, "failed to cache write response");
                        }
                    }
                    return response;
                }
                Err(e) if !e.is_transient() => {
                    return rejection_response(&e).unwrap_or_else(ApiResponse::offline_error);
                }
                Err(e) => {
                    // Nominally online but the network disagrees; queue it
                    // like any other offline write.
                    warn!(path = %request.path, error = %e, "pass-through write failed, queueing");
                }
            }
        }

        self.queue_mutation(&request).await
    }

    async fn queue_mutation(&self, request: &ApiRequest) -> ApiResponse {
        let Some((kind, giveaway_id)) = mutation_kind(request) else {
            debug!(path = %request.path, method = request.method.as_str(), "write has no replay mapping, cannot queue");
            return ApiResponse::offline_error();
        };

        let mut payload = match request.body.clone() {
            Some(Value::Object(map)) => Value::Object(map),
            Some(other) => json!({ "body": other }),
            None => json!({}),
        };
        if let Some(id) = giveaway_id {
            if let Value::Object(map) = &mut payload {
                map.insert("giveaway_id".to_string(), Value::String(id));
            }
        }

        let owner = request
            .owner_id
            .clone()
            .unwrap_or_else(|| "local".to_string());
        match self.coordinator.enqueue(kind, payload, owner).await {
            Ok(ack) => ApiResponse::queued(&ack.id, ack.degraded),
            Err(e) => {
                warn!(path = %request.path, error = %e, "failed to queue mutation");
                ApiResponse::offline_error()
            }
        }
    }

    async fn fetch_and_record(&self, request: &ApiRequest) -> Result<ApiResponse, NetError> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            if let Err(e) = self.cache.record(request, &response).await {
                debug!(path = %request.path, error = %e, "response not cached");
            }
        }
        Ok(response)
    }
}

/// A permanent upstream rejection is a real answer; hand it back as a
/// response object instead of synthesizing an offline one.
fn rejection_response(error: &NetError) -> Option<ApiResponse> {
    match error {
        NetError::Rejected { status, body } => Some(ApiResponse::rejection(*status, body.clone())),
        _ => None,
    }
}

/// Map a write request onto the mutation it queues as. Returns the giveaway
/// id for paths that address one, so replay can rebuild the endpoint from
/// the payload alone.
fn mutation_kind(request: &ApiRequest) -> Option<(MutationKind, Option<String>)> {
    let path = request.path.as_str();
    match (request.method, path) {
        (Method::Post, "/api/giveaways") => Some((MutationKind::CreateGiveaway, None)),
        (Method::Post, "/api/feedback") => Some((MutationKind::SubmitFeedback, None)),
        _ => {
            let rest = path.strip_prefix("/api/giveaways/")?;
            match request.method {
                Method::Put | Method::Patch if !rest.is_empty() && !rest.contains('/') => {
                    Some((MutationKind::UpdateGiveaway, Some(rest.to_string())))
                }
                Method::Post => {
                    let id = rest.strip_suffix("/claim")?;
                    if id.is_empty() || id.contains('/') {
                        return None;
                    }
                    Some((MutationKind::ClaimGiveaway, Some(id.to_string())))
                }
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MutationStatus, PendingMutation, ResponseSource};
    use crate::notify::NotificationBridge;
    use crate::store::{Collection, MemoryStore, PersistentStore};
    use crate::sync::{NullScheduler, ReplayPolicy};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct MockTransport {
        responses: Mutex<VecDeque<Result<ApiResponse, NetError>>>,
        calls: Mutex<Vec<ApiRequest>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Result<ApiResponse, NetError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }
    }

    fn ok_response(body: Value) -> ApiResponse {
        ApiResponse {
            status: 200,
            headers: BTreeMap::new(),
            body,
            source: ResponseSource::Network,
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, NetError> {
            self.calls.lock().await.push(request.clone());
            match self.responses.lock().await.pop_front() {
                Some(result) => result,
                None => Ok(ok_response(json!({"ok": true}))),
            }
        }
    }

    struct Harness {
        interceptor: NetworkInterceptor,
        transport: Arc<MockTransport>,
        cache: Arc<CacheStore>,
        store: Arc<MemoryStore>,
        state: Arc<SyncState>,
    }

    fn harness(online: bool, responses: Vec<Result<ApiResponse, NetError>>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new(responses));
        let cache = Arc::new(CacheStore::new(store.clone(), "v1", 64, 64 * 1024));
        let state = Arc::new(SyncState::new());
        state.set_online(online);
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            transport.clone(),
            Arc::new(NullScheduler),
            NotificationBridge::new(16, None),
            state.clone(),
            ReplayPolicy::default(),
        ));
        let interceptor = NetworkInterceptor::new(
            transport.clone(),
            cache.clone(),
            coordinator,
            state.clone(),
        );
        Harness {
            interceptor,
            transport,
            cache,
            store,
            state,
        }
    }

    async fn queued_mutations(store: &MemoryStore) -> Vec<PendingMutation> {
        store
            .get_all(Collection::PendingMutations)
            .await
            .expect("get_all")
            .into_iter()
            .map(|v| serde_json::from_value(v).expect("parse"))
            .collect()
    }

    fn network_down() -> NetError {
        NetError::Network("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_network_first_failure_serves_stale_snapshot() {
        let h = harness(false, vec![Err(network_down())]);
        let request = ApiRequest::get("/api/giveaways");
        h.cache
            .record(&request, &ok_response(json!([{"title": "Chair"}])))
            .await
            .expect("record");

        let response = h.interceptor.handle(request).await;
        assert_eq!(response.source, ResponseSource::Cache { stale: true });
        assert_eq!(response.body, json!([{"title": "Chair"}]));
    }

    #[tokio::test]
    async fn test_network_first_without_snapshot_returns_placeholder() {
        let h = harness(false, vec![Err(network_down())]);
        let response = h.interceptor.handle(ApiRequest::get("/api/profile")).await;
        assert_eq!(response.source, ResponseSource::Synthetic);
        assert_eq!(response.body, json!({"offline": true, "data": null}));
    }

    #[tokio::test]
    async fn test_network_only_failure_is_an_offline_error_not_stale_data() {
        let h = harness(false, vec![Err(network_down())]);
        let request = ApiRequest::get("/api/admin/reviews");
        // Even a warm cache must not be consulted for non-allow-listed reads
        h.cache
            .record(&request, &ok_response(json!({"secret": 1})))
            .await
            .expect("record");

        let response = h.interceptor.handle(request).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.source, ResponseSource::Synthetic);
    }

    #[tokio::test]
    async fn test_offline_write_queues_without_touching_network() {
        let h = harness(false, vec![]);
        let request = ApiRequest::post("/api/giveaways", json!({"title": "Chair"}))
            .with_owner("user-1");

        let response = h.interceptor.handle(request).await;
        assert_eq!(response.status, 202);
        assert_eq!(response.body["queued"], true);
        assert_eq!(h.transport.call_count().await, 0);

        let queued = queued_mutations(&h.store).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, MutationKind::CreateGiveaway);
        assert_eq!(queued[0].status, MutationStatus::Pending);
        assert_eq!(queued[0].owner_id, "user-1");
        assert_eq!(queued[0].payload, json!({"title": "Chair"}));
    }

    #[tokio::test]
    async fn test_online_write_passes_through_without_queueing() {
        let h = harness(true, vec![Ok(ok_response(json!({"id": "g-1"})))]);
        let response = h
            .interceptor
            .handle(ApiRequest::post("/api/giveaways", json!({"title": "Chair"})))
            .await;

        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(h.transport.call_count().await, 1);
        assert!(queued_mutations(&h.store).await.is_empty());
    }

    #[tokio::test]
    async fn test_online_write_failing_transiently_is_queued() {
        let h = harness(true, vec![Err(network_down())]);
        let response = h
            .interceptor
            .handle(ApiRequest::post("/api/feedback", json!({"rating": 5})))
            .await;

        assert_eq!(response.status, 202);
        let queued = queued_mutations(&h.store).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, MutationKind::SubmitFeedback);
    }

    #[tokio::test]
    async fn test_online_write_rejection_passes_through_as_response() {
        let h = harness(
            true,
            vec![Err(NetError::Rejected {
                status: 422,
                body: r#"{"error":"title required"}"#.to_string(),
            })],
        );
        let response = h
            .interceptor
            .handle(ApiRequest::post("/api/giveaways", json!({})))
            .await;

        assert_eq!(response.status, 422);
        assert!(queued_mutations(&h.store).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_path_id_is_merged_into_payload() {
        let h = harness(false, vec![]);
        let mut request = ApiRequest::post("/api/giveaways/g-42", json!({"title": "Desk"}));
        request.method = Method::Put;

        let response = h.interceptor.handle(request).await;
        assert_eq!(response.status, 202);

        let queued = queued_mutations(&h.store).await;
        assert_eq!(queued[0].kind, MutationKind::UpdateGiveaway);
        assert_eq!(queued[0].payload["giveaway_id"], "g-42");
        assert_eq!(queued[0].payload["title"], "Desk");
    }

    #[tokio::test]
    async fn test_claim_path_maps_to_claim_mutation() {
        let h = harness(false, vec![]);
        let response = h
            .interceptor
            .handle(ApiRequest::post("/api/giveaways/7/claim", json!({})))
            .await;
        assert_eq!(response.status, 202);

        let queued = queued_mutations(&h.store).await;
        assert_eq!(queued[0].kind, MutationKind::ClaimGiveaway);
        assert_eq!(queued[0].payload["giveaway_id"], "7");
    }

    #[tokio::test]
    async fn test_unmapped_write_is_not_queued() {
        let h = harness(false, vec![]);
        let response = h
            .interceptor
            .handle(ApiRequest::post("/api/messages", json!({"text": "hi"})))
            .await;
        assert_eq!(response.status, 503);
        assert!(queued_mutations(&h.store).await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let h = harness(true, vec![]);
        let request = ApiRequest::get("/assets/app.3fa9c1.js");
        h.cache
            .record(&request, &ok_response(json!("bundle")))
            .await
            .expect("record");

        let response = h.interceptor.handle(request).await;
        assert!(matches!(response.source, ResponseSource::Cache { .. }));
        assert_eq!(h.transport.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_caches() {
        let h = harness(true, vec![Ok(ok_response(json!("bundle")))]);
        let request = ApiRequest::get("/assets/app.3fa9c1.js");

        let response = h.interceptor.handle(request.clone()).await;
        assert_eq!(response.source, ResponseSource::Network);
        assert!(h.cache.lookup(&request).await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_cache_then_refreshes() {
        let h = harness(true, vec![Ok(ok_response(json!("fresh css")))]);
        let request = ApiRequest::get("/static/theme.css");
        h.cache
            .record(&request, &ok_response(json!("old css")))
            .await
            .expect("record");

        let response = h.interceptor.handle(request.clone()).await;
        assert!(matches!(response.source, ResponseSource::Cache { .. }));
        assert_eq!(response.body, json!("old css"));

        // Let the detached revalidation task run
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.transport.call_count().await, 1);
        let entry = h.cache.lookup(&request).await.expect("lookup").expect("hit");
        assert_eq!(entry.snapshot.body, json!("fresh css"));
    }

    #[tokio::test]
    async fn test_cross_origin_requests_bypass_cache_entirely() {
        let h = harness(true, vec![Ok(ok_response(json!({"external": true})))]);
        let mut request = ApiRequest::get("/api/giveaways");
        request.same_origin = false;

        let response = h.interceptor.handle(request.clone()).await;
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(h.transport.call_count().await, 1);
        assert!(h.cache.lookup(&request).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn test_offline_flag_routes_writes_to_queue() {
        let h = harness(true, vec![]);
        h.state.set_online(false);
        let response = h
            .interceptor
            .handle(ApiRequest::post("/api/giveaways", json!({"title": "Lamp"})))
            .await;
        assert_eq!(response.status, 202);
        assert_eq!(h.transport.call_count().await, 0);
    }
}
