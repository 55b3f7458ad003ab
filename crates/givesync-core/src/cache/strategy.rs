//! Request classification.
//!
//! `classify` is a pure function over the request's method, path and origin;
//! it performs no I/O and holds no state, which keeps the policy table
//! trivially unit-testable.

use crate::models::ApiRequest;

/// How the interceptor should fulfill a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Fingerprinted immutable assets: cached copy wins, fetch on miss.
    CacheFirst,
    /// Runtime assets (JS/CSS/images): serve cached immediately, refresh in
    /// the background for next time.
    StaleWhileRevalidate,
    /// Offline-safe API reads: try the network, fall back to the most
    /// recent cached snapshot tagged stale.
    NetworkFirst,
    /// Every other read: a stale answer is worse than an offline error.
    NetworkOnly,
    /// Mutating API calls: pass through while online, queue while offline.
    QueueOnWrite,
    /// Outside the same-origin API/asset namespace: never intercepted.
    Bypass,
}

/// Read endpoints for which a stale cached response is an acceptable
/// offline answer. Fixed list; everything else gets `NetworkOnly`.
const OFFLINE_SAFE_READS: &[&str] = &["/api/profile", "/api/giveaways", "/api/impact/summary"];

/// Extensions served under stale-while-revalidate.
const ASSET_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "svg", "webp", "ico", "woff", "woff2",
];

fn is_offline_safe(path: &str) -> bool {
    if OFFLINE_SAFE_READS.contains(&path) {
        return true;
    }
    // Individual giveaway reads (/api/giveaways/42) share the listing's
    // policy; sub-resources like /claim are mutations and never get here.
    if let Some(rest) = path.strip_prefix("/api/giveaways/") {
        return !rest.is_empty() && !rest.contains('/');
    }
    false
}

fn is_asset(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| ASSET_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

pub fn classify(request: &ApiRequest) -> CachePolicy {
    if !request.same_origin {
        return CachePolicy::Bypass;
    }

    if request.method.is_mutation() {
        return CachePolicy::QueueOnWrite;
    }

    // Fingerprinted build output is immutable for a given cache version.
    if request.path.starts_with("/assets/") {
        return CachePolicy::CacheFirst;
    }

    if is_asset(&request.path) {
        return CachePolicy::StaleWhileRevalidate;
    }

    if is_offline_safe(&request.path) {
        return CachePolicy::NetworkFirst;
    }

    CachePolicy::NetworkOnly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiRequest, Method};
    use serde_json::json;

    fn get(path: &str) -> ApiRequest {
        ApiRequest::get(path)
    }

    #[test]
    fn test_cross_origin_is_never_intercepted() {
        let mut req = get("/api/giveaways");
        req.same_origin = false;
        assert_eq!(classify(&req), CachePolicy::Bypass);

        let mut req = ApiRequest::post("/admin/tooling", json!({}));
        req.same_origin = false;
        assert_eq!(classify(&req), CachePolicy::Bypass);
    }

    #[test]
    fn test_mutations_queue_on_write() {
        assert_eq!(
            classify(&ApiRequest::post("/api/giveaways", json!({"title": "Chair"}))),
            CachePolicy::QueueOnWrite
        );
        let mut req = get("/api/giveaways/42");
        req.method = Method::Delete;
        assert_eq!(classify(&req), CachePolicy::QueueOnWrite);
    }

    #[test]
    fn test_fingerprinted_assets_are_cache_first() {
        assert_eq!(classify(&get("/assets/app.3fa9c1.js")), CachePolicy::CacheFirst);
        assert_eq!(classify(&get("/assets/logo.svg")), CachePolicy::CacheFirst);
    }

    #[test]
    fn test_runtime_assets_revalidate_in_background() {
        assert_eq!(classify(&get("/static/theme.css")), CachePolicy::StaleWhileRevalidate);
        assert_eq!(classify(&get("/images/banner.webp")), CachePolicy::StaleWhileRevalidate);
    }

    #[test]
    fn test_allow_listed_reads_are_network_first() {
        assert_eq!(classify(&get("/api/profile")), CachePolicy::NetworkFirst);
        assert_eq!(classify(&get("/api/giveaways")), CachePolicy::NetworkFirst);
        assert_eq!(classify(&get("/api/giveaways/42")), CachePolicy::NetworkFirst);
        assert_eq!(classify(&get("/api/impact/summary")), CachePolicy::NetworkFirst);
    }

    #[test]
    fn test_other_reads_never_serve_stale() {
        assert_eq!(classify(&get("/api/admin/reviews")), CachePolicy::NetworkOnly);
        assert_eq!(classify(&get("/api/messages")), CachePolicy::NetworkOnly);
        // Deep giveaway sub-resources are not on the allow-list
        assert_eq!(classify(&get("/api/giveaways/42/history")), CachePolicy::NetworkOnly);
    }
}
