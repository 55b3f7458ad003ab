//! Error taxonomy for the sync engine.
//!
//! The split matters to callers: `NetError` distinguishes transient failures
//! (retried with backoff) from permanent rejections (dead-lettered and
//! surfaced to the user), and `StoreError::Unavailable` signals that the
//! durability layer is broken and the caller must degrade to best-effort
//! in-memory queuing with a visible warning.

use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum NetError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited - please wait before retrying")]
    RateLimited,

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl NetError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            429 => NetError::RateLimited,
            500..=599 => NetError::Server {
                status,
                body: truncated,
            },
            // 4xx covers validation failures, auth problems, and replay
            // targets deleted server-side (404/410). None of these get
            // better with retries.
            _ => NetError::Rejected {
                status,
                body: truncated,
            },
        }
    }

    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, NetError::Rejected { .. })
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("response body of {bytes} bytes exceeds cache entry limit of {limit}")]
    QuotaExceeded { bytes: usize, limit: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cache entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Net(#[from] NetError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_retryability() {
        assert!(matches!(
            NetError::from_status(429, ""),
            NetError::RateLimited
        ));
        assert!(NetError::from_status(429, "").is_transient());
        assert!(NetError::from_status(503, "upstream down").is_transient());
        assert!(!NetError::from_status(422, "bad title").is_transient());
        assert!(!NetError::from_status(404, "gone").is_transient());
        assert!(!NetError::from_status(401, "expired").is_transient());
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let err = NetError::from_status(500, &body);
        let msg = err.to_string();
        assert!(msg.len() < 700);
        assert!(msg.contains("truncated"));
    }
}
