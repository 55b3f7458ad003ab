//! Deferred-replay scheduling port.
//!
//! Queued writes register a named sync tag; the scheduler arranges for the
//! background context to call `drain()` later, possibly long after the
//! originating view has closed. Keeping this behind a port leaves the
//! coordinator's ordering and retry logic independent of any platform
//! background-sync facility.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
    Giveaways,
    Feedback,
}

impl SyncTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTag::Giveaways => "sync-giveaways",
            SyncTag::Feedback => "sync-feedback",
        }
    }
}

impl std::fmt::Display for SyncTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait SyncScheduler: Send + Sync {
    /// Request a deferred replay opportunity for `tag`. Fire-and-forget;
    /// registering the same tag twice before a drain is harmless.
    async fn register(&self, tag: SyncTag);
}

/// Forwards tags into the background context's event loop over a channel.
/// The loop applies exponential backoff between failed drain passes.
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<SyncTag>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncTag>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SyncScheduler for ChannelScheduler {
    async fn register(&self, tag: SyncTag) {
        debug!(%tag, "sync requested");
        // The context may already have shut down; losing the wake-up is
        // fine, the queue itself is durable.
        let _ = self.tx.send(tag);
    }
}

/// Discards registrations. For tests that drive `drain()` directly.
pub struct NullScheduler;

#[async_trait]
impl SyncScheduler for NullScheduler {
    async fn register(&self, _tag: SyncTag) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(SyncTag::Giveaways.as_str(), "sync-giveaways");
        assert_eq!(SyncTag::Feedback.to_string(), "sync-feedback");
    }

    #[tokio::test]
    async fn test_channel_scheduler_forwards_tags() {
        let (scheduler, mut rx) = ChannelScheduler::new();
        scheduler.register(SyncTag::Giveaways).await;
        scheduler.register(SyncTag::Feedback).await;
        assert_eq!(rx.recv().await, Some(SyncTag::Giveaways));
        assert_eq!(rx.recv().await, Some(SyncTag::Feedback));
    }
}
