//! Fan-out of sync outcomes to client views and, when none are open, to
//! system notifications.
//!
//! Delivery is best-effort and fire-and-forget: a closed view simply does
//! not receive the message, and nothing here may block the replay loop.
//! Durability lives in the mutation queue, not in this channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Messages broadcast from the background context to every open client view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// A queued giveaway mutation reached the server; echoes its payload.
    GiveawaySynced(Value),
    /// A queued feedback mutation reached the server; echoes its payload.
    FeedbackSynced(Value),
    /// A mutation exhausted its retries or was rejected outright.
    SyncFailed {
        id: String,
        reason: String,
    },
    /// The pending queue length changed.
    QueueUpdated {
        pending: usize,
    },
    /// Durable storage is broken; queued writes are held in memory only.
    DurabilityDegraded {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushData {
    pub url: String,
}

/// System notification payload. Click routing (focus an existing view on
/// `data.url` or open a new one) is the client shell's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    #[serde(default)]
    pub data: PushData,
}

impl PushNotification {
    fn sync_outcome(title: &str, body: String, require_interaction: bool) -> Self {
        Self {
            title: title.to_string(),
            body,
            icon: "/assets/icon-192.png".to_string(),
            badge: "/assets/badge-72.png".to_string(),
            tag: "givesync".to_string(),
            require_interaction,
            actions: vec![NotificationAction {
                action: "open".to_string(),
                title: "Open".to_string(),
            }],
            data: PushData {
                url: "/activity".to_string(),
            },
        }
    }
}

/// Port for the platform's system-notification facility.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn deliver(&self, notification: PushNotification) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct NotificationBridge {
    tx: broadcast::Sender<ClientMessage>,
    push: Option<Arc<dyn PushSink>>,
}

impl NotificationBridge {
    pub fn new(capacity: usize, push: Option<Arc<dyn PushSink>>) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, push }
    }

    /// Subscribe a client view. Messages sent before subscription are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver to every open view; fall through to a system notification
    /// when no view is open and the message warrants one. Never blocks and
    /// never fails.
    pub fn broadcast(&self, message: ClientMessage) {
        let no_clients = self.tx.receiver_count() == 0;
        if let Err(e) = self.tx.send(message.clone()) {
            debug!(error = %e, "no client views connected");
        }

        if no_clients {
            if let Some(notification) = Self::system_notification(&message) {
                self.push_detached(notification);
            }
        }
    }

    /// Deliver a server-initiated push payload (from the push event) to the
    /// system notification facility.
    pub fn push_detached(&self, notification: PushNotification) {
        let Some(push) = self.push.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = push.deliver(notification).await {
                warn!(error = %e, "system notification delivery failed");
            }
        });
    }

    fn system_notification(message: &ClientMessage) -> Option<PushNotification> {
        match message {
            ClientMessage::GiveawaySynced(_) => Some(PushNotification::sync_outcome(
                "Giveaway synced",
                "Your giveaway was published.".to_string(),
                false,
            )),
            ClientMessage::FeedbackSynced(_) => Some(PushNotification::sync_outcome(
                "Feedback synced",
                "Your feedback was delivered.".to_string(),
                false,
            )),
            ClientMessage::SyncFailed { reason, .. } => Some(PushNotification::sync_outcome(
                "Sync failed",
                format!("A queued change could not be synced: {}", reason),
                true,
            )),
            // Queue counters and degraded-mode warnings only matter to open
            // views; nobody wants a system notification for them.
            ClientMessage::QueueUpdated { .. } | ClientMessage::DurabilityDegraded { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_messages() {
        let bridge = NotificationBridge::new(16, None);
        let mut rx_a = bridge.subscribe();
        let mut rx_b = bridge.subscribe();

        bridge.broadcast(ClientMessage::GiveawaySynced(json!({"title": "Chair"})));

        let got_a = rx_a.recv().await.expect("recv a");
        let got_b = rx_b.recv().await.expect("recv b");
        assert!(matches!(got_a, ClientMessage::GiveawaySynced(_)));
        assert!(matches!(got_b, ClientMessage::GiveawaySynced(_)));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_does_not_fail() {
        let bridge = NotificationBridge::new(16, None);
        bridge.broadcast(ClientMessage::QueueUpdated { pending: 3 });
    }

    #[test]
    fn test_wire_format_matches_messaging_protocol() {
        let msg = ClientMessage::GiveawaySynced(json!({"title": "Chair"}));
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "giveaway-synced");
        assert_eq!(value["data"]["title"], "Chair");

        let msg = ClientMessage::FeedbackSynced(json!({"rating": 5}));
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "feedback-synced");
    }

    #[test]
    fn test_push_payload_uses_camel_case() {
        let n = PushNotification::sync_outcome("Sync failed", "details".to_string(), true);
        let value = serde_json::to_value(&n).expect("serialize");
        assert_eq!(value["requireInteraction"], true);
        assert!(value["data"]["url"].is_string());
        assert_eq!(value["actions"][0]["action"], "open");
    }

    #[test]
    fn test_only_sync_outcomes_become_system_notifications() {
        assert!(NotificationBridge::system_notification(&ClientMessage::SyncFailed {
            id: "1".to_string(),
            reason: "validation".to_string(),
        })
        .is_some());
        assert!(NotificationBridge::system_notification(&ClientMessage::QueueUpdated {
            pending: 1
        })
        .is_none());
    }
}
