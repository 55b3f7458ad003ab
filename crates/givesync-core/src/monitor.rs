//! Connectivity transitions.
//!
//! The monitor is fed by whatever the host can observe (a periodic health
//! probe in the agent) and fans transitions out over a watch channel.
//! Setting the same value twice does not notify, so subscribers see
//! transitions, not probes.

use tokio::sync::watch;
use tracing::{info, warn};

pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Subscribe to transition events; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            if online {
                info!("network: online");
            } else {
                warn!("network: offline");
            }
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_notify_subscribers() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!*rx.borrow());

        monitor.set_online(true);
        rx.changed().await.expect("changed");
        assert!(*rx.borrow());
    }

    #[test]
    fn test_repeated_probes_do_not_notify() {
        let monitor = NetworkMonitor::new(true);
        let rx = monitor.subscribe();

        monitor.set_online(true);
        monitor.set_online(true);
        assert!(!rx.has_changed().expect("has_changed"));

        monitor.set_online(false);
        assert!(rx.has_changed().expect("has_changed"));
        assert!(!monitor.is_online());
    }
}
