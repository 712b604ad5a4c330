//! Progress notifications broadcast to live subscribers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Channel used by every deployment operation.
pub const DEPLOY_CHANNEL: &str = "deploy";

/// Line-break marker embedded in multi-line messages.
pub const LINE_BREAK: &str = "<br>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub text: String,
    pub severity: Severity,
}

impl Notification {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Info,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Error,
        }
    }
}

/// Sink for progress messages. Publishing is best-effort and never fails the
/// caller.
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, channel: &str, notification: Notification);
}

/// In-process broadcast point shared by every orchestration.
///
/// Each channel gets its own `broadcast` sender on first use. Subscribers that
/// fall behind by more than `capacity` messages lose the oldest ones. Channels
/// whose subscribers are all gone are dropped when a new channel is opened.
#[derive(Debug)]
pub struct BroadcastHub {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Notification>>>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notification> {
        if let Some(sender) = self.read_sender(channel) {
            return sender.subscribe();
        }

        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.read_sender(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn read_sender(&self, channel: &str) -> Option<broadcast::Sender<Notification>> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel)
            .cloned()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationPublisher for BroadcastHub {
    fn publish(&self, channel: &str, notification: Notification) {
        let Some(sender) = self.read_sender(channel) else {
            tracing::debug!(channel, "No subscribers, dropping notification");
            return;
        };

        if let Err(err) = sender.send(notification) {
            tracing::debug!(channel, "Notification not delivered: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_serializes_uppercase() {
        let json = serde_json::to_value(Notification::error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"text": "boom", "severity": "ERROR"}));
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let hub = BroadcastHub::new(8);
        hub.publish(DEPLOY_CHANNEL, Notification::info("nobody listens"));
        assert_eq!(hub.subscriber_count(DEPLOY_CHANNEL), 0);
    }

    #[test]
    fn every_subscriber_receives_in_order() {
        let hub = BroadcastHub::new(8);
        let mut first = hub.subscribe(DEPLOY_CHANNEL);
        let mut second = hub.subscribe(DEPLOY_CHANNEL);

        hub.publish(DEPLOY_CHANNEL, Notification::info("one"));
        hub.publish(DEPLOY_CHANNEL, Notification::error("two"));

        for receiver in [&mut first, &mut second] {
            assert_eq!(receiver.try_recv().unwrap(), Notification::info("one"));
            assert_eq!(receiver.try_recv().unwrap(), Notification::error("two"));
            assert!(receiver.try_recv().is_err());
        }
    }

    #[test]
    fn channels_are_isolated() {
        let hub = BroadcastHub::new(8);
        let mut deploy = hub.subscribe(DEPLOY_CHANNEL);
        let mut other = hub.subscribe("audit");

        hub.publish("audit", Notification::info("audit only"));

        assert!(deploy.try_recv().is_err());
        assert_eq!(other.try_recv().unwrap().text, "audit only");
    }

    #[test]
    fn publish_after_subscribers_left_does_not_panic() {
        let hub = BroadcastHub::new(8);
        drop(hub.subscribe(DEPLOY_CHANNEL));
        hub.publish(DEPLOY_CHANNEL, Notification::info("late"));
        assert_eq!(hub.subscriber_count(DEPLOY_CHANNEL), 0);
    }

    #[test]
    fn abandoned_channels_are_pruned() {
        let hub = BroadcastHub::new(8);
        let _deploy = hub.subscribe(DEPLOY_CHANNEL);
        for n in 0..100 {
            drop(hub.subscribe(&format!("scratch-{}", n)));
        }

        let channels = hub.channels.read().unwrap();
        assert_eq!(channels.len(), 2);
        assert!(channels.contains_key(DEPLOY_CHANNEL));
    }
}
