//! Change-list bus: session-wide subscription to changed/closed handle
//! lists, independent of the per-object change signals in [`crate::registry`].
//! Grounded on `session_change_lists.go`'s `sessionChangeLists`.

use tokio::sync::{mpsc, Mutex};

use crate::protocol::{ChangeLists, Handle};

/// Capacity of a single subscriber's channel, matching the original's
/// buffered `chan ChangeLists`.
const CHANNEL_CAPACITY: usize = 16;

struct Subscriber {
    id: u64,
    pushed_only: bool,
    sender: mpsc::Sender<ChangeLists>,
}

struct Inner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Fans out changed/closed handle lists to every subscriber. One instance
/// per session.
pub struct ChangeListBus {
    inner: Mutex<Inner>,
}

impl Default for ChangeListBus {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }
}

impl ChangeListBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to change lists. When `pushed_only` is true, only
    /// unsolicited server-pushed updates are delivered; call-triggered
    /// updates from the caller's own responses are skipped.
    pub async fn subscribe(&self, pushed_only: bool) -> (mpsc::Receiver<ChangeLists>, u64) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            pushed_only,
            sender: tx,
        });
        (rx, id)
    }

    pub async fn unsubscribe(&self, token: u64) {
        self.inner.lock().await.subscribers.retain(|s| s.id != token);
    }

    /// Delivers `changed`/`closed` to matching subscribers. Empty lists are
    /// never delivered. `pushed` distinguishes an unsolicited server push
    /// from status lists riding along on a call's own response. Delivery
    /// blocks on a full subscriber channel rather than dropping it — a
    /// subscriber is only ever removed once its receiver is actually gone.
    pub async fn emit(&self, changed: &[Handle], closed: &[Handle], pushed: bool) {
        if changed.is_empty() && closed.is_empty() {
            return;
        }
        let lists = ChangeLists {
            changed: changed.to_vec(),
            closed: closed.to_vec(),
            suspended: Vec::new(),
        };
        let mut inner = self.inner.lock().await;
        let mut i = 0;
        while i < inner.subscribers.len() {
            if !(pushed || !inner.subscribers[i].pushed_only) {
                i += 1;
                continue;
            }
            let sender = inner.subscribers[i].sender.clone();
            if sender.send(lists.clone()).await.is_err() {
                inner.subscribers.remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub async fn close_all(&self) {
        self.inner.lock().await.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushed_only_subscriber_ignores_call_triggered_updates() {
        let bus = ChangeListBus::new();
        let (mut rx, _id) = bus.subscribe(true).await;
        bus.emit(&[1], &[], false).await;
        bus.emit(&[2], &[], true).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.changed, vec![2]);
    }

    #[tokio::test]
    async fn unfiltered_subscriber_receives_both_kinds() {
        let bus = ChangeListBus::new();
        let (mut rx, _id) = bus.subscribe(false).await;
        bus.emit(&[1], &[], false).await;
        bus.emit(&[2], &[], true).await;
        assert_eq!(rx.recv().await.unwrap().changed, vec![1]);
        assert_eq!(rx.recv().await.unwrap().changed, vec![2]);
    }

    #[tokio::test]
    async fn empty_lists_are_never_delivered() {
        let bus = ChangeListBus::new();
        let (mut rx, _id) = bus.subscribe(false).await;
        bus.emit(&[], &[], true).await;
        bus.emit(&[1], &[], true).await;
        assert_eq!(rx.recv().await.unwrap().changed, vec![1]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = ChangeListBus::new();
        let (mut rx, id) = bus.subscribe(false).await;
        bus.unsubscribe(id).await;
        bus.emit(&[1], &[], true).await;
        assert!(rx.recv().await.is_none());
    }
}
