//! Remote-object registry: tracks live handles and fans out change/close
//! events. Grounded on `remote_object.go` / `remote_object_registry.go`,
//! rendered with `tokio::sync::mpsc` bounded channels in place of Go's
//! buffered channel-of-`struct{}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::protocol::{Handle, ObjectInterface};

/// Capacity of a single object's change-subscriber channel. Delivery is
/// best-effort: a subscriber that isn't draining loses signals rather than
/// stalling the registry (see `signal_changed`).
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// A unit signal: the object changed, with no payload.
pub type ChangeSignal = ();

struct RemoteObjectInner {
    change_subscribers: Mutex<HashMap<u64, mpsc::Sender<ChangeSignal>>>,
    next_subscriber_id: Mutex<u64>,
    closed: Mutex<bool>,
    closed_notify: tokio::sync::Notify,
    dropped_changes: AtomicU64,
}

/// In-process proxy for an object living inside the engine. Shared by
/// everyone who received it from the session; its closed-latch and
/// change-subscribers outlive the registry entry long enough for observers
/// to drain them after removal.
pub struct RemoteObject {
    pub interface: ObjectInterface,
    inner: Arc<RemoteObjectInner>,
}

impl Clone for RemoteObject {
    fn clone(&self) -> Self {
        Self {
            interface: self.interface.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl RemoteObject {
    fn new(interface: ObjectInterface) -> Self {
        Self {
            interface,
            inner: Arc::new(RemoteObjectInner {
                change_subscribers: Mutex::new(HashMap::new()),
                next_subscriber_id: Mutex::new(0),
                closed: Mutex::new(false),
                closed_notify: tokio::sync::Notify::new(),
                dropped_changes: AtomicU64::new(0),
            }),
        }
    }

    pub fn handle(&self) -> Handle {
        self.interface.handle
    }

    /// Subscribes to change signals for this object. Returns the receiver
    /// and an opaque token to pass to `unsubscribe`.
    pub fn subscribe_changed(&self) -> (mpsc::Receiver<ChangeSignal>, u64) {
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        let mut subscribers = self.inner.change_subscribers.lock().unwrap();
        let mut next_id = self.inner.next_subscriber_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        subscribers.insert(id, tx);
        (rx, id)
    }

    /// Unsubscribes and closes the channel identified by `token`.
    pub fn unsubscribe(&self, token: u64) {
        self.inner.change_subscribers.lock().unwrap().remove(&token);
    }

    /// A future that resolves once this object is reported closed by the
    /// engine (or the session terminates).
    pub async fn closed(&self) {
        if *self.inner.closed.lock().unwrap() {
            return;
        }
        self.inner.closed_notify.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.lock().unwrap()
    }

    /// Number of change signals dropped because a subscriber's channel was
    /// full at delivery time. Observable counterpart to the best-effort
    /// delivery in `signal_changed`.
    pub fn dropped_changes(&self) -> u64 {
        self.inner.dropped_changes.load(Ordering::Relaxed)
    }

    /// Delivers a change signal to every subscriber. Producer holds this
    /// object's subscriber-map mutex while pushing; callers must invoke this
    /// outside any registry lock.
    fn signal_changed(&self) {
        let subscribers = self.inner.change_subscribers.lock().unwrap();
        for tx in subscribers.values() {
            // try_send keeps the lock scope free of await. A full channel
            // means a subscriber isn't draining; we deliver best-effort
            // rather than block the whole registry on its behalf, but the
            // drop is counted so a caller can detect it.
            if tx.try_send(()).is_err() {
                self.inner.dropped_changes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Fires the closed-latch exactly once and closes every subscriber
    /// channel.
    fn signal_closed(&self) {
        let mut closed = self.inner.closed.lock().unwrap();
        if *closed {
            return;
        }
        *closed = true;
        drop(closed);
        self.inner.change_subscribers.lock().unwrap().clear();
        self.inner.closed_notify.notify_waiters();
    }
}

/// Tracks every live remote object by handle. One instance per session.
#[derive(Default)]
pub struct RemoteObjectRegistry {
    objects: Mutex<HashMap<Handle, RemoteObject>>,
}

impl RemoteObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing object for this handle, or creates and
    /// registers a new one. Idempotent in the handle.
    pub fn get_or_create(&self, interface: ObjectInterface) -> RemoteObject {
        let mut objects = self.objects.lock().unwrap();
        objects
            .entry(interface.handle)
            .or_insert_with(|| RemoteObject::new(interface))
            .clone()
    }

    pub fn get(&self, handle: Handle) -> Option<RemoteObject> {
        self.objects.lock().unwrap().get(&handle).cloned()
    }

    pub fn remove(&self, handle: Handle) -> Option<RemoteObject> {
        self.objects.lock().unwrap().remove(&handle)
    }

    /// For each handle in `changed` that is currently registered, signals
    /// its change-subscribers; for each handle in `closed`, removes it and
    /// fires its closed-latch. Signals are delivered outside the registry
    /// lock to avoid lock-order cycles with subscribers' locks.
    pub fn apply_updates(&self, changed: &[Handle], closed: &[Handle]) {
        let (changed_objects, closed_objects) = {
            let mut objects = self.objects.lock().unwrap();
            let changed_objects: Vec<RemoteObject> = changed
                .iter()
                .filter_map(|h| objects.get(h).cloned())
                .collect();
            let closed_objects: Vec<RemoteObject> =
                closed.iter().filter_map(|h| objects.remove(h)).collect();
            (changed_objects, closed_objects)
        };

        for object in &changed_objects {
            object.signal_changed();
        }
        for object in &closed_objects {
            object.signal_closed();
        }
    }

    /// Fires the closed-latch on every registered object and clears the
    /// map. Called on session termination.
    pub fn close_all(&self) {
        let drained: Vec<RemoteObject> = {
            let mut objects = self.objects.lock().unwrap();
            objects.drain().map(|(_, v)| v).collect()
        };
        for object in drained {
            object.signal_closed();
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
