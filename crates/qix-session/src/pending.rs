//! Pending-call registry: assigns request ids, parks callers, and delivers
//! responses. Grounded on `pending_call_registry.go`, rendered with
//! `tokio::sync::oneshot` in place of the original's buffered `Done` channel
//! (a oneshot is naturally single-resolution, so every pending call resolves
//! exactly once without needing an explicit capacity).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::context::Context;
use crate::error::Error;
use crate::protocol::{IncomingFrame, RequestId};

/// The payload a resolved call delivers to its waiter: the decoded frame
/// plus the receive-side facts `invoke`'s metrics need and can't observe
/// itself (the reader task is what actually touched the socket).
#[derive(Debug)]
pub struct CallResult {
    pub frame: IncomingFrame,
    pub received_at: Instant,
    pub message_bytes: usize,
}

type ResolveResult = Result<CallResult, Error>;

/// A registered, as-yet-unresolved invocation.
pub struct PendingCall {
    pub id: RequestId,
    resolver: Option<oneshot::Sender<ResolveResult>>,
}

impl PendingCall {
    /// Resolves the call. A no-op if already resolved: only the registry
    /// holds the sender, and it removes the entry before handing out the
    /// sender here, so double-resolution can't happen.
    pub fn resolve(mut self, result: ResolveResult) {
        if let Some(tx) = self.resolver.take() {
            let _ = tx.send(result);
        }
    }
}

struct Inner {
    next_id: AtomicU64,
    calls: Mutex<HashMap<RequestId, oneshot::Sender<ResolveResult>>>,
    terminal_error: Mutex<Option<Error>>,
}

/// Tracks every in-flight call by id. One instance per session.
pub struct PendingCallRegistry {
    inner: Inner,
}

impl Default for PendingCallRegistry {
    fn default() -> Self {
        Self {
            inner: Inner {
                next_id: AtomicU64::new(0),
                calls: Mutex::new(HashMap::new()),
                terminal_error: Mutex::new(None),
            },
        }
    }
}

impl PendingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically increments and returns the next id, without registering
    /// anything. Used for out-of-band frames like `CancelRequest`.
    pub fn next_id(&self) -> RequestId {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Takes an id now and returns a derived context carrying it, so a
    /// caller can tell a different endpoint which id to expect before the
    /// matching `register` call is made.
    pub fn reserve(&self, ctx: Context) -> (Context, RequestId) {
        let id = self.next_id();
        (ctx.with_reserved_id(id), id)
    }

    /// Registers a new pending call, using the context's reserved id if
    /// present, otherwise allocating a fresh one. Fails if the registry has
    /// already reached a terminal state.
    pub fn register(&self, ctx: &Context) -> Result<(RequestId, oneshot::Receiver<ResolveResult>), Error> {
        let terminal = self.inner.terminal_error.lock().unwrap();
        if let Some(err) = terminal.as_ref() {
            return Err(err.clone());
        }
        let id = ctx.reserved_id().unwrap_or_else(|| self.next_id());
        let (tx, rx) = oneshot::channel();
        self.inner.calls.lock().unwrap().insert(id, tx);
        drop(terminal);
        Ok((id, rx))
    }

    /// Removes and returns the pending call for `id`, if one is registered.
    /// Returns `None` for a spurious or already-resolved id; the caller
    /// still dispatches the frame's status lists.
    pub fn complete(&self, id: RequestId) -> Option<PendingCall> {
        let tx = self.inner.calls.lock().unwrap().remove(&id)?;
        Some(PendingCall {
            id,
            resolver: Some(tx),
        })
    }

    /// Removes the pending call for `id` without resolving it — used by the
    /// cancellation path, which resolves the caller's future directly
    /// instead of routing through a synthetic frame.
    pub fn remove(&self, id: RequestId) -> bool {
        self.inner.calls.lock().unwrap().remove(&id).is_some()
    }

    /// Resolves every currently pending call with `err` and marks the
    /// registry terminal: subsequent `register` calls fail immediately.
    pub fn fail_all(&self, err: Error) {
        let mut terminal = self.inner.terminal_error.lock().unwrap();
        *terminal = Some(err.clone());
        let calls = std::mem::take(&mut *self.inner.calls.lock().unwrap());
        drop(terminal);
        for (_, tx) in calls {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Resolves a single pending call with an error, without affecting the
    /// terminal state.
    pub fn fail(&self, id: RequestId, err: Error) {
        if let Some(tx) = self.inner.calls.lock().unwrap().remove(&id) {
            let _ = tx.send(Err(err));
        }
    }

    /// Number of currently pending calls. For test assertions.
    pub fn count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }
}
