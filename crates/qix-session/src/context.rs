//! A small stand-in for the Go source's `context.Context`: cancellation plus
//! a typed extension slot for the handful of values the RPC boundary needs
//! to carry (`reserveId`, a metrics collector, a change-list sink).
//!
//! Rust has no ambient ctx-passing convention, so this crate threads an
//! explicit `Context` value through `invoke`, mirroring `pending_call_registry.go`'s
//! `reservedRequestIDKey`, `metrics_collector.go`'s `metricsCollectorID`, and
//! `session.go`'s `ChangeListsKey` — three independent `context.WithValue`
//! attachments in the original, folded here into one small struct since Rust
//! extension maps buy nothing a few `Option` fields don't.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::protocol::{ChangeLists, RequestId};

/// Per-call context: cancellation plus optional reserved id / metrics /
/// change-list sink attachments.
#[derive(Clone, Default)]
pub struct Context {
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
    reserved_id: Option<RequestId>,
    metrics: Option<Arc<MetricsCollector>>,
    change_sink: Option<Arc<Mutex<ChangeLists>>>,
}

impl Context {
    /// A context with no cancellation, deadline, or attachments.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a child context that is cancelled when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns a child context with a fixed deadline from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Attaches a reserved request id so the next `register` call uses it
    /// instead of allocating a fresh one. See `PendingCallRegistry::reserve`.
    pub(crate) fn with_reserved_id(mut self, id: RequestId) -> Self {
        self.reserved_id = Some(id);
        self
    }

    pub(crate) fn reserved_id(&self) -> Option<RequestId> {
        self.reserved_id
    }

    /// Attaches a metrics collector that `invoke` will populate before
    /// returning.
    pub fn with_metrics_collector(mut self) -> (Self, Arc<MetricsCollector>) {
        let collector = Arc::new(MetricsCollector::default());
        self.metrics = Some(collector.clone());
        (self, collector)
    }

    pub(crate) fn metrics_collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Attaches a change-list sink that `invoke` populates with the
    /// handles its own response reported changed/closed, before the
    /// waiter is released.
    pub fn with_change_list_sink(mut self) -> (Self, Arc<Mutex<ChangeLists>>) {
        let sink = Arc::new(Mutex::new(ChangeLists::default()));
        self.change_sink = Some(sink.clone());
        (self, sink)
    }

    pub(crate) fn change_list_sink(&self) -> Option<&Arc<Mutex<ChangeLists>>> {
        self.change_sink.as_ref()
    }

    /// Waits until either the cancellation token fires or the deadline
    /// elapses, whichever is sooner. Never returns if neither is set.
    pub(crate) async fn cancelled(&self) {
        match (&self.cancellation, self.deadline) {
            (Some(token), Some(deadline)) => {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            (Some(token), None) => token.cancelled().await,
            (None, Some(deadline)) => tokio::time::sleep_until(deadline.into()).await,
            (None, None) => std::future::pending::<()>().await,
        }
    }

    pub(crate) fn is_deadline_exceeded(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }
}

/// Timestamps and byte sizes for a single invocation, populated by the
/// session's `invoke` terminal step when attached via `Context::with_metrics_collector`.
#[derive(Debug, Default)]
pub struct InvocationMetrics {
    pub invocation_at: Option<Instant>,
    pub socket_write_at: Option<Instant>,
    pub socket_read_at: Option<Instant>,
    pub invocation_return_at: Option<Instant>,
    pub request_bytes: usize,
    pub response_bytes: usize,
}

impl std::fmt::Display for InvocationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let on_air = match (self.socket_write_at, self.socket_read_at) {
            (Some(w), Some(r)) => r.saturating_duration_since(w),
            _ => Duration::ZERO,
        };
        let total = match (self.invocation_at, self.invocation_return_at) {
            (Some(s), Some(e)) => e.saturating_duration_since(s),
            _ => Duration::ZERO,
        };
        write!(f, "On air time: {on_air:?}, Total time: {total:?}")
    }
}

/// Shared handle to an in-flight invocation's metrics.
#[derive(Default)]
pub struct MetricsCollector {
    inner: Mutex<InvocationMetrics>,
}

impl MetricsCollector {
    pub(crate) fn update(&self, f: impl FnOnce(&mut InvocationMetrics)) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    /// Snapshots the metrics recorded so far for this invocation.
    pub fn metrics(&self) -> InvocationMetrics {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        InvocationMetrics {
            invocation_at: guard.invocation_at,
            socket_write_at: guard.socket_write_at,
            socket_read_at: guard.socket_read_at,
            invocation_return_at: guard.invocation_return_at,
            request_bytes: guard.request_bytes,
            response_bytes: guard.response_bytes,
        }
    }
}
