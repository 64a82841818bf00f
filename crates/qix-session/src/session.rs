//! The session: owns the socket, the reader/writer tasks, and every
//! registry/bus a call or notification touches. Grounded on `session.go`'s
//! `session` struct and its `mainSessionLoop`/`handleResponse`/`invokeRPC`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::changelist::ChangeListBus;
use crate::context::Context;
use crate::error::{EngineError, Error};
use crate::interceptor::{build_chain, BoxFuture, Continuation};
use crate::notifications::NotificationBus;
use crate::pending::{CallResult, PendingCallRegistry};
use crate::protocol::{
    ChangeLists, Handle, IncomingFrame, Invocation, ObjectInterface, OutgoingFrame, FrameKind,
    METHOD_CANCEL_REQUEST, ROOT_HANDLE, TOPIC_ON_CONNECTED,
};
use crate::registry::{RemoteObject, RemoteObjectRegistry};
use crate::socket::{Dialer, Frame, SocketCloser, SocketReader, SocketWriter, TrafficLogger};

/// Depth of the outgoing-frame queue between `invoke` callers and the
/// writer task, matching the original's buffered `outgoingMessages` channel.
const OUTGOING_QUEUE_CAPACITY: usize = 50;

/// Lifecycle of a session, observable via `state()`/`disconnected()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl SessionState {
    fn is_terminal(self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }
}

/// The session: one instance per connected engine document session.
pub struct Session {
    pending: Arc<PendingCallRegistry>,
    objects: Arc<RemoteObjectRegistry>,
    notifications: Arc<NotificationBus>,
    change_lists: Arc<ChangeListBus>,
    outgoing_tx: mpsc::Sender<Frame>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    chain: Continuation,
    traffic_logger: Option<Arc<dyn TrafficLogger>>,
    closer: Mutex<Option<Arc<dyn SocketCloser>>>,
    outgoing_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    dialer: Dialer,
}

impl Session {
    /// Builds a session around `dialer`'s interceptors, logger, and
    /// transport settings, but does not connect it yet — see `connect`.
    pub fn new(dialer: Dialer) -> Arc<Self> {
        let pending = Arc::new(PendingCallRegistry::new());
        let objects = Arc::new(RemoteObjectRegistry::new());
        let notifications = Arc::new(NotificationBus::new());
        let change_lists = Arc::new(ChangeListBus::new());
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Init);
        let traffic_logger = dialer.traffic_logger.clone();

        let chain = build_chain(&dialer.interceptors, terminal_invoker(
            pending.clone(),
            outgoing_tx.clone(),
            traffic_logger.clone(),
            state_rx.clone(),
        ));

        Arc::new(Session {
            pending,
            objects,
            notifications,
            change_lists,
            outgoing_tx,
            state_tx,
            state_rx,
            chain,
            traffic_logger,
            closer: Mutex::new(None),
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            dialer,
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Resolves once the session reaches a terminal state.
    pub async fn disconnected(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            if rx.borrow().is_terminal() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Connects the session's socket via the dialer's `socket_factory` (or
    /// the default `tokio-tungstenite` factory, or a mock factory when
    /// `mock_mode` is set) and spawns the reader/writer tasks.
    pub async fn connect(
        self: &Arc<Self>,
        ctx: Context,
        url: String,
        headers: HashMap<String, String>,
    ) -> Result<RemoteObject, Error> {
        if self.state() != SessionState::Init {
            return Err(Error::Protocol("connect called more than once".into()));
        }
        if let Err(e) = url::Url::parse(&url) {
            return Err(Error::Transport(format!("invalid url {url:?}: {e}")));
        }
        let _ = self.state_tx.send(SessionState::Connecting);

        let factory = if self.dialer.mock_mode {
            crate::mock::mock_socket_factory(self.dialer.traffic_dump_file.clone())
        } else if let Some(factory) = self.dialer.socket_factory.clone() {
            factory
        } else {
            #[cfg(feature = "websocket")]
            {
                crate::socket::default_socket_factory()
            }
            #[cfg(not(feature = "websocket"))]
            {
                let _ = self.state_tx.send(SessionState::Failed);
                return Err(Error::Transport(
                    "no socket_factory configured and the websocket feature is disabled".into(),
                ));
            }
        };

        let connect_future = factory(url, headers);
        let connected = tokio::select! {
            _ = ctx.cancelled() => {
                let _ = self.state_tx.send(SessionState::Failed);
                return Err(if ctx.is_deadline_exceeded() { Error::DeadlineExceeded } else { Error::Cancelled });
            }
            result = connect_future => result.map_err(Error::from).inspect_err(|_| {
                let _ = self.state_tx.send(SessionState::Failed);
            })?,
        };

        *self.closer.lock().unwrap() = Some(connected.closer.clone());
        let outgoing_rx = self
            .outgoing_rx
            .lock()
            .unwrap()
            .take()
            .expect("connect called more than once");

        if let Some(logger) = &self.traffic_logger {
            logger.opened();
        }

        let _ = self.state_tx.send(SessionState::Running);

        tokio::spawn(writer_task(connected.writer, outgoing_rx, self.clone()));
        tokio::spawn(reader_task(connected.reader, self.clone()));

        Ok(self.objects.get_or_create(ObjectInterface::root()))
    }

    /// Invokes a remote method through the interceptor chain, returning the
    /// raw `result` payload on success.
    pub async fn invoke(
        &self,
        ctx: Context,
        handle: Handle,
        method: impl Into<String>,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, Error> {
        let invocation = Invocation {
            handle,
            method: method.into(),
            params,
        };
        let frame = (self.chain)(ctx, invocation).await?;
        Ok(frame.result.unwrap_or(serde_json::Value::Null))
    }

    /// Returns the next request id, without registering a pending call for
    /// it, and a context carrying that id for a later `invoke`.
    pub fn reserve_id(&self, ctx: Context) -> (Context, crate::protocol::RequestId) {
        self.pending.reserve(ctx)
    }

    pub fn get_or_create_remote_object(&self, interface: ObjectInterface) -> RemoteObject {
        self.objects.get_or_create(interface)
    }

    /// Subscribes to session notifications. Empty `topics` (or `["*"]`)
    /// receives everything; a late subscriber is replayed full history.
    pub async fn subscribe_notifications(
        &self,
        topics: Vec<String>,
    ) -> mpsc::Receiver<crate::notifications::SessionNotification> {
        self.notifications.subscribe(topics).await
    }

    pub async fn subscribe_change_lists(&self, pushed_only: bool) -> (mpsc::Receiver<ChangeLists>, u64) {
        self.change_lists.subscribe(pushed_only).await
    }

    pub async fn unsubscribe_change_lists(&self, token: u64) {
        self.change_lists.unsubscribe(token).await
    }

    /// Subscribes to `OnConnected`, waits for the one notification it ever
    /// emits, and extracts `qSessionState`. Matches `SessionState(ctx)`.
    pub async fn session_state(&self, ctx: Context) -> Result<String, Error> {
        let mut rx = self.notifications.subscribe(vec![TOPIC_ON_CONNECTED.to_string()]).await;
        tokio::select! {
            _ = ctx.cancelled() => Err(if ctx.is_deadline_exceeded() { Error::DeadlineExceeded } else { Error::Cancelled }),
            notification = rx.recv() => {
                let notification = notification.ok_or(Error::SessionClosed)?;
                #[derive(serde::Deserialize)]
                struct OnConnected {
                    #[serde(rename = "qSessionState")]
                    q_session_state: String,
                }
                let payload: OnConnected = serde_json::from_value(notification.payload)
                    .map_err(|e| Error::Protocol(e.to_string()))?;
                Ok(payload.q_session_state)
            }
        }
    }

    /// Closes the socket and waits for the session to reach `TERMINATED`.
    /// Idempotent.
    pub async fn disconnect(&self) {
        if let Some(closer) = self.closer.lock().unwrap().clone() {
            let _ = closer.close().await;
        }
        self.disconnected().await;
    }

    fn begin_terminating(&self) {
        let _ = self.state_tx.send_if_modified(|state| {
            if state.is_terminal() || *state == SessionState::Terminating {
                false
            } else {
                *state = SessionState::Terminating;
                true
            }
        });
    }

    fn finish_terminating(&self, failed: bool) {
        let target = if failed { SessionState::Failed } else { SessionState::Terminated };
        let _ = self.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = target;
                true
            }
        });
    }
}

fn terminal_invoker(
    pending: Arc<PendingCallRegistry>,
    outgoing: mpsc::Sender<Frame>,
    traffic_logger: Option<Arc<dyn TrafficLogger>>,
    state: watch::Receiver<SessionState>,
) -> Continuation {
    Arc::new(move |ctx: Context, invocation: Invocation| {
        let pending = pending.clone();
        let outgoing = outgoing.clone();
        let traffic_logger = traffic_logger.clone();
        let state = state.clone();
        Box::pin(invoke_rpc(ctx, invocation, pending, outgoing, traffic_logger, state)) as BoxFuture<'static, _>
    })
}

async fn invoke_rpc(
    ctx: Context,
    invocation: Invocation,
    pending: Arc<PendingCallRegistry>,
    outgoing: mpsc::Sender<Frame>,
    traffic_logger: Option<Arc<dyn TrafficLogger>>,
    state: watch::Receiver<SessionState>,
) -> Result<IncomingFrame, Error> {
    let invocation_at = Instant::now();
    if let Some(collector) = ctx.metrics_collector() {
        collector.update(|m| m.invocation_at = Some(invocation_at));
    }

    if state.borrow().is_terminal() {
        if let Some(collector) = ctx.metrics_collector() {
            collector.update(|m| {
                m.socket_write_at = Some(invocation_at);
                m.socket_read_at = Some(invocation_at);
                m.invocation_return_at = Some(invocation_at);
            });
        }
        return Err(Error::SessionClosed);
    }

    let (id, rx) = pending.register(&ctx)?;
    let frame = OutgoingFrame::new(invocation.handle, id, invocation.method, invocation.params);
    let bytes = frame.encode().map_err(|e| Error::Protocol(e.to_string()))?;
    let request_bytes = bytes.len();

    if let Some(logger) = &traffic_logger {
        logger.sent(&bytes);
    }

    let write_at = Instant::now();
    if outgoing.send(bytes).await.is_err() {
        pending.remove(id);
        return Err(Error::SessionClosed);
    }

    tokio::select! {
        biased;
        _ = ctx.cancelled() => {
            if pending.remove(id) {
                send_cancel_request(id, &pending, &outgoing, &traffic_logger);
            }
            Err(if ctx.is_deadline_exceeded() { Error::DeadlineExceeded } else { Error::Cancelled })
        }
        resolution = rx => {
            let invocation_return_at = Instant::now();
            match resolution {
                Ok(Ok(CallResult { frame, received_at, message_bytes })) => {
                    if let Some(collector) = ctx.metrics_collector() {
                        collector.update(|m| {
                            m.socket_write_at = Some(write_at);
                            m.socket_read_at = Some(received_at);
                            m.invocation_return_at = Some(invocation_return_at);
                            m.request_bytes = request_bytes;
                            m.response_bytes = message_bytes;
                        });
                    }
                    if let Some(rpc_error) = frame.error.clone() {
                        Err(Error::Engine(EngineError::from(rpc_error)))
                    } else {
                        if let Some(sink) = ctx.change_list_sink() {
                            *sink.lock().unwrap() = ChangeLists::from_frame(&frame);
                        }
                        Ok(frame)
                    }
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::SessionClosed),
            }
        }
    }
}

/// Fires a best-effort `CancelRequest` for `id`. Matches `sendCancelRequest`:
/// out of band, fire-and-forget, never awaits its own response.
fn send_cancel_request(
    id: crate::protocol::RequestId,
    pending: &PendingCallRegistry,
    outgoing: &mpsc::Sender<Frame>,
    traffic_logger: &Option<Arc<dyn TrafficLogger>>,
) {
    let cancel_id = pending.next_id();
    let frame = OutgoingFrame::new(ROOT_HANDLE, cancel_id, METHOD_CANCEL_REQUEST, vec![serde_json::json!(id)]);
    if let Ok(bytes) = frame.encode() {
        if let Some(logger) = traffic_logger {
            logger.sent(&bytes);
        }
        let _ = outgoing.try_send(bytes);
    }
}

async fn writer_task(mut writer: Box<dyn SocketWriter>, mut outgoing_rx: mpsc::Receiver<Frame>, session: Arc<Session>) {
    while let Some(frame) = outgoing_rx.recv().await {
        if let Err(e) = writer.write(frame).await {
            warn!(error = %e, "socket write failed, terminating session");
            terminate(&session, true).await;
            return;
        }
    }
}

async fn reader_task(mut reader: Box<dyn SocketReader>, session: Arc<Session>) {
    loop {
        match reader.read().await {
            Ok(bytes) => {
                let received_at = Instant::now();
                if let Some(logger) = &session.traffic_logger {
                    logger.received(&bytes);
                }
                handle_response(&session, &bytes, received_at).await;
            }
            Err(e) => {
                debug!(error = %e, "socket read ended");
                terminate(&session, true).await;
                return;
            }
        }
    }
}

async fn handle_response(session: &Arc<Session>, bytes: &[u8], received_at: Instant) {
    let frame: IncomingFrame = match serde_json::from_slice(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "malformed frame dropped");
            return;
        }
    };

    match frame.classify() {
        FrameKind::Notification { method, params } => {
            session.notifications.publish(method.to_string(), params).await;
        }
        FrameKind::Response(_) => {
            let id = frame.id;
            let pending_call = id.and_then(|id| session.pending.complete(id));
            // Ordering within one response frame: bus broadcast, then the
            // pending-call waiter is released, then per-object registry
            // updates — a waiter that immediately asks for its own change
            // list after `invoke` returns never races this emission, and
            // the registry update runs only after the caller has already
            // observed the result.
            session
                .change_lists
                .emit(&frame.change, &frame.close, pending_call.is_none())
                .await;
            let changed = frame.change.clone();
            let closed = frame.close.clone();
            if let Some(pending_call) = pending_call {
                pending_call.resolve(Ok(CallResult {
                    message_bytes: bytes.len(),
                    received_at,
                    frame,
                }));
            }
            session.objects.apply_updates(&changed, &closed);
        }
    }
}

async fn terminate(session: &Arc<Session>, failed: bool) {
    session.begin_terminating();
    if let Some(logger) = &session.traffic_logger {
        logger.closed();
    }
    let closer = session.closer.lock().unwrap().clone();
    if let Some(closer) = closer {
        let _ = closer.close().await;
    }
    session.pending.fail_all(Error::Transport("session terminated".into()));
    session.objects.close_all();
    session.notifications.close_all().await;
    session.change_lists.close_all().await;
    session.finish_terminating(failed);
}
