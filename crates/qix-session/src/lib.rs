#![forbid(unsafe_code)]
//! Async client runtime for the QIX Engine's JSON-RPC-over-WebSocket session
//! protocol.
//!
//! A [`Session`] owns one socket connection: it reserves request ids, parks
//! callers on [`PendingCallRegistry`], tracks live [`RemoteObject`] handles,
//! fans out [`SessionNotification`]s and [`ChangeLists`], and runs every call
//! through an [`InterceptorChain`]. Generated per-object client code (out of
//! scope for this crate) is expected to drive a `Session` through the
//! boundary described below; nothing here assumes a particular generated API
//! shape.
//!
//! ```text
//! invoke(ctx, handle, method, params) -> result | error
//! reserve_id(ctx) -> (ctx', id)
//! subscribe_notifications(topics) -> receiver
//! subscribe_change_lists(pushed_only) -> (receiver, token)
//! get_or_create_remote_object(interface) -> RemoteObject
//! disconnect(); disconnected() -> (resolves on termination)
//! Context::with_change_list_sink(ctx) -> (ctx', sink)
//! Context::with_metrics_collector(ctx) -> (ctx', collector)
//! ```
//!
//! Grounded throughout on `qlik-oss/enigma-go`'s `session.go` and its
//! supporting files; see `DESIGN.md` at the repository root for the full
//! grounding ledger.

mod changelist;
mod context;
mod error;
mod float;
mod interceptor;
pub mod mock;
mod notifications;
mod pending;
mod protocol;
mod registry;
mod session;
mod socket;

pub use changelist::ChangeListBus;
pub use context::{Context, InvocationMetrics, MetricsCollector};
pub use error::{ConnectError, EngineError, Error};
pub use float::Float64;
pub use interceptor::{BoxFuture, Continuation, Interceptor};
pub use notifications::{NotificationBus, SessionNotification};
pub use pending::{CallResult, PendingCall, PendingCallRegistry};
pub use protocol::{
    ChangeLists, FrameKind, Handle, IncomingFrame, Invocation, ObjectInterface, OutgoingFrame,
    RequestId, RpcError, METHOD_CANCEL_REQUEST, ROOT_HANDLE, TOPIC_ON_CONNECTED,
};
pub use registry::{ChangeSignal, RemoteObject, RemoteObjectRegistry};
pub use session::{Session, SessionState};
pub use socket::{ConnectedSocket, Dialer, Frame, SocketCloser, SocketFactory, SocketReader, SocketWriter, TrafficLogger};

#[cfg(feature = "websocket")]
pub use socket::default_socket_factory;
