//! Transport abstraction: the `SocketFactory` the session drives, plus
//! `Dialer`, the configuration struct collecting every option a caller can
//! set before connecting. Grounded on `dialer.go`'s `Dialer` struct and
//! `Socket`/`TrafficLogger` interfaces.
//!
//! The original's single `Socket` interface is split here into a writer
//! half, a reader half, and a closer: the session's reader and writer tasks
//! each need their own mutable handle so they can run concurrently, which a
//! single `&mut self` trait object can't give two tasks at once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConnectError;
use crate::interceptor::Interceptor;

/// A single outgoing or incoming frame as raw bytes.
pub type Frame = Vec<u8>;

/// A boxed, type-erased async result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait SocketWriter: Send {
    fn write<'a>(&'a mut self, frame: Frame) -> BoxFuture<'a, Result<(), ConnectError>>;
}

pub trait SocketReader: Send {
    fn read<'a>(&'a mut self) -> BoxFuture<'a, Result<Frame, ConnectError>>;
}

/// Closes the underlying transport. Shared between the reader and writer
/// halves so either side (or `disconnect()`) can trigger it.
pub trait SocketCloser: Send + Sync {
    fn close<'a>(&'a self) -> BoxFuture<'a, Result<(), ConnectError>>;
}

/// The three independent handles a factory hands back for one connection.
pub struct ConnectedSocket {
    pub writer: Box<dyn SocketWriter>,
    pub reader: Box<dyn SocketReader>,
    pub closer: Arc<dyn SocketCloser>,
}

/// Creates a connected socket for a given URL and header set. The caller
/// races this future against its own deadline/cancellation.
pub type SocketFactory = Arc<
    dyn Fn(String, HashMap<String, String>) -> BoxFuture<'static, Result<ConnectedSocket, ConnectError>>
        + Send
        + Sync,
>;

/// Receives frame-level callbacks for every socket lifecycle event.
/// Grounded on `TrafficLogger`.
pub trait TrafficLogger: Send + Sync {
    fn opened(&self) {}
    fn sent(&self, _frame: &[u8]) {}
    fn received(&self, _frame: &[u8]) {}
    fn closed(&self) {}
}

/// Configuration for establishing a session. Every field has a sensible
/// default; callers override only what they need.
#[derive(Clone, Default)]
pub struct Dialer {
    /// Overrides WebSocket creation entirely. When unset, the `websocket`
    /// feature's `tokio-tungstenite` factory is used.
    pub socket_factory: Option<SocketFactory>,
    /// Ordered list of interceptors wrapped around the terminal invoker,
    /// outermost first.
    pub interceptors: Vec<Interceptor>,
    /// Receives frame callbacks for every socket event. Mutually exclusive
    /// with `traffic_dump_file` in practice, mirroring the original.
    pub traffic_logger: Option<Arc<dyn TrafficLogger>>,
    /// When set, enables a file-backed traffic logger (live mode) or
    /// traffic source (mock mode).
    pub traffic_dump_file: Option<String>,
    /// When true, `socket_factory` is ignored and a `MockSocket` replaying
    /// `traffic_dump_file` is used instead.
    pub mock_mode: bool,
    /// Upper bound on how long `connect` waits for the factory to produce a
    /// socket before returning `DeadlineExceeded`.
    pub connect_timeout: Option<Duration>,
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("socket_factory", &self.socket_factory.is_some())
            .field("interceptors", &self.interceptors.len())
            .field("traffic_logger", &self.traffic_logger.is_some())
            .field("traffic_dump_file", &self.traffic_dump_file)
            .field("mock_mode", &self.mock_mode)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[cfg(feature = "websocket")]
mod default_factory {
    use super::*;
    use futures_util::stream::{SplitSink, SplitStream};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Default `tokio-tungstenite`-backed socket factory. Dialing races the
    /// connect future against the caller's cancellation, mirroring
    /// `setupDefaultDialer`'s goroutine-plus-select pattern; the stream is
    /// split so the reader and writer tasks each get an independent half.
    /// The sink half is additionally shared with the closer behind a
    /// `tokio::sync::Mutex` so `close()` can drive a real WebSocket close
    /// handshake, which unblocks the reader's `source.next()` the same way
    /// a peer-initiated close does.
    pub fn default_socket_factory() -> SocketFactory {
        Arc::new(|url, _headers| {
            Box::pin(async move {
                let (stream, _response) = tokio_tungstenite::connect_async(&url)
                    .await
                    .map_err(|e| ConnectError::Factory(e.to_string()))?;
                let (sink, source) = stream.split();
                let sink = Arc::new(tokio::sync::Mutex::new(sink));
                let closer: Arc<dyn SocketCloser> = Arc::new(TungsteniteCloser { sink: sink.clone() });
                Ok(ConnectedSocket {
                    writer: Box::new(TungsteniteWriter { sink }),
                    reader: Box::new(TungsteniteReader { source }),
                    closer,
                })
            })
        })
    }

    struct TungsteniteWriter {
        sink: Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>,
    }

    impl SocketWriter for TungsteniteWriter {
        fn write<'a>(&'a mut self, frame: Frame) -> BoxFuture<'a, Result<(), ConnectError>> {
            Box::pin(async move {
                self.sink
                    .lock()
                    .await
                    .send(Message::Binary(frame))
                    .await
                    .map_err(|e| ConnectError::Factory(e.to_string()))
            })
        }
    }

    struct TungsteniteReader {
        source: SplitStream<WsStream>,
    }

    impl SocketReader for TungsteniteReader {
        fn read<'a>(&'a mut self) -> BoxFuture<'a, Result<Frame, ConnectError>> {
            Box::pin(async move {
                loop {
                    match self.source.next().await {
                        Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                        Some(Ok(Message::Binary(bytes))) => return Ok(bytes),
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(ConnectError::Factory("socket closed by peer".into()))
                        }
                        Some(Err(e)) => return Err(ConnectError::Factory(e.to_string())),
                    }
                }
            })
        }
    }

    /// Drives the WebSocket close handshake on the shared sink half. Because
    /// the sink and source halves of a split stream share the same
    /// underlying connection, closing the sink terminates the source too:
    /// the reader's next `source.next()` observes a `Close` frame or stream
    /// end and returns, ending the reader task.
    struct TungsteniteCloser {
        sink: Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>,
    }

    impl SocketCloser for TungsteniteCloser {
        fn close<'a>(&'a self) -> BoxFuture<'a, Result<(), ConnectError>> {
            Box::pin(async move {
                self.sink
                    .lock()
                    .await
                    .close()
                    .await
                    .map_err(|e| ConnectError::Factory(e.to_string()))
            })
        }
    }
}

#[cfg(feature = "websocket")]
pub use default_factory::default_socket_factory;
