//! Record/replay test transport: `MockSocket` plays back a recorded traffic
//! log in place of a live connection, and `FileTrafficLogger` records one.
//! Grounded on `websocket_mock.go` and `websocket_traffic_log.go`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ConnectError;
use crate::socket::{
    BoxFuture, ConnectedSocket, Frame, SocketCloser, SocketFactory, SocketReader, SocketWriter, TrafficLogger,
};

/// One row of a persisted traffic log: either a sent request or a received
/// message, tagged rather than unioned so the JSON stays human-legible.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficRecord {
    Sent(serde_json::Value),
    Received(serde_json::Value),
}

/// Re-serializes a frame with whitespace normalized, for comparing recorded
/// and live traffic independent of formatting.
fn canonicalize(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_default(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

struct ExpectedRequest {
    sent: serde_json::Value,
    responses: Vec<serde_json::Value>,
}

struct MockSocketShared {
    expected: Mutex<VecDeque<ExpectedRequest>>,
    received_tx: Mutex<Option<mpsc::UnboundedSender<serde_json::Value>>>,
}

impl MockSocketShared {
    fn send_received(&self, value: serde_json::Value) {
        if let Some(tx) = self.received_tx.lock().unwrap().as_ref() {
            let _ = tx.send(value);
        }
    }
}

/// A record/replay stand-in for a real transport. Requests written to it
/// are matched, in order, against recorded `Sent` rows; their associated
/// `Received` rows are queued as responses. Messages recorded before any
/// `Sent` row are delivered unprompted.
pub struct MockSocket {
    shared: Arc<MockSocketShared>,
    received_rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl MockSocket {
    /// An empty mock: every write is recorded as unmatched, nothing is ever
    /// read back unless fed with `push_received`.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(MockSocketShared {
                expected: Mutex::new(VecDeque::new()),
                received_tx: Mutex::new(Some(tx)),
            }),
            received_rx: rx,
        }
    }

    /// Builds a mock from a recorded traffic log, in the shape produced by
    /// `FileTrafficLogger`.
    pub fn from_log(records: Vec<TrafficRecord>) -> Self {
        let socket = Self::new();
        let mut pending: Option<usize> = None;
        let mut expected = socket.shared.expected.lock().unwrap();
        for record in records {
            match record {
                TrafficRecord::Sent(value) => {
                    expected.push_back(ExpectedRequest {
                        sent: value,
                        responses: Vec::new(),
                    });
                    pending = Some(expected.len() - 1);
                }
                TrafficRecord::Received(value) => match pending {
                    Some(idx) => expected[idx].responses.push(value),
                    None => socket.shared.send_received(value),
                },
            }
        }
        drop(expected);
        socket
    }

    /// Queues an expected request/response pair for an explicit scripted
    /// test, matching `ExpectCall`.
    pub fn expect_call(&self, request: serde_json::Value, response: serde_json::Value) {
        self.shared.expected.lock().unwrap().push_back(ExpectedRequest {
            sent: request,
            responses: vec![response],
        });
    }

    /// Pushes a message straight into the read queue, matching
    /// `AddReceivedMessage`.
    pub fn push_received(&self, message: serde_json::Value) {
        self.shared.send_received(message);
    }

    /// Splits into the writer/reader/closer triple a `SocketFactory` hands
    /// back, so a `MockSocket` can stand in for `default_socket_factory`'s
    /// output in tests.
    pub fn into_connected(self) -> ConnectedSocket {
        ConnectedSocket {
            writer: Box::new(MockSocketWriter {
                shared: self.shared.clone(),
            }),
            reader: Box::new(MockSocketReader {
                rx: self.received_rx,
            }),
            closer: Arc::new(MockSocketCloser { shared: self.shared }),
        }
    }
}

impl Default for MockSocket {
    fn default() -> Self {
        Self::new()
    }
}

/// A `SocketFactory` that ignores the dialed URL and headers entirely and
/// hands back a `MockSocket` built from the named traffic log (or an empty
/// one, if no log file is configured). Matches `Dialer::DialRaw`'s
/// `MockMode` branch.
pub fn mock_socket_factory(traffic_dump_file: Option<String>) -> SocketFactory {
    Arc::new(move |_url, _headers| {
        let traffic_dump_file = traffic_dump_file.clone();
        Box::pin(async move {
            let socket = match traffic_dump_file {
                Some(path) => {
                    let records = FileTrafficLogger::read_log(&path)
                        .map_err(|e| ConnectError::Factory(format!("reading traffic log {path}: {e}")))?;
                    MockSocket::from_log(records)
                }
                None => MockSocket::new(),
            };
            Ok(socket.into_connected())
        })
    })
}

struct MockSocketWriter {
    shared: Arc<MockSocketShared>,
}

impl SocketWriter for MockSocketWriter {
    fn write<'a>(&'a mut self, frame: Frame) -> BoxFuture<'a, Result<(), ConnectError>> {
        Box::pin(async move {
            let mut expected = self.shared.expected.lock().unwrap();
            match expected.pop_front() {
                Some(request) => {
                    let canonical_expected = serde_json::to_string(&request.sent).unwrap_or_default();
                    let canonical_actual = canonicalize(&frame);
                    if canonical_expected != canonical_actual {
                        warn!(expected = %canonical_expected, actual = %canonical_actual, "mock socket received unexpected request");
                    }
                    for response in request.responses {
                        self.shared.send_received(response);
                    }
                }
                None => warn!(request = %canonicalize(&frame), "mock socket has no more expected requests"),
            }
            Ok(())
        })
    }
}

struct MockSocketReader {
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl SocketReader for MockSocketReader {
    fn read<'a>(&'a mut self) -> BoxFuture<'a, Result<Frame, ConnectError>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(value) => Ok(serde_json::to_vec(&value).unwrap_or_default()),
                None => Err(ConnectError::Factory("mock socket closed".into())),
            }
        })
    }
}

struct MockSocketCloser {
    shared: Arc<MockSocketShared>,
}

impl SocketCloser for MockSocketCloser {
    /// Drops the shared sender half so the paired reader's `rx.recv()`
    /// resolves to `None` once its buffer drains, ending the reader task the
    /// same way a real closed connection would.
    fn close<'a>(&'a self) -> BoxFuture<'a, Result<(), ConnectError>> {
        Box::pin(async move {
            self.shared.expected.lock().unwrap().clear();
            *self.shared.received_tx.lock().unwrap() = None;
            Ok(())
        })
    }
}

/// Records every frame to an in-memory buffer and flushes it to disk as
/// indented JSON when `closed()` fires. Grounded on `fileTrafficLog`.
pub struct FileTrafficLogger {
    path: std::path::PathBuf,
    records: Mutex<Vec<TrafficRecord>>,
}

impl FileTrafficLogger {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(Vec::with_capacity(1000)),
        }
    }

    /// Loads a previously recorded log for replay.
    pub fn read_log(path: impl AsRef<std::path::Path>) -> std::io::Result<Vec<TrafficRecord>> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes).unwrap_or_default())
    }
}

impl TrafficLogger for FileTrafficLogger {
    fn sent(&self, frame: &[u8]) {
        if let Ok(value) = serde_json::from_slice(frame) {
            self.records.lock().unwrap().push(TrafficRecord::Sent(value));
        }
    }

    fn received(&self, frame: &[u8]) {
        if let Ok(value) = serde_json::from_slice(frame) {
            self.records.lock().unwrap().push(TrafficRecord::Received(value));
        }
    }

    fn closed(&self) {
        let records = self.records.lock().unwrap();
        if let Ok(file) = std::fs::File::create(&self.path) {
            let _ = serde_json::to_writer_pretty(file, &*records);
        }
    }
}
