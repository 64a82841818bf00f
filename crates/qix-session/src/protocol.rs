//! Wire framing for the JSON-RPC 2.0 protocol carried over the session socket.
//!
//! An outgoing frame is always a request: `{jsonrpc, delta, method, handle,
//! id, params}`. An incoming frame is a union of three overlapping shapes
//! (response, notification, status lists) that the engine may combine in a
//! single JSON object, so it is decoded into one struct with optional fields
//! rather than a tagged enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Integer identifier of a remote object. `-1` is the root ("Global") handle.
pub type Handle = i64;

/// Handle of the implicit root object every session starts with.
pub const ROOT_HANDLE: Handle = -1;

/// Monotonically increasing JSON-RPC request id.
pub type RequestId = u64;

/// Immutable description of a remote object as returned by the engine the
/// first time a handle is observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInterface {
    pub handle: Handle,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(rename = "genericId", default)]
    pub generic_id: String,
}

impl ObjectInterface {
    /// The well-known root object interface.
    pub fn root() -> Self {
        Self {
            handle: ROOT_HANDLE,
            object_type: "Global".to_string(),
            generic_id: String::new(),
        }
    }
}

/// A single outgoing JSON-RPC request frame.
#[derive(Debug, Serialize)]
pub struct OutgoingFrame {
    pub jsonrpc: &'static str,
    pub delta: bool,
    pub method: String,
    pub handle: Handle,
    pub id: RequestId,
    pub params: Vec<Value>,
}

impl OutgoingFrame {
    pub fn new(handle: Handle, id: RequestId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            delta: false,
            method: method.into(),
            handle,
            id,
            params,
        }
    }

    /// Serializes the frame with HTML-escaping disabled so engine expression
    /// syntax (e.g. `a < b`) survives byte-exact, and strips any trailing
    /// newline `serde_json` may add via a pretty writer. `serde_json::to_vec`
    /// never HTML-escapes and never emits a trailing newline, so both
    /// properties hold by construction; the explicit trim below guards
    /// against a future switch to a writer that does.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        Ok(bytes)
    }
}

/// A structured error returned by the engine for a failed call.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub parameter: String,
    #[serde(default)]
    pub message: String,
}

/// Raw incoming frame. Every field is optional because the wire format
/// overlaps response, notification, and status-list shapes in one object;
/// see `classify` for the discrimination rule.
#[derive(Debug, Deserialize)]
pub struct IncomingFrame {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub change: Vec<Handle>,
    #[serde(default)]
    pub close: Vec<Handle>,
    #[serde(default)]
    pub suspend: Vec<Handle>,
}

/// The two shapes an incoming frame can be classified as, independent of
/// its status lists (those are always dispatched regardless of shape).
#[derive(Debug)]
pub enum FrameKind<'a> {
    /// `method` present and non-empty: a server-initiated notification.
    Notification { method: &'a str, params: Value },
    /// Otherwise: a response, routed by `id` (absent id is a pushed,
    /// standalone status frame with no pending call to resolve).
    Response(&'a IncomingFrame),
}

impl IncomingFrame {
    pub fn classify(&self) -> FrameKind<'_> {
        match &self.method {
            Some(method) if !method.is_empty() => FrameKind::Notification {
                method,
                params: self.params.clone().unwrap_or(Value::Null),
            },
            _ => FrameKind::Response(self),
        }
    }

    pub fn has_status(&self) -> bool {
        !self.change.is_empty() || !self.close.is_empty() || !self.suspend.is_empty()
    }
}

/// Changed/closed/suspended handle lists extracted from a single frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeLists {
    pub changed: Vec<Handle>,
    pub closed: Vec<Handle>,
    pub suspended: Vec<Handle>,
}

impl ChangeLists {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.closed.is_empty() && self.suspended.is_empty()
    }

    pub fn from_frame(frame: &IncomingFrame) -> Self {
        Self {
            changed: frame.change.clone(),
            closed: frame.close.clone(),
            suspended: frame.suspend.clone(),
        }
    }
}

/// An invocation targeted at a remote handle, as framed on the wire.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub handle: Handle,
    pub method: String,
    pub params: Vec<Value>,
}

/// JSON-RPC method name used for the out-of-band best-effort cancel.
pub const METHOD_CANCEL_REQUEST: &str = "CancelRequest";

/// Topic of the one-shot notification carrying the session state.
pub const TOPIC_ON_CONNECTED: &str = "OnConnected";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_frame_always_encodes_params_as_array() {
        let frame = OutgoingFrame::new(ROOT_HANDLE, 1, "OpenDoc", vec![]);
        let encoded = frame.encode().unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["params"], serde_json::json!([]));
        assert_eq!(value["handle"], serde_json::json!(-1));
        assert_eq!(value["delta"], serde_json::json!(false));
    }

    #[test]
    fn outgoing_frame_has_no_trailing_newline() {
        let frame = OutgoingFrame::new(1, 4, "GetLayout", vec![]);
        let encoded = frame.encode().unwrap();
        assert_ne!(encoded.last(), Some(&b'\n'));
    }

    #[test]
    fn classifies_notification_by_nonempty_method() {
        let raw = r#"{"jsonrpc":"2.0","method":"OnConnected","params":{"qSessionState":"SESSION_CREATED"}}"#;
        let frame: IncomingFrame = serde_json::from_str(raw).unwrap();
        match frame.classify() {
            FrameKind::Notification { method, .. } => assert_eq!(method, "OnConnected"),
            FrameKind::Response(_) => panic!("expected notification"),
        }
    }

    #[test]
    fn classifies_response_by_id_presence() {
        let raw = r#"{"jsonrpc":"2.0","id":4,"error":{"code":123,"parameter":"param","message":"mes"}}"#;
        let frame: IncomingFrame = serde_json::from_str(raw).unwrap();
        match frame.classify() {
            FrameKind::Response(f) => assert_eq!(f.id, Some(4)),
            FrameKind::Notification { .. } => panic!("expected response"),
        }
    }

    #[test]
    fn pushed_status_frame_has_no_id() {
        let raw = r#"{"jsonrpc":"2.0","change":[7],"close":[8]}"#;
        let frame: IncomingFrame = serde_json::from_str(raw).unwrap();
        assert!(frame.id.is_none());
        assert!(frame.has_status());
        let lists = ChangeLists::from_frame(&frame);
        assert_eq!(lists.changed, vec![7]);
        assert_eq!(lists.closed, vec![8]);
    }
}
