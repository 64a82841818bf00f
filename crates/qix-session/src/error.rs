//! Error taxonomy for the session runtime.
//!
//! Mirrors the shape of `qlik-oss/enigma-go`'s `error.go` `Error` interface
//! (`.Code()`, `.Parameter()`, `.Message()`) while following this crate's
//! house style of one `thiserror` enum at the boundary, the way `codex`'s
//! `CodexError` and `McpError` are each a single flat enum.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::RpcError;

/// Errors surfaced by the session runtime to callers.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Socket read/write failure, unexpected EOF, or handshake failure.
    /// Terminal for the session: triggers `failAll` and `TERMINATED`.
    #[error("transport error: {0}")]
    Transport(String),

    /// The context's deadline elapsed before the call resolved. Also used
    /// for network-level timeouts raised while connecting.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller's context was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The session had already reached a terminal state when the call was
    /// attempted, or it reached one while the call was in flight.
    #[error("session closed")]
    SessionClosed,

    /// Server-originated error, preserved verbatim.
    #[error("{0}")]
    Engine(EngineError),

    /// A frame could not be parsed, or was missing required fields.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::SessionClosed)
    }
}

/// Structured engine-originated error, carrying the same three fields as
/// the original's `qixError`: code, parameter, message. `symbol` is an
/// optional human-readable decoration from an external code-to-symbol
/// table (out of scope for this crate; callers may set it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: i64,
    pub parameter: String,
    pub message: String,
    pub symbol: Option<String>,
}

impl EngineError {
    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RpcError> for EngineError {
    fn from(raw: RpcError) -> Self {
        Self {
            code: raw.code,
            parameter: raw.parameter,
            message: raw.message,
            symbol: None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(
                f,
                "{}: {} ({}, {})",
                self.parameter, self.message, self.code, symbol
            ),
            None => write!(f, "{}: {} ({})", self.parameter, self.message, self.code),
        }
    }
}

impl std::error::Error for EngineError {}

/// Errors specific to establishing the socket during `Session::connect`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("socket factory failed: {0}")]
    Factory(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ConnectError> for Error {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Factory(msg) => Error::Transport(msg),
            ConnectError::Timeout(_) => Error::DeadlineExceeded,
        }
    }
}
