use std::io;

use thiserror::Error;

pub type DapResult<T> = std::result::Result<T, DapError>;

/// Error taxonomy for the debug-protocol client.
///
/// Transport errors (`Io`, `Timeout` on connect, `ConnectionClosed`) are fatal
/// to the session and require an explicit reconnect. `Request` failures are
/// scoped to a single call. Framing errors never surface here — the codec
/// recovers from them internally.
#[derive(Debug, Error)]
pub enum DapError {
    #[error("debug client is not connected")]
    NotConnected,
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("operation cancelled")]
    Cancelled,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("`{command}` failed: {message}")]
    Request { command: String, message: String },
    #[error("no stack frame at index {0}")]
    UnknownFrame(usize),
    #[error("no active thread")]
    NoActiveThread,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
