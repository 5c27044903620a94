use esp_core::SessionId;
use esp_transport::TransportError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the RPC layer
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("Unknown method {0}")]
    UnknownMethod(String),

    #[error("handler for {method} failed: {reason}")]
    HandlerFailure { method: String, reason: String },

    #[error("call to {method} on session {session} timed out after {timeout:?}")]
    Timeout {
        method: String,
        session: SessionId,
        timeout: Duration,
    },

    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Error returned by a method handler
///
/// Any error type converts into it with `?`, and plain strings convert with
/// `.into()`. The text ends up in the `data` field of the `-32603` reply.
pub type MethodError = Box<dyn std::error::Error + Send + Sync>;
