//! Error types for the MCP runtime.
//!
//! Uses `thiserror` for structured error handling with automatic `From`
//! implementations. Server handler faults ([`HandlerError`]) are fenced at
//! the dispatcher boundary and become JSON-RPC errors; client-side faults
//! ([`ClientError`]) stay local and never cross the wire.

use std::time::Duration;

use serde_json::Value;

use crate::protocol::{CodecError, RpcError, codes};

/// Errors surfaced to callers of the client API.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// Network, pipe, or framing failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP-level failure from the underlying client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Pipe or process I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The local deadline fired before a response arrived.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The transport was closed, voluntarily or by peer exit.
    #[error("transport closed")]
    Closed,

    /// The peer violated the protocol (bad handshake, stream ended early).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with a JSON-RPC error.
    #[error("server error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl ClientError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// True when the failure is local (never reached or left the peer).
    #[must_use]
    pub const fn is_local(&self) -> bool {
        !matches!(self, Self::Rpc { .. })
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The JSON-RPC error code, when the peer reported one.
    #[must_use]
    pub const fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        Self::Rpc { code: err.code, message: err.message, data: err.data }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by tool, resource, and prompt handlers. The dispatcher
/// maps these to JSON-RPC errors; they never unwind past it.
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    /// Input failed validation against the declared shape.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal handler fault.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The JSON-RPC error this fault maps to at the dispatch boundary.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::InvalidParams(detail) => RpcError::invalid_params(detail),
            Self::Serialization(err) => {
                RpcError::new(codes::INVALID_PARAMS, format!("Invalid params: {err}"))
            }
            Self::Internal(reason) => RpcError::internal(reason.clone()),
        }
    }
}

/// Result type alias for handler implementations.
pub type HandlerResult<T> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_predicates() {
        assert!(ClientError::Timeout(Duration::from_millis(100)).is_timeout());
        assert!(ClientError::Timeout(Duration::from_millis(100)).is_local());
        assert!(ClientError::Closed.is_local());

        let rpc = ClientError::from(RpcError::method_not_found("nope"));
        assert!(!rpc.is_local());
        assert_eq!(rpc.rpc_code(), Some(codes::METHOD_NOT_FOUND));
    }

    #[test]
    fn test_handler_error_mapping() {
        let err = HandlerError::invalid_params("missing 'name'");
        assert_eq!(err.to_rpc_error().code, codes::INVALID_PARAMS);

        let err = HandlerError::internal("disk on fire");
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, codes::INTERNAL_ERROR);
        assert_eq!(rpc.data, Some(Value::String("disk on fire".into())));
    }
}
