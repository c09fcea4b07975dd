use thiserror::Error;

use crate::mcp::message::JsonRpcError;

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Error type for MCP operations
///
/// Variants that correspond to JSON-RPC error codes carry their wire
/// code via [`McpError::code`]; the remaining variants are local-only
/// and never cross the wire.
#[derive(Error, Debug, Clone)]
pub enum McpError {
    /// Malformed inbound frame
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Structurally valid JSON that is not a valid JSON-RPC envelope,
    /// or a request issued in the wrong state
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown method for this peer
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Parameters failed to decode
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Provider failure or other unexpected condition
    #[error("internal error: {0}")]
    Internal(String),

    /// Request received before the initialization handshake completed
    #[error("session is not initialized")]
    NotInitialized,

    /// Peer did not advertise a capability this peer requires
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// Coordinator lookup miss
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A local wait expired
    #[error("operation timed out")]
    Timeout,

    /// The session was cancelled while waiting
    #[error("operation cancelled")]
    Cancelled,

    /// Error object received from the peer, surfaced verbatim
    #[error("peer error: {0}")]
    JsonRpc(JsonRpcError),

    /// IO error during read/write operations
    #[error("io error: {0}")]
    Io(String),
}

impl McpError {
    /// The JSON-RPC error code this error maps to when surfaced over
    /// the wire. `None` for local-only errors.
    pub fn code(&self) -> Option<i64> {
        match self {
            McpError::InvalidJson(_) => Some(JsonRpcError::PARSE_ERROR),
            McpError::InvalidRequest(_) => Some(JsonRpcError::INVALID_REQUEST),
            McpError::MethodNotFound(_) => Some(JsonRpcError::METHOD_NOT_FOUND),
            McpError::InvalidParams(_) => Some(JsonRpcError::INVALID_PARAMS),
            McpError::Internal(_) => Some(JsonRpcError::INTERNAL_ERROR),
            McpError::NotInitialized => Some(JsonRpcError::NOT_INITIALIZED),
            McpError::CapabilityNotSupported(_) => Some(JsonRpcError::CAPABILITY_NOT_SUPPORTED),
            McpError::JsonRpc(err) => Some(err.code),
            _ => None,
        }
    }

    /// Converts this error into the JSON-RPC error object written back
    /// to the offending peer. Local-only variants collapse to an
    /// internal error; they should not normally reach this point.
    pub fn to_wire(&self) -> JsonRpcError {
        match self {
            McpError::JsonRpc(err) => err.clone(),
            _ => JsonRpcError::new(
                self.code().unwrap_or(JsonRpcError::INTERNAL_ERROR),
                &self.to_string(),
                None,
            ),
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::InvalidJson(err.to_string())
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for McpError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        McpError::Timeout
    }
}
