//! JSON-RPC 2.0 wire envelope for the MCP protocol.
//!
//! This module owns the framing layer shared by both peers: the
//! [`JsonRpcMessage`] envelope, the string-or-number [`MessageId`]
//! discriminant, the JSON-RPC error object, and the method-name
//! constants of the MCP method set.
//!
//! The codec is deliberately length-agnostic: the transport delivers
//! one logical JSON object per frame, and [`read_message`] decodes a
//! single frame from an [`AsyncRead`]. Serialization appends a
//! trailing newline so consecutive frames on a shared byte stream
//! stay splittable.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::utils::error::{McpError, McpResult};

/// JSON-RPC protocol version carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Requests (either direction, see the per-peer dispatch tables).
pub const METHOD_INITIALIZE: &str = "initialize";
/// Keepalive probe, accepted by both peers in any state.
pub const METHOD_PING: &str = "ping";
/// Client asks the server for its prompt catalog page.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Client resolves one prompt with arguments.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
/// Client asks the server for its resource catalog page.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Client reads one resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Client asks for the server's resource templates.
pub const METHOD_RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// Client subscribes to updates of one resource URI.
pub const METHOD_RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// Client asks the server for its tool catalog page.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Client invokes one tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Client asks for argument completion on a prompt or resource ref.
pub const METHOD_COMPLETION_COMPLETE: &str = "completion/complete";
/// Server asks the client for its root list.
pub const METHOD_ROOTS_LIST: &str = "roots/list";
/// Server asks the client's LLM to generate a message.
pub const METHOD_SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";

/// Client signals the handshake is complete.
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
/// Either peer cancels an in-flight request it issued earlier.
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
/// Progress report correlated to a request's progress token.
pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";
/// Log record pushed from server to client.
pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
/// The server's prompt catalog changed.
pub const NOTIFICATION_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
/// The server's resource catalog changed.
pub const NOTIFICATION_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// A subscribed resource changed.
pub const NOTIFICATION_RESOURCES_UPDATED: &str = "notifications/resources/updated";
/// The server's tool catalog changed.
pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// The client's root list changed.
pub const NOTIFICATION_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";

/// Request identifier: JSON-RPC allows strings and numbers.
///
/// Ids are opaque and compared through their string form (numbers are
/// stringified); the original variant is preserved so responses echo
/// the id exactly as the requester sent it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId::String(s.to_string())
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        MessageId::Number(n)
    }
}

/// Frame classification, derived from which envelope fields are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `method` and `id` present
    Request,
    /// `method` present, `id` absent
    Notification,
    /// `method` absent, `id` present
    Response,
}

/// A single JSON-RPC 2.0 frame.
///
/// Exactly one of `method` (request/notification), `result`, or
/// `error` is meaningful per frame; [`JsonRpcMessage::kind`] encodes
/// the classification rules. A success response whose `result` is
/// JSON `null` decodes with `result: None` and is still a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// JSON-RPC version, always "2.0"
    pub jsonrpc: String,
    /// Request identifier; absent on notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Method name; absent on responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Success payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Create a request frame.
    pub fn request(id: MessageId, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Create a notification frame (no id, no response expected).
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Create a success response echoing the request id.
    pub fn success(id: MessageId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response echoing the request id.
    pub fn error_response(id: MessageId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Classify this frame.
    ///
    /// Returns `InvalidRequest` when neither `method` nor `id` is
    /// present, since such a frame is not addressable at all.
    pub fn kind(&self) -> McpResult<MessageKind> {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => Ok(MessageKind::Request),
            (Some(_), None) => Ok(MessageKind::Notification),
            (None, Some(_)) => Ok(MessageKind::Response),
            (None, None) => Err(McpError::InvalidRequest(
                "frame carries neither method nor id".to_string(),
            )),
        }
    }

    /// Serialize to wire bytes, newline-terminated.
    pub fn to_bytes(&self) -> McpResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)
            .map_err(|e| McpError::Internal(format!("failed to serialize frame: {}", e)))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Decode one frame from raw bytes.
///
/// Malformed JSON and frames that do not carry the "2.0" version
/// marker are rejected with `InvalidJson` / `InvalidRequest`; the
/// caller decides whether that terminates the session (it does not).
pub fn decode_message(bytes: &[u8]) -> McpResult<JsonRpcMessage> {
    let msg: JsonRpcMessage =
        serde_json::from_slice(bytes).map_err(|e| McpError::InvalidJson(e.to_string()))?;
    if msg.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::InvalidRequest(format!(
            "unsupported jsonrpc version: {}",
            msg.jsonrpc
        )));
    }
    msg.kind()?;
    Ok(msg)
}

/// Read one complete frame from a reader.
///
/// The transport hands the core one logical JSON object per call; the
/// reader is consumed to EOF.
pub async fn read_message<R>(mut reader: R) -> McpResult<JsonRpcMessage>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| McpError::InvalidJson(e.to_string()))?;
    decode_message(&buf)
}

/// Decode request/notification params into their typed shape.
///
/// Absent params decode as an empty object so parameter structs with
/// only optional fields accept bare frames.
pub(crate) fn decode_params<T>(params: Option<Value>) -> McpResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let value = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl JsonRpcError {
    /// Malformed inbound frame.
    pub const PARSE_ERROR: i64 = -32700;
    /// Missing required field or wrong state.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method for this peer.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Params decode failed.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Provider failure or unexpected condition.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Non-handshake request before `notifications/initialized`.
    pub const NOT_INITIALIZED: i64 = -32002;
    /// Peer lacks a capability this peer requires.
    pub const CAPABILITY_NOT_SUPPORTED: i64 = -32001;

    /// Create a new JSON-RPC error object.
    pub fn new(code: i64, message: &str, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    /// Parse error (-32700)
    pub fn parse_error(message: &str) -> Self {
        Self::new(Self::PARSE_ERROR, message, None)
    }

    /// Invalid request error (-32600)
    pub fn invalid_request(message: &str) -> Self {
        Self::new(Self::INVALID_REQUEST, message, None)
    }

    /// Method not found error (-32601)
    pub fn method_not_found(message: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, message, None)
    }

    /// Invalid params error (-32602)
    pub fn invalid_params(message: &str) -> Self {
        Self::new(Self::INVALID_PARAMS, message, None)
    }

    /// Internal error (-32603)
    pub fn internal_error(message: &str) -> Self {
        Self::new(Self::INTERNAL_ERROR, message, None)
    }

    /// Session not initialized error (-32002)
    pub fn not_initialized() -> Self {
        Self::new(Self::NOT_INITIALIZED, "session is not initialized", None)
    }

    /// Capability not supported error (-32001)
    pub fn capability_not_supported(message: &str) -> Self {
        Self::new(Self::CAPABILITY_NOT_SUPPORTED, message, None)
    }
}
