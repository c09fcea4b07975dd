//! # MCP Protocol Types
//!
//! This module defines the data model of the Model Context Protocol:
//! peer identity, capability records, the prompt/resource/tool
//! catalogs, content shapes, sampling, roots, logging, and progress.
//!
//! All types serialize to the camelCase wire names mandated by the
//! protocol; optional fields are omitted rather than serialized as
//! `null`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision both peers negotiate during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Identity advertised by a peer during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Peer name
    pub name: String,
    /// Peer version
    pub version: String,
}

/// Capability record advertised by a server.
///
/// Presence of a section both permits the matching methods and, via
/// its flags, the matching notifications. The record is derived from
/// the configured providers and updaters, never set directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Prompt catalog support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    /// Resource catalog support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Tool catalog support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    /// Log streaming support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
}

/// Prompt section of [`ServerCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptsCapability {
    /// Whether `notifications/prompts/list_changed` may be emitted
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Resource section of [`ServerCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesCapability {
    /// Whether `resources/subscribe` is accepted
    #[serde(default)]
    pub subscribe: bool,
    /// Whether `notifications/resources/list_changed` may be emitted
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Tool section of [`ServerCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether `notifications/tools/list_changed` may be emitted
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Logging section of [`ServerCapabilities`]; currently flag-free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingCapability {}

/// Capability record advertised by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Root list support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    /// LLM sampling support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,
}

/// Roots section of [`ClientCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootsCapability {
    /// Whether `notifications/roots/list_changed` may be emitted
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// Sampling section of [`ClientCapabilities`]; currently flag-free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingCapability {}

/// Request metadata envelope carried under the `_meta` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamsMeta {
    /// Opaque token correlating progress notifications to the request
    #[serde(rename = "progressToken", skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<String>,
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol revision the client speaks
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Capabilities the client advertises
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client identity
    #[serde(rename = "clientInfo")]
    pub client_info: Info,
}

/// `initialize` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol revision the server speaks
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Capabilities the server advertises
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identity
    #[serde(rename = "serverInfo")]
    pub server_info: Info,
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human side of the conversation
    User,
    /// Model side of the conversation
    Assistant,
}

/// Discriminant of a [`Content`] block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain text
    Text,
    /// Base64-encoded image
    Image,
    /// Embedded resource
    Resource,
}

/// One content block inside a prompt message or tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Block discriminant
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// Text payload, for text blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 payload, for image blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// MIME type of the payload
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Embedded resource, for resource blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
}

impl Content {
    /// Convenience constructor for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Text,
            text: Some(text.into()),
            data: None,
            mime_type: None,
            resource: None,
        }
    }
}

/// `prompts/list` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsListParams {
    /// Pagination cursor from a previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParamsMeta>,
}

/// One page of the prompt catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptList {
    /// Prompts on this page
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    /// Cursor for the next page, if any
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A prompt template the server can resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name, unique within the server
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Arguments the prompt accepts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// One argument of a [`Prompt`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Whether the argument must be supplied
    #[serde(default)]
    pub required: bool,
}

/// `prompts/get` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsGetParams {
    /// Prompt name
    pub name: String,
    /// Argument values, keyed by argument name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub arguments: HashMap<String, String>,
    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParamsMeta>,
}

/// A resolved prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptResult {
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Messages making up the prompt
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// One message of a resolved prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Author role
    pub role: Role,
    /// Message content
    pub content: Content,
}

/// `resources/list` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesListParams {
    /// Pagination cursor from a previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParamsMeta>,
}

/// One page of the resource catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceList {
    /// Resources on this page
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Cursor for the next page, if any
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A resource the server exposes, or the record returned by
/// `resources/read`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI
    pub uri: String,
    /// Resource name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// MIME type of the content
    #[serde(rename = "mimeType", default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    /// Textual content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 binary content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// `resources/read` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesReadParams {
    /// URI of the resource to read
    pub uri: String,
    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParamsMeta>,
}

/// `resources/templates/list` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesTemplatesListParams {
    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParamsMeta>,
}

/// A parameterized resource the server can materialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// RFC 6570 URI template
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    /// Template name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// MIME type of materialized resources
    #[serde(rename = "mimeType", default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

/// `resources/subscribe` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesSubscribeParams {
    /// URI to watch
    pub uri: String,
}

/// `tools/list` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsListParams {
    /// Pagination cursor from a previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParamsMeta>,
}

/// One page of the tool catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolList {
    /// Tools on this page
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Cursor for the next page, if any
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A tool the server can invoke on behalf of the client.
///
/// The input schema is opaque JSON at this layer; the core passes it
/// through without validating it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name, unique within the server
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON Schema describing the tool's arguments
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Value::is_null")]
    pub input_schema: Value,
}

/// `tools/call` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCallParams {
    /// Tool name
    pub name: String,
    /// Argument values, keyed by parameter name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub arguments: HashMap<String, Value>,
    /// Request metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParamsMeta>,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Output blocks produced by the tool
    #[serde(default)]
    pub content: Vec<Content>,
    /// Whether the tool itself reported failure
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// `ref/prompt` completion reference type.
pub const COMPLETION_REF_PROMPT: &str = "ref/prompt";
/// `ref/resource` completion reference type.
pub const COMPLETION_REF_RESOURCE: &str = "ref/resource";

/// Reference to the prompt or resource template being completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRef {
    /// `ref/prompt` or `ref/resource`
    #[serde(rename = "type")]
    pub ref_type: String,
    /// Prompt name, for `ref/prompt`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Resource URI template, for `ref/resource`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
}

/// The argument being completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionArgument {
    /// Argument name
    pub name: String,
    /// Partial value typed so far
    pub value: String,
}

/// `completion/complete` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionCompleteParams {
    /// What is being completed
    #[serde(rename = "ref")]
    pub completion_ref: CompletionRef,
    /// The argument under the cursor
    pub argument: CompletionArgument,
}

/// `completion/complete` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Completion payload
    pub completion: Completion,
}

/// Candidate values for a completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Candidate values
    #[serde(default)]
    pub values: Vec<String>,
    /// Whether more candidates exist beyond this page
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
}

/// A filesystem or URI root the client exposes to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Root {
    /// Root URI
    pub uri: String,
    /// Root name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// `roots/list` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootList {
    /// The client's current roots
    #[serde(default)]
    pub roots: Vec<Root>,
}

/// One message of a sampling conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    /// Author role
    pub role: Role,
    /// Message content
    pub content: SamplingContent,
}

/// Content of a sampling message; text-only in this revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingContent {
    /// Content discriminant, `"text"`
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text payload
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

/// Relative model-selection priorities for a sampling request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingModelPreferences {
    /// Weight given to cost
    #[serde(rename = "costPriority", default)]
    pub cost_priority: i64,
    /// Weight given to latency
    #[serde(rename = "speedPriority", default)]
    pub speed_priority: i64,
    /// Weight given to model quality
    #[serde(rename = "intelligencePriority", default)]
    pub intelligence_priority: i64,
}

/// `sampling/createMessage` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Conversation so far
    #[serde(default)]
    pub messages: Vec<SamplingMessage>,
    /// Model selection hints
    #[serde(rename = "modelPreferences", default)]
    pub model_preferences: SamplingModelPreferences,
    /// System prompt to apply
    #[serde(rename = "systemPrompts", default, skip_serializing_if = "String::is_empty")]
    pub system_prompts: String,
    /// Maximum number of tokens to generate
    #[serde(rename = "maxTokens", default)]
    pub max_tokens: i64,
}

/// `sampling/createMessage` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingResult {
    /// Author role of the generated message
    pub role: Role,
    /// Generated content
    pub content: SamplingContent,
    /// Model that produced the message
    pub model: String,
    /// Why generation stopped
    #[serde(rename = "stopReason", default, skip_serializing_if = "String::is_empty")]
    pub stop_reason: String,
}

/// Severity ladder for `notifications/message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose diagnostics
    Debug,
    /// Routine information
    Info,
    /// Normal but significant events
    Notice,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions
    Critical,
    /// Action must be taken immediately
    Alert,
    /// System is unusable
    Emergency,
}

/// `notifications/message` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogParams {
    /// Severity
    pub level: LogLevel,
    /// Originating logger name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logger: String,
    /// Arbitrary payload
    #[serde(default)]
    pub data: Value,
}

/// `notifications/progress` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    /// Token from the originating request's `_meta`
    #[serde(rename = "progressToken")]
    pub progress_token: String,
    /// Work completed so far
    pub progress: f64,
    /// Total work, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

/// `notifications/cancelled` parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelledParams {
    /// Id of the request being cancelled
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Opaque human-readable reason
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// `notifications/resources/updated` parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesUpdatedParams {
    /// URI of the resource that changed
    pub uri: String,
}
