//! Host capability interfaces consumed by the session core.
//!
//! Each trait is a narrow contract the embedding application
//! implements; supplying an implementation to the builder both
//! enables the matching method handling and sets the matching
//! capability flag (see the coordinator builders).
//!
//! Updaters are lazy sequences rather than callback registries: the
//! coordinator takes the receiver once at start and fans each event
//! out to every live session, so a slow session back-pressures the
//! producer instead of dropping events.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::mcp::types::{
    CompletionArgument, CompletionResult, LogParams, ProgressParams, PromptList, PromptResult,
    Resource, ResourceList, ResourceTemplate, RootList, SamplingParams, SamplingResult, ToolList,
    ToolResult,
};
use crate::utils::error::McpResult;

/// Serves the prompt catalog. Server side.
#[async_trait]
pub trait PromptServer: Send + Sync {
    /// Return one page of the prompt catalog.
    async fn list_prompts(
        &self,
        cursor: Option<&str>,
        progress_token: Option<&str>,
    ) -> McpResult<PromptList>;

    /// Resolve one prompt with the given argument values.
    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
        progress_token: Option<&str>,
    ) -> McpResult<PromptResult>;

    /// Complete a partially-typed prompt argument.
    async fn complete_prompt(
        &self,
        name: &str,
        argument: CompletionArgument,
    ) -> McpResult<CompletionResult>;
}

/// Serves the resource catalog. Server side.
#[async_trait]
pub trait ResourceServer: Send + Sync {
    /// Return one page of the resource catalog.
    async fn list_resources(
        &self,
        cursor: Option<&str>,
        progress_token: Option<&str>,
    ) -> McpResult<ResourceList>;

    /// Read one resource by URI.
    async fn read_resource(&self, uri: &str, progress_token: Option<&str>)
        -> McpResult<Resource>;

    /// Return the server's resource templates.
    async fn list_resource_templates(
        &self,
        progress_token: Option<&str>,
    ) -> McpResult<Vec<ResourceTemplate>>;

    /// Register the session's interest in updates of `uri`.
    async fn subscribe_resource(&self, uri: &str) -> McpResult<()>;

    /// Complete a partially-typed resource template argument.
    async fn complete_resource(
        &self,
        uri: &str,
        argument: CompletionArgument,
    ) -> McpResult<CompletionResult>;
}

/// Serves the tool catalog and runs tool calls. Server side.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Return one page of the tool catalog.
    async fn list_tools(
        &self,
        cursor: Option<&str>,
        progress_token: Option<&str>,
    ) -> McpResult<ToolList>;

    /// Invoke one tool. Arguments are opaque JSON at this layer.
    async fn call_tool(
        &self,
        name: &str,
        arguments: &HashMap<String, Value>,
        progress_token: Option<&str>,
    ) -> McpResult<ToolResult>;
}

/// Emits a unit event whenever the prompt catalog changes.
pub trait PromptListUpdater: Send + Sync {
    /// Take the update stream. Called once, at coordinator start.
    fn prompt_list_updates(&self) -> mpsc::Receiver<()>;
}

/// Emits a unit event whenever the resource catalog changes.
pub trait ResourceListUpdater: Send + Sync {
    /// Take the update stream. Called once, at coordinator start.
    fn resource_list_updates(&self) -> mpsc::Receiver<()>;
}

/// Emits the URI of each subscribed resource that changes.
pub trait ResourceSubscribedUpdater: Send + Sync {
    /// Take the update stream. Called once, at coordinator start.
    fn resource_subscriber_updates(&self) -> mpsc::Receiver<String>;
}

/// Emits a unit event whenever the tool catalog changes.
pub trait ToolListUpdater: Send + Sync {
    /// Take the update stream. Called once, at coordinator start.
    fn tool_list_updates(&self) -> mpsc::Receiver<()>;
}

/// Streams log records to fan out as `notifications/message`.
pub trait LogHandler: Send + Sync {
    /// Take the log stream. Called once, at coordinator start.
    fn log_streams(&self) -> mpsc::Receiver<LogParams>;
}

/// Streams progress reports routed back to the session whose request
/// carried the matching progress token.
pub trait ProgressReporter: Send + Sync {
    /// Take the progress stream. Called once, at coordinator start.
    fn progress_reports(&self) -> mpsc::Receiver<ProgressParams>;
}

/// Server-side observer of the client's `roots/list_changed`.
pub trait RootsListWatcher: Send + Sync {
    /// The client announced its root list changed.
    fn on_roots_list_changed(&self);
}

/// Answers `roots/list` requests. Client side.
#[async_trait]
pub trait RootsListHandler: Send + Sync {
    /// Return the current root list.
    async fn roots_list(&self) -> McpResult<RootList>;
}

/// Emits a unit event whenever the client's root list changes.
pub trait RootsListUpdater: Send + Sync {
    /// Take the update stream. Called once, at coordinator start.
    fn roots_list_updates(&self) -> mpsc::Receiver<()>;
}

/// Answers `sampling/createMessage` requests. Client side.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    /// Ask the client's LLM to generate the next message.
    async fn create_sample_message(&self, params: SamplingParams) -> McpResult<SamplingResult>;
}

/// Receives `notifications/message` log records. Client side.
pub trait LogReceiver: Send + Sync {
    /// A log record arrived from the server.
    fn on_log(&self, params: LogParams);
}

/// Receives `notifications/progress`. Client side.
pub trait ProgressListener: Send + Sync {
    /// A progress report arrived for a request this client issued.
    fn on_progress(&self, params: ProgressParams);
}

/// Client-side observer of `prompts/list_changed`.
pub trait PromptListWatcher: Send + Sync {
    /// The server announced its prompt catalog changed.
    fn on_prompt_list_changed(&self);
}

/// Client-side observer of `resources/list_changed`.
pub trait ResourceListWatcher: Send + Sync {
    /// The server announced its resource catalog changed.
    fn on_resource_list_changed(&self);
}

/// Client-side observer of `resources/updated`.
pub trait ResourceSubscribedWatcher: Send + Sync {
    /// A resource this client subscribed to changed.
    fn on_resource_subscribed_changed(&self, uri: &str);
}

/// Client-side observer of `tools/list_changed`.
pub trait ToolListWatcher: Send + Sync {
    /// The server announced its tool catalog changed.
    fn on_tool_list_changed(&self);
}
