//! Multi-session MCP client coordinator.
//!
//! The mirror image of the server coordinator: it owns the client
//! side of every connection, issues the client-initiated requests
//! (the prompt/resource/tool surface), answers the server-initiated
//! ones (`ping`, `roots/list`, `sampling/createMessage`), and fans
//! root-list changes out to every session.
//!
//! Session ids are supplied by the transport here; only the server
//! allocates its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mcp::message::{
    decode_params, read_message, JsonRpcError, JsonRpcMessage, MessageId, MessageKind,
    METHOD_COMPLETION_COMPLETE, METHOD_INITIALIZE, METHOD_PING, METHOD_PROMPTS_GET,
    METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_RESOURCES_SUBSCRIBE, METHOD_RESOURCES_TEMPLATES_LIST, METHOD_ROOTS_LIST,
    METHOD_SAMPLING_CREATE_MESSAGE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    NOTIFICATION_CANCELLED, NOTIFICATION_INITIALIZED, NOTIFICATION_MESSAGE,
    NOTIFICATION_PROGRESS, NOTIFICATION_PROMPTS_LIST_CHANGED,
    NOTIFICATION_RESOURCES_LIST_CHANGED, NOTIFICATION_RESOURCES_UPDATED,
    NOTIFICATION_ROOTS_LIST_CHANGED, NOTIFICATION_TOOLS_LIST_CHANGED,
};
use crate::mcp::providers::{
    LogReceiver, ProgressListener, PromptListWatcher, ResourceListWatcher,
    ResourceSubscribedWatcher, RootsListHandler, RootsListUpdater, SamplingHandler,
    ToolListWatcher,
};
use crate::mcp::session::{SessionCore, SessionTimeouts};
use crate::mcp::types::{
    CancelledParams, ClientCapabilities, CompletionArgument, CompletionCompleteParams,
    CompletionRef, CompletionResult, Info, InitializeParams, InitializeResult, LogParams,
    ParamsMeta, ProgressParams, PromptList, PromptResult, PromptsGetParams, PromptsListParams,
    Resource, ResourceList, ResourceTemplate, ResourcesListParams, ResourcesReadParams,
    ResourcesSubscribeParams, ResourcesTemplatesListParams, ResourcesUpdatedParams, RootList,
    RootsCapability, SamplingCapability, SamplingParams, ServerCapabilities, ToolList, ToolResult,
    ToolsCallParams, ToolsListParams, COMPLETION_REF_PROMPT, COMPLETION_REF_RESOURCE,
    PROTOCOL_VERSION,
};
use crate::utils::error::{McpError, McpResult};

/// The client identity and handshake requirements, implemented by the
/// embedding application.
pub trait Client: Send + Sync {
    /// Identity sent in the `initialize` request.
    fn info(&self) -> Info;

    /// Capabilities the server must advertise for [`McpClient::initialize`]
    /// to succeed. Defaults to none.
    fn required_server_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities::default()
    }
}

/// Builder collecting the optional client-side capability objects and
/// timeout overrides.
#[derive(Default)]
pub struct McpClientBuilder {
    roots_list_handler: Option<Arc<dyn RootsListHandler>>,
    roots_list_updater: Option<Arc<dyn RootsListUpdater>>,
    sampling_handler: Option<Arc<dyn SamplingHandler>>,
    log_receiver: Option<Arc<dyn LogReceiver>>,
    progress_listener: Option<Arc<dyn ProgressListener>>,
    prompt_list_watcher: Option<Arc<dyn PromptListWatcher>>,
    resource_list_watcher: Option<Arc<dyn ResourceListWatcher>>,
    resource_subscribed_watcher: Option<Arc<dyn ResourceSubscribedWatcher>>,
    tool_list_watcher: Option<Arc<dyn ToolListWatcher>>,
    write_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    ping_interval: Option<Duration>,
}

impl std::fmt::Debug for McpClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientBuilder")
            .field("roots_list_handler", &self.roots_list_handler.is_some())
            .field("sampling_handler", &self.sampling_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl McpClientBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `roots/list` requests from servers.
    pub fn with_roots_list_handler(mut self, handler: Arc<dyn RootsListHandler>) -> Self {
        self.roots_list_handler = Some(handler);
        self
    }

    /// Announce root-list changes to every session.
    pub fn with_roots_list_updater(mut self, updater: Arc<dyn RootsListUpdater>) -> Self {
        self.roots_list_updater = Some(updater);
        self
    }

    /// Answer `sampling/createMessage` requests from servers.
    pub fn with_sampling_handler(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.sampling_handler = Some(handler);
        self
    }

    /// Receive server log records.
    pub fn with_log_receiver(mut self, receiver: Arc<dyn LogReceiver>) -> Self {
        self.log_receiver = Some(receiver);
        self
    }

    /// Receive progress reports for requests this client issued.
    pub fn with_progress_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    /// Observe prompt catalog changes.
    pub fn with_prompt_list_watcher(mut self, watcher: Arc<dyn PromptListWatcher>) -> Self {
        self.prompt_list_watcher = Some(watcher);
        self
    }

    /// Observe resource catalog changes.
    pub fn with_resource_list_watcher(mut self, watcher: Arc<dyn ResourceListWatcher>) -> Self {
        self.resource_list_watcher = Some(watcher);
        self
    }

    /// Observe subscribed-resource changes.
    pub fn with_resource_subscribed_watcher(
        mut self,
        watcher: Arc<dyn ResourceSubscribedWatcher>,
    ) -> Self {
        self.resource_subscribed_watcher = Some(watcher);
        self
    }

    /// Observe tool catalog changes.
    pub fn with_tool_list_watcher(mut self, watcher: Arc<dyn ToolListWatcher>) -> Self {
        self.tool_list_watcher = Some(watcher);
        self
    }

    /// Bound on a single frame emission.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Bound on waiting for the response to an outbound request.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Silence tolerated between keepalive pings.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Derive the capability record and assemble the coordinator.
    pub fn build<C: Client>(self, client: &C) -> McpClient {
        let mut capabilities = ClientCapabilities::default();
        if self.roots_list_handler.is_some() {
            capabilities.roots = Some(RootsCapability {
                list_changed: self.roots_list_updater.is_some(),
            });
        }
        if self.sampling_handler.is_some() {
            capabilities.sampling = Some(SamplingCapability {});
        }

        let timeouts = SessionTimeouts {
            write_timeout: self.write_timeout.unwrap_or(super::DEFAULT_WRITE_TIMEOUT),
            read_timeout: self.read_timeout.unwrap_or(super::DEFAULT_READ_TIMEOUT),
            ping_interval: self.ping_interval.unwrap_or(super::DEFAULT_PING_INTERVAL),
        };
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        McpClient {
            capabilities,
            client_info: client.info(),
            required_server_capabilities: client.required_server_capabilities(),
            sessions: Arc::new(StdMutex::new(HashMap::new())),
            roots_list_handler: self.roots_list_handler,
            roots_list_updater: self.roots_list_updater,
            sampling_handler: self.sampling_handler,
            log_receiver: self.log_receiver,
            progress_listener: self.progress_listener,
            prompt_list_watcher: self.prompt_list_watcher,
            resource_list_watcher: self.resource_list_watcher,
            resource_subscribed_watcher: self.resource_subscribed_watcher,
            tool_list_watcher: self.tool_list_watcher,
            timeouts,
            stop_tx,
            stop_rx: StdMutex::new(Some(stop_rx)),
            close: CancellationToken::new(),
        }
    }
}

/// One session as the client sees it: the shared core, what the
/// server told us about itself, and the root-list inbox.
pub(crate) struct ClientSession {
    pub(crate) core: Arc<SessionCore>,
    server_info: StdMutex<Option<Info>>,
    server_capabilities: StdMutex<Option<ServerCapabilities>>,
    roots_list_tx: mpsc::Sender<()>,
}

impl ClientSession {
    fn spawn(core: Arc<SessionCore>) -> Arc<Self> {
        let (roots_list_tx, mut roots_list_rx) = mpsc::channel::<()>(1);

        let sess = Arc::new(Self {
            core: Arc::clone(&core),
            server_info: StdMutex::new(None),
            server_capabilities: StdMutex::new(None),
            roots_list_tx,
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = core.cancel.cancelled() => return,
                    ev = roots_list_rx.recv() => {
                        if ev.is_none() {
                            return;
                        }
                        let _ = core
                            .send_notification(NOTIFICATION_ROOTS_LIST_CHANGED, None)
                            .await;
                    }
                }
            }
        });

        sess
    }
}

/// The multi-session client coordinator.
pub struct McpClient {
    capabilities: ClientCapabilities,
    client_info: Info,
    required_server_capabilities: ServerCapabilities,
    sessions: Arc<StdMutex<HashMap<String, Arc<ClientSession>>>>,
    roots_list_handler: Option<Arc<dyn RootsListHandler>>,
    roots_list_updater: Option<Arc<dyn RootsListUpdater>>,
    sampling_handler: Option<Arc<dyn SamplingHandler>>,
    log_receiver: Option<Arc<dyn LogReceiver>>,
    progress_listener: Option<Arc<dyn ProgressListener>>,
    prompt_list_watcher: Option<Arc<dyn PromptListWatcher>>,
    resource_list_watcher: Option<Arc<dyn ResourceListWatcher>>,
    resource_subscribed_watcher: Option<Arc<dyn ResourceSubscribedWatcher>>,
    tool_list_watcher: Option<Arc<dyn ToolListWatcher>>,
    timeouts: SessionTimeouts,
    stop_tx: mpsc::UnboundedSender<String>,
    stop_rx: StdMutex<Option<mpsc::UnboundedReceiver<String>>>,
    close: CancellationToken,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("client_info", &self.client_info)
            .field("capabilities", &self.capabilities)
            .field("sessions", &self.sessions.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// The capability record sent during the handshake.
    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.capabilities
    }

    /// The client identity.
    pub fn info(&self) -> &Info {
        &self.client_info
    }

    /// Launch the session collector and, when a root-list updater was
    /// supplied, its fan-out task. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let Some(mut stop_rx) = self.stop_rx.lock().unwrap().take() else {
            debug!("client already started");
            return;
        };

        let sessions = Arc::clone(&self.sessions);
        let close = self.close.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = close.cancelled() => return,
                    id = stop_rx.recv() => match id {
                        Some(id) => {
                            sessions.lock().unwrap().remove(&id);
                            debug!(session = %id, "session deregistered");
                        }
                        None => return,
                    }
                }
            }
        });

        if let Some(updater) = &self.roots_list_updater {
            let mut updates = updater.roots_list_updates();
            let sessions = Arc::clone(&self.sessions);
            let close = self.close.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = close.cancelled() => return,
                        ev = updates.recv() => if ev.is_none() { return; }
                    }
                    let targets: Vec<Arc<ClientSession>> =
                        sessions.lock().unwrap().values().cloned().collect();
                    for sess in targets {
                        tokio::select! {
                            _ = close.cancelled() => return,
                            _ = sess.roots_list_tx.send(()) => {}
                        }
                    }
                }
            });
        }
    }

    /// Register a session around the transport's write sink under the
    /// transport-supplied id.
    pub fn start_session<W>(&self, writer: W, session_id: &str)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let core = Arc::new(SessionCore::new(
            session_id.to_string(),
            Box::new(writer),
            self.timeouts,
            self.stop_tx.clone(),
        ));
        core.spawn_ping_loop();
        let sess = ClientSession::spawn(core);
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), sess);
        debug!(session = %session_id, "session started");
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// The identity the server behind a session advertised, if the
    /// handshake completed.
    pub fn server_info(&self, session_id: &str) -> McpResult<Option<Info>> {
        let sess = self.session(session_id)?;
        let info = sess.server_info.lock().unwrap().clone();
        Ok(info)
    }

    /// The capability record the server behind a session advertised,
    /// if the handshake completed.
    pub fn server_capabilities(&self, session_id: &str) -> McpResult<Option<ServerCapabilities>> {
        let sess = self.session(session_id)?;
        let caps = sess.server_capabilities.lock().unwrap().clone();
        Ok(caps)
    }

    /// Decode one inbound frame and dispatch it on behalf of the
    /// session the transport received it for.
    pub async fn handle_msg<R>(&self, reader: R, session_id: &str) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let msg = read_message(reader).await?;
        let sess = self.session(session_id)?;
        match msg.kind()? {
            MessageKind::Request => self.handle_request(sess, msg).await,
            MessageKind::Notification => self.handle_notification(sess, msg),
            MessageKind::Response => {
                sess.core.deliver_response(msg);
                Ok(())
            }
        }
    }

    /// Cancel every session and release the fan-out tasks.
    pub fn stop(&self) {
        let sessions: Vec<Arc<ClientSession>> =
            self.sessions.lock().unwrap().values().cloned().collect();
        for sess in sessions {
            sess.core.terminate();
        }
        self.close.cancel();
        debug!("client stopped");
    }

    /// Run the three-step initialization handshake on a session.
    ///
    /// Fails with `CapabilityNotSupported` when the server's record
    /// does not cover [`Client::required_server_capabilities`], and
    /// with `InvalidRequest` on a protocol version mismatch; the
    /// `notifications/initialized` step is only sent once both
    /// checks pass.
    pub async fn initialize(&self, session_id: &str) -> McpResult<InitializeResult> {
        let sess = self.session(session_id)?;

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.client_info.clone(),
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::Internal(e.to_string()))?;
        let value = sess
            .core
            .send_request(METHOD_INITIALIZE, Some(params))
            .await?;
        let result: InitializeResult =
            serde_json::from_value(value).map_err(|e| McpError::InvalidJson(e.to_string()))?;

        if result.protocol_version != PROTOCOL_VERSION {
            return Err(McpError::InvalidRequest(format!(
                "unsupported protocol version: {}",
                result.protocol_version
            )));
        }
        if let Some(missing) =
            missing_server_capability(&self.required_server_capabilities, &result.capabilities)
        {
            warn!(session = %session_id, missing, "server lacks required capability");
            return Err(McpError::CapabilityNotSupported(format!(
                "missing required capability: {}",
                missing
            )));
        }

        *sess.server_info.lock().unwrap() = Some(result.server_info.clone());
        *sess.server_capabilities.lock().unwrap() = Some(result.capabilities.clone());

        // Flip the flag before the notification leaves: the server may
        // issue its first request the moment it sees `initialized`.
        sess.core.mark_initialized();
        sess.core
            .send_notification(NOTIFICATION_INITIALIZED, None)
            .await?;
        debug!(session = %session_id, server = %result.server_info.name, "handshake completed");
        Ok(result)
    }

    /// Probe the server.
    pub async fn ping(&self, session_id: &str) -> McpResult<()> {
        let sess = self.session(session_id)?;
        sess.core.send_request(METHOD_PING, None).await?;
        Ok(())
    }

    /// Fetch one page of the prompt catalog.
    pub async fn list_prompts(
        &self,
        session_id: &str,
        cursor: Option<String>,
        progress_token: Option<String>,
    ) -> McpResult<PromptList> {
        let params = PromptsListParams {
            cursor,
            meta: meta_from(progress_token),
        };
        self.request(session_id, METHOD_PROMPTS_LIST, &params).await
    }

    /// Resolve one prompt with arguments.
    pub async fn get_prompt(
        &self,
        session_id: &str,
        name: &str,
        arguments: HashMap<String, String>,
        progress_token: Option<String>,
    ) -> McpResult<PromptResult> {
        let params = PromptsGetParams {
            name: name.to_string(),
            arguments,
            meta: meta_from(progress_token),
        };
        self.request(session_id, METHOD_PROMPTS_GET, &params).await
    }

    /// Complete a partially-typed prompt argument.
    pub async fn complete_prompt(
        &self,
        session_id: &str,
        name: &str,
        argument: CompletionArgument,
    ) -> McpResult<CompletionResult> {
        let params = CompletionCompleteParams {
            completion_ref: CompletionRef {
                ref_type: COMPLETION_REF_PROMPT.to_string(),
                name: name.to_string(),
                uri: String::new(),
            },
            argument,
        };
        self.request(session_id, METHOD_COMPLETION_COMPLETE, &params)
            .await
    }

    /// Fetch one page of the resource catalog.
    pub async fn list_resources(
        &self,
        session_id: &str,
        cursor: Option<String>,
        progress_token: Option<String>,
    ) -> McpResult<ResourceList> {
        let params = ResourcesListParams {
            cursor,
            meta: meta_from(progress_token),
        };
        self.request(session_id, METHOD_RESOURCES_LIST, &params).await
    }

    /// Read one resource by URI.
    pub async fn read_resource(
        &self,
        session_id: &str,
        uri: &str,
        progress_token: Option<String>,
    ) -> McpResult<Resource> {
        let params = ResourcesReadParams {
            uri: uri.to_string(),
            meta: meta_from(progress_token),
        };
        self.request(session_id, METHOD_RESOURCES_READ, &params).await
    }

    /// Fetch the server's resource templates.
    pub async fn list_resource_templates(
        &self,
        session_id: &str,
        progress_token: Option<String>,
    ) -> McpResult<Vec<ResourceTemplate>> {
        let params = ResourcesTemplatesListParams {
            meta: meta_from(progress_token),
        };
        self.request(session_id, METHOD_RESOURCES_TEMPLATES_LIST, &params)
            .await
    }

    /// Complete a partially-typed resource template argument.
    pub async fn complete_resource(
        &self,
        session_id: &str,
        uri: &str,
        argument: CompletionArgument,
    ) -> McpResult<CompletionResult> {
        let params = CompletionCompleteParams {
            completion_ref: CompletionRef {
                ref_type: COMPLETION_REF_RESOURCE.to_string(),
                name: String::new(),
                uri: uri.to_string(),
            },
            argument,
        };
        self.request(session_id, METHOD_COMPLETION_COMPLETE, &params)
            .await
    }

    /// Subscribe to updates of one resource URI.
    pub async fn subscribe_resource(&self, session_id: &str, uri: &str) -> McpResult<()> {
        let sess = self.session(session_id)?;
        let params = ResourcesSubscribeParams {
            uri: uri.to_string(),
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::Internal(e.to_string()))?;
        sess.core
            .send_request(METHOD_RESOURCES_SUBSCRIBE, Some(params))
            .await?;
        Ok(())
    }

    /// Fetch one page of the tool catalog.
    pub async fn list_tools(
        &self,
        session_id: &str,
        cursor: Option<String>,
        progress_token: Option<String>,
    ) -> McpResult<ToolList> {
        let params = ToolsListParams {
            cursor,
            meta: meta_from(progress_token),
        };
        self.request(session_id, METHOD_TOOLS_LIST, &params).await
    }

    /// Invoke one tool.
    pub async fn call_tool(
        &self,
        session_id: &str,
        name: &str,
        arguments: HashMap<String, Value>,
        progress_token: Option<String>,
    ) -> McpResult<ToolResult> {
        let params = ToolsCallParams {
            name: name.to_string(),
            arguments,
            meta: meta_from(progress_token),
        };
        self.request(session_id, METHOD_TOOLS_CALL, &params).await
    }

    async fn request<P, T>(&self, session_id: &str, method: &str, params: &P) -> McpResult<T>
    where
        P: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let sess = self.session(session_id)?;
        let params = serde_json::to_value(params).map_err(|e| McpError::Internal(e.to_string()))?;
        let value = sess.core.send_request(method, Some(params)).await?;
        serde_json::from_value(value).map_err(|e| McpError::InvalidJson(e.to_string()))
    }

    fn session(&self, session_id: &str) -> McpResult<Arc<ClientSession>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| McpError::SessionNotFound(session_id.to_string()))
    }

    async fn handle_request(
        &self,
        sess: Arc<ClientSession>,
        msg: JsonRpcMessage,
    ) -> McpResult<()> {
        let (Some(id), Some(method)) = (msg.id.clone(), msg.method.clone()) else {
            return Err(McpError::InvalidRequest("malformed request frame".to_string()));
        };

        match method.as_str() {
            // Ping is answered in any state; everything else waits for
            // the handshake, exactly as on the server side.
            METHOD_PING => sess.core.send_response(id, Value::Object(Map::new())).await,
            _ if !sess.core.is_initialized() => {
                warn!(session = %sess.core.id, method = %method, "request before handshake completed");
                sess.core.send_error(id, JsonRpcError::not_initialized()).await
            }
            METHOD_ROOTS_LIST => {
                let Some(handler) = self.roots_list_handler.clone() else {
                    return self.reject_unsupported(&sess, id, METHOD_ROOTS_LIST).await;
                };
                sess.core.spawn_request_handler(id, async move {
                    let roots = handler.roots_list().await?;
                    serde_json::to_value(roots).map_err(|e| McpError::Internal(e.to_string()))
                });
                Ok(())
            }
            METHOD_SAMPLING_CREATE_MESSAGE => {
                let Some(handler) = self.sampling_handler.clone() else {
                    return self
                        .reject_unsupported(&sess, id, METHOD_SAMPLING_CREATE_MESSAGE)
                        .await;
                };
                let params: SamplingParams = match decode_params(msg.params) {
                    Ok(params) => params,
                    Err(e) => return sess.core.send_error(id, e.to_wire()).await,
                };
                sess.core.spawn_request_handler(id, async move {
                    let result = handler.create_sample_message(params).await?;
                    serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
                });
                Ok(())
            }
            other => {
                debug!(session = %sess.core.id, method = %other, "unknown method");
                sess.core
                    .send_error(
                        id,
                        JsonRpcError::method_not_found(&format!("method '{}' not found", other)),
                    )
                    .await
            }
        }
    }

    fn handle_notification(&self, sess: Arc<ClientSession>, msg: JsonRpcMessage) -> McpResult<()> {
        let method = msg.method.as_deref().unwrap_or_default();
        match method {
            NOTIFICATION_CANCELLED => {
                let params: CancelledParams = decode_params(msg.params)?;
                sess.core.cancel_running(&params.request_id, &params.reason);
                Ok(())
            }
            NOTIFICATION_MESSAGE => {
                let params: LogParams = decode_params(msg.params)?;
                if let Some(receiver) = &self.log_receiver {
                    receiver.on_log(params);
                }
                Ok(())
            }
            NOTIFICATION_PROGRESS => {
                let params: ProgressParams = decode_params(msg.params)?;
                if let Some(listener) = &self.progress_listener {
                    listener.on_progress(params);
                }
                Ok(())
            }
            NOTIFICATION_PROMPTS_LIST_CHANGED => {
                if let Some(watcher) = &self.prompt_list_watcher {
                    watcher.on_prompt_list_changed();
                }
                Ok(())
            }
            NOTIFICATION_RESOURCES_LIST_CHANGED => {
                if let Some(watcher) = &self.resource_list_watcher {
                    watcher.on_resource_list_changed();
                }
                Ok(())
            }
            NOTIFICATION_RESOURCES_UPDATED => {
                let params: ResourcesUpdatedParams = decode_params(msg.params)?;
                if let Some(watcher) = &self.resource_subscribed_watcher {
                    watcher.on_resource_subscribed_changed(&params.uri);
                }
                Ok(())
            }
            NOTIFICATION_TOOLS_LIST_CHANGED => {
                if let Some(watcher) = &self.tool_list_watcher {
                    watcher.on_tool_list_changed();
                }
                Ok(())
            }
            other => {
                debug!(method = %other, "ignoring unknown notification");
                Ok(())
            }
        }
    }

    async fn reject_unsupported(
        &self,
        sess: &ClientSession,
        id: MessageId,
        method: &str,
    ) -> McpResult<()> {
        debug!(session = %sess.core.id, method, "method not supported by this client");
        sess.core
            .send_error(
                id,
                JsonRpcError::method_not_found(&format!("method '{}' not supported", method)),
            )
            .await
    }
}

fn meta_from(progress_token: Option<String>) -> Option<ParamsMeta> {
    progress_token.map(|token| ParamsMeta {
        progress_token: Some(token),
    })
}

fn missing_server_capability(
    required: &ServerCapabilities,
    advertised: &ServerCapabilities,
) -> Option<&'static str> {
    if let Some(required_prompts) = &required.prompts {
        let Some(advertised_prompts) = &advertised.prompts else {
            return Some("prompts");
        };
        if required_prompts.list_changed && !advertised_prompts.list_changed {
            return Some("prompts.listChanged");
        }
    }
    if let Some(required_resources) = &required.resources {
        let Some(advertised_resources) = &advertised.resources else {
            return Some("resources");
        };
        if required_resources.subscribe && !advertised_resources.subscribe {
            return Some("resources.subscribe");
        }
        if required_resources.list_changed && !advertised_resources.list_changed {
            return Some("resources.listChanged");
        }
    }
    if let Some(required_tools) = &required.tools {
        let Some(advertised_tools) = &advertised.tools else {
            return Some("tools");
        };
        if required_tools.list_changed && !advertised_tools.list_changed {
            return Some("tools.listChanged");
        }
    }
    if required.logging.is_some() && advertised.logging.is_none() {
        return Some("logging");
    }
    None
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    use super::*;
    use crate::mcp::message::decode_message;
    use crate::mcp::types::{Content, ContentType, PromptMessage, Role};

    struct MockClient;

    impl Client for MockClient {
        fn info(&self) -> Info {
            Info {
                name: "test-client".to_string(),
                version: "0.1".to_string(),
            }
        }
    }

    struct MockRootsListHandler;

    #[async_trait]
    impl RootsListHandler for MockRootsListHandler {
        async fn roots_list(&self) -> McpResult<RootList> {
            Ok(RootList {
                roots: vec![crate::mcp::types::Root {
                    uri: "test://root".to_string(),
                    name: "Test Root".to_string(),
                }],
            })
        }
    }

    struct MockRootsListUpdater;

    impl RootsListUpdater for MockRootsListUpdater {
        fn roots_list_updates(&self) -> mpsc::Receiver<()> {
            mpsc::channel(1).1
        }
    }

    fn quick_client(builder: McpClientBuilder) -> McpClient {
        builder
            .with_write_timeout(Duration::from_secs(1))
            .with_read_timeout(Duration::from_secs(1))
            .build(&MockClient)
    }

    /// Answer the next request on `reader` with `result`, routing the
    /// response frame back through the client dispatcher.
    fn respond_with(
        client: Arc<McpClient>,
        reader: DuplexStream,
        session_id: &str,
        result: Value,
    ) -> tokio::task::JoinHandle<JsonRpcMessage> {
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request = decode_message(line.as_bytes()).unwrap();
            let response = JsonRpcMessage::success(request.id.clone().unwrap(), result);
            let bytes = serde_json::to_vec(&response).unwrap();
            client.handle_msg(&bytes[..], &session_id).await.unwrap();
            request
        })
    }

    #[test]
    fn test_capability_derivation() {
        let empty = quick_client(McpClientBuilder::new());
        assert_eq!(*empty.capabilities(), ClientCapabilities::default());

        let with_roots = quick_client(
            McpClientBuilder::new().with_roots_list_handler(Arc::new(MockRootsListHandler)),
        );
        assert_eq!(
            with_roots.capabilities().roots,
            Some(RootsCapability { list_changed: false })
        );

        let with_updater = quick_client(
            McpClientBuilder::new()
                .with_roots_list_handler(Arc::new(MockRootsListHandler))
                .with_roots_list_updater(Arc::new(MockRootsListUpdater)),
        );
        assert_eq!(
            with_updater.capabilities().roots,
            Some(RootsCapability { list_changed: true })
        );
    }

    #[tokio::test]
    async fn test_get_prompt_round_trip() {
        let client = Arc::new(quick_client(McpClientBuilder::new()));
        let (writer, reader) = duplex(4096);
        client.start_session(writer, "test-session");

        let fixture = PromptResult {
            description: "Test Prompt".to_string(),
            messages: vec![PromptMessage {
                role: Role::Assistant,
                content: Content::text("Test response message"),
            }],
        };
        let responder = respond_with(
            Arc::clone(&client),
            reader,
            "test-session",
            serde_json::to_value(&fixture).unwrap(),
        );

        let result = client
            .get_prompt(
                "test-session",
                "test-prompt",
                HashMap::from([("test-arg".to_string(), "test-value".to_string())]),
                Some("123".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(result, fixture);
        assert_eq!(result.messages[0].content.content_type, ContentType::Text);

        let request = responder.await.unwrap();
        assert_eq!(request.method.as_deref(), Some(METHOD_PROMPTS_GET));
        let params = request.params.unwrap();
        assert_eq!(params["name"], "test-prompt");
        assert_eq!(params["arguments"]["test-arg"], "test-value");
        assert_eq!(params["_meta"]["progressToken"], "123");
    }

    #[tokio::test]
    async fn test_subscribe_resource_accepts_null_result() {
        let client = Arc::new(quick_client(McpClientBuilder::new()));
        let (writer, reader) = duplex(4096);
        client.start_session(writer, "test-session");

        let responder = respond_with(
            Arc::clone(&client),
            reader,
            "test-session",
            Value::Null,
        );

        client
            .subscribe_resource("test-session", "test://resource")
            .await
            .unwrap();

        let request = responder.await.unwrap();
        assert_eq!(request.method.as_deref(), Some(METHOD_RESOURCES_SUBSCRIBE));
        assert_eq!(request.params.unwrap()["uri"], "test://resource");
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let client = Arc::new(quick_client(McpClientBuilder::new()));
        let (writer, reader) = duplex(4096);
        client.start_session(writer, "test-session");

        let handshake = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let mut lines = BufReader::new(reader).lines();
                let line = lines.next_line().await.unwrap().unwrap();
                let request = decode_message(line.as_bytes()).unwrap();
                assert_eq!(request.method.as_deref(), Some(METHOD_INITIALIZE));
                let params = request.params.clone().unwrap();
                assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
                assert_eq!(params["clientInfo"]["name"], "test-client");

                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities::default(),
                    server_info: Info {
                        name: "test-server".to_string(),
                        version: "1.0".to_string(),
                    },
                };
                let response = JsonRpcMessage::success(
                    request.id.unwrap(),
                    serde_json::to_value(result).unwrap(),
                );
                let bytes = serde_json::to_vec(&response).unwrap();
                client.handle_msg(&bytes[..], "test-session").await.unwrap();

                // The third handshake step must follow on the wire.
                let line = lines.next_line().await.unwrap().unwrap();
                let notification = decode_message(line.as_bytes()).unwrap();
                assert_eq!(
                    notification.method.as_deref(),
                    Some(NOTIFICATION_INITIALIZED)
                );
                assert!(notification.id.is_none());
            })
        };

        let result = client.initialize("test-session").await.unwrap();
        assert_eq!(result.server_info.name, "test-server");
        handshake.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_request_gated_until_handshake() {
        let client = Arc::new(quick_client(
            McpClientBuilder::new().with_roots_list_handler(Arc::new(MockRootsListHandler)),
        ));
        let (writer, reader) = duplex(4096);
        client.start_session(writer, "test-session");
        let mut lines = BufReader::new(reader).lines();

        // Before the handshake, the request is refused even though a
        // handler is configured.
        client
            .handle_msg(
                &br#"{"jsonrpc":"2.0","id":"r0","method":"roots/list"}"#[..],
                "test-session",
            )
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let refusal = decode_message(line.as_bytes()).unwrap();
        assert_eq!(refusal.id, Some(MessageId::from("r0")));
        assert_eq!(refusal.error.unwrap().code, JsonRpcError::NOT_INITIALIZED);

        // Complete the handshake.
        let init = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.initialize("test-session").await })
        };
        let line = lines.next_line().await.unwrap().unwrap();
        let request = decode_message(line.as_bytes()).unwrap();
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Info {
                name: "test-server".to_string(),
                version: "1.0".to_string(),
            },
        };
        let response = JsonRpcMessage::success(
            request.id.unwrap(),
            serde_json::to_value(result).unwrap(),
        );
        let bytes = serde_json::to_vec(&response).unwrap();
        client.handle_msg(&bytes[..], "test-session").await.unwrap();
        init.await.unwrap().unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let notification = decode_message(line.as_bytes()).unwrap();
        assert_eq!(
            notification.method.as_deref(),
            Some(NOTIFICATION_INITIALIZED)
        );

        // The same request now reaches the handler.
        client
            .handle_msg(
                &br#"{"jsonrpc":"2.0","id":"r1","method":"roots/list"}"#[..],
                "test-session",
            )
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response = decode_message(line.as_bytes()).unwrap();
        assert_eq!(response.id, Some(MessageId::from("r1")));
        let roots: RootList = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(roots.roots[0].uri, "test://root");
    }
}
