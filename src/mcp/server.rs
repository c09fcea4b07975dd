//! Multi-session MCP server coordinator.
//!
//! The coordinator owns the set of live sessions, routes inbound
//! frames to a session by id, fans change events from the configured
//! updaters out to every session, and issues the server-initiated
//! requests (`roots/list`, `sampling/createMessage`).
//!
//! Capability advertisement is a pure function of what was supplied
//! to the builder: a prompt server sets `prompts`, adding a prompt
//! list updater sets `prompts.listChanged`, and so on. The record is
//! computed once at build time and returned on every handshake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

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
    LogHandler, ProgressReporter, PromptListUpdater, PromptServer, ResourceListUpdater,
    ResourceServer, ResourceSubscribedUpdater, RootsListWatcher, ToolListUpdater, ToolServer,
};
use crate::mcp::session::{SessionCore, SessionTimeouts};
use crate::mcp::types::{
    CancelledParams, ClientCapabilities, CompletionCompleteParams, Info, InitializeParams,
    InitializeResult, LogParams, LoggingCapability, ProgressParams, PromptsCapability,
    PromptsGetParams, PromptsListParams, ResourceList, ResourcesCapability, ResourcesListParams,
    ResourcesReadParams, ResourcesSubscribeParams, ResourcesTemplatesListParams,
    ResourcesUpdatedParams, RootList, SamplingParams, SamplingResult, ServerCapabilities,
    ToolsCallParams, ToolsCapability, ToolsListParams, COMPLETION_REF_PROMPT,
    COMPLETION_REF_RESOURCE, PROTOCOL_VERSION,
};
use crate::utils::error::{McpError, McpResult};

/// The server identity and handshake requirements, implemented by the
/// embedding application.
pub trait Server: Send + Sync {
    /// Identity returned in the `initialize` response.
    fn info(&self) -> Info;

    /// Capabilities the client must advertise for the handshake to
    /// succeed. Defaults to none.
    fn required_client_capabilities(&self) -> ClientCapabilities {
        ClientCapabilities::default()
    }
}

/// Builder collecting the optional providers, updaters, and timeout
/// overrides of a server.
#[derive(Default)]
pub struct McpServerBuilder {
    prompt_server: Option<Arc<dyn PromptServer>>,
    prompt_list_updater: Option<Arc<dyn PromptListUpdater>>,
    resource_server: Option<Arc<dyn ResourceServer>>,
    resource_list_updater: Option<Arc<dyn ResourceListUpdater>>,
    resource_subscribed_updater: Option<Arc<dyn ResourceSubscribedUpdater>>,
    tool_server: Option<Arc<dyn ToolServer>>,
    tool_list_updater: Option<Arc<dyn ToolListUpdater>>,
    roots_list_watcher: Option<Arc<dyn RootsListWatcher>>,
    log_handler: Option<Arc<dyn LogHandler>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    write_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    ping_interval: Option<Duration>,
}

impl std::fmt::Debug for McpServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerBuilder")
            .field("prompt_server", &self.prompt_server.is_some())
            .field("resource_server", &self.resource_server.is_some())
            .field("tool_server", &self.tool_server.is_some())
            .field("log_handler", &self.log_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl McpServerBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the prompt catalog.
    pub fn with_prompt_server(mut self, server: Arc<dyn PromptServer>) -> Self {
        self.prompt_server = Some(server);
        self
    }

    /// Announce prompt catalog changes to every session.
    pub fn with_prompt_list_updater(mut self, updater: Arc<dyn PromptListUpdater>) -> Self {
        self.prompt_list_updater = Some(updater);
        self
    }

    /// Serve the resource catalog.
    pub fn with_resource_server(mut self, server: Arc<dyn ResourceServer>) -> Self {
        self.resource_server = Some(server);
        self
    }

    /// Announce resource catalog changes to every session.
    pub fn with_resource_list_updater(mut self, updater: Arc<dyn ResourceListUpdater>) -> Self {
        self.resource_list_updater = Some(updater);
        self
    }

    /// Announce subscribed-resource changes to every session.
    pub fn with_resource_subscribed_updater(
        mut self,
        updater: Arc<dyn ResourceSubscribedUpdater>,
    ) -> Self {
        self.resource_subscribed_updater = Some(updater);
        self
    }

    /// Serve the tool catalog.
    pub fn with_tool_server(mut self, server: Arc<dyn ToolServer>) -> Self {
        self.tool_server = Some(server);
        self
    }

    /// Announce tool catalog changes to every session.
    pub fn with_tool_list_updater(mut self, updater: Arc<dyn ToolListUpdater>) -> Self {
        self.tool_list_updater = Some(updater);
        self
    }

    /// Observe the client's `roots/list_changed` notifications.
    pub fn with_roots_list_watcher(mut self, watcher: Arc<dyn RootsListWatcher>) -> Self {
        self.roots_list_watcher = Some(watcher);
        self
    }

    /// Stream log records to every session.
    pub fn with_log_handler(mut self, handler: Arc<dyn LogHandler>) -> Self {
        self.log_handler = Some(handler);
        self
    }

    /// Route progress reports to the session that asked for them.
    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
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
    pub fn build<S: Server>(self, server: &S) -> McpServer {
        let mut capabilities = ServerCapabilities::default();
        if self.prompt_server.is_some() {
            capabilities.prompts = Some(PromptsCapability {
                list_changed: self.prompt_list_updater.is_some(),
            });
        }
        if self.resource_server.is_some() {
            capabilities.resources = Some(ResourcesCapability {
                subscribe: self.resource_subscribed_updater.is_some(),
                list_changed: self.resource_list_updater.is_some(),
            });
        }
        if self.tool_server.is_some() {
            capabilities.tools = Some(ToolsCapability {
                list_changed: self.tool_list_updater.is_some(),
            });
        }
        if self.log_handler.is_some() {
            capabilities.logging = Some(LoggingCapability {});
        }

        let timeouts = SessionTimeouts {
            write_timeout: self.write_timeout.unwrap_or(super::DEFAULT_WRITE_TIMEOUT),
            read_timeout: self.read_timeout.unwrap_or(super::DEFAULT_READ_TIMEOUT),
            ping_interval: self.ping_interval.unwrap_or(super::DEFAULT_PING_INTERVAL),
        };
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        McpServer {
            capabilities,
            server_info: server.info(),
            required_client_capabilities: server.required_client_capabilities(),
            sessions: Arc::new(StdMutex::new(HashMap::new())),
            progresses: Arc::new(StdMutex::new(HashMap::new())),
            prompt_server: self.prompt_server,
            prompt_list_updater: self.prompt_list_updater,
            resource_server: self.resource_server,
            resource_list_updater: self.resource_list_updater,
            resource_subscribed_updater: self.resource_subscribed_updater,
            tool_server: self.tool_server,
            tool_list_updater: self.tool_list_updater,
            roots_list_watcher: self.roots_list_watcher,
            log_handler: self.log_handler,
            progress_reporter: self.progress_reporter,
            timeouts,
            stop_tx,
            stop_rx: StdMutex::new(Some(stop_rx)),
            close: CancellationToken::new(),
        }
    }
}

/// One session as the server sees it: the shared core plus the
/// negotiated client record and the notification inboxes the fan-out
/// tasks send into.
pub(crate) struct ServerSession {
    pub(crate) core: Arc<SessionCore>,
    client_info: StdMutex<Option<Info>>,
    client_capabilities: StdMutex<Option<ClientCapabilities>>,
    prompts_list_tx: mpsc::Sender<()>,
    resources_list_tx: mpsc::Sender<()>,
    resources_subscribe_tx: mpsc::Sender<String>,
    tools_list_tx: mpsc::Sender<()>,
    log_tx: mpsc::Sender<LogParams>,
    progress_tx: mpsc::Sender<ProgressParams>,
}

impl ServerSession {
    /// Construct the session and start its fan-in loop, which turns
    /// inbox events into outbound notification frames.
    fn spawn(core: Arc<SessionCore>) -> Arc<Self> {
        let (prompts_list_tx, mut prompts_list_rx) = mpsc::channel::<()>(1);
        let (resources_list_tx, mut resources_list_rx) = mpsc::channel::<()>(1);
        let (resources_subscribe_tx, mut resources_subscribe_rx) = mpsc::channel::<String>(1);
        let (tools_list_tx, mut tools_list_rx) = mpsc::channel::<()>(1);
        let (log_tx, mut log_rx) = mpsc::channel::<LogParams>(1);
        let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressParams>(1);

        let sess = Arc::new(Self {
            core: Arc::clone(&core),
            client_info: StdMutex::new(None),
            client_capabilities: StdMutex::new(None),
            prompts_list_tx,
            resources_list_tx,
            resources_subscribe_tx,
            tools_list_tx,
            log_tx,
            progress_tx,
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = core.cancel.cancelled() => return,
                    Some(()) = prompts_list_rx.recv() => {
                        let _ = core
                            .send_notification(NOTIFICATION_PROMPTS_LIST_CHANGED, None)
                            .await;
                    }
                    Some(()) = resources_list_rx.recv() => {
                        let _ = core
                            .send_notification(NOTIFICATION_RESOURCES_LIST_CHANGED, None)
                            .await;
                    }
                    Some(uri) = resources_subscribe_rx.recv() => {
                        let params = ResourcesUpdatedParams { uri };
                        let _ = core
                            .send_notification(
                                NOTIFICATION_RESOURCES_UPDATED,
                                serde_json::to_value(params).ok(),
                            )
                            .await;
                    }
                    Some(()) = tools_list_rx.recv() => {
                        let _ = core
                            .send_notification(NOTIFICATION_TOOLS_LIST_CHANGED, None)
                            .await;
                    }
                    Some(params) = log_rx.recv() => {
                        let _ = core
                            .send_notification(
                                NOTIFICATION_MESSAGE,
                                serde_json::to_value(params).ok(),
                            )
                            .await;
                    }
                    Some(params) = progress_rx.recv() => {
                        let _ = core
                            .send_notification(
                                NOTIFICATION_PROGRESS,
                                serde_json::to_value(params).ok(),
                            )
                            .await;
                    }
                    else => return,
                }
            }
        });

        sess
    }
}

/// Removes the progress-token routing entry when the owning request
/// finishes, including when its handler is aborted.
struct ProgressGuard {
    progresses: Arc<StdMutex<HashMap<String, String>>>,
    token: Option<String>,
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.progresses.lock().unwrap().remove(&token);
        }
    }
}

/// The multi-session server coordinator.
pub struct McpServer {
    capabilities: ServerCapabilities,
    server_info: Info,
    required_client_capabilities: ClientCapabilities,
    sessions: Arc<StdMutex<HashMap<String, Arc<ServerSession>>>>,
    /// progress token -> session id, consulted by the progress router
    progresses: Arc<StdMutex<HashMap<String, String>>>,
    prompt_server: Option<Arc<dyn PromptServer>>,
    prompt_list_updater: Option<Arc<dyn PromptListUpdater>>,
    resource_server: Option<Arc<dyn ResourceServer>>,
    resource_list_updater: Option<Arc<dyn ResourceListUpdater>>,
    resource_subscribed_updater: Option<Arc<dyn ResourceSubscribedUpdater>>,
    tool_server: Option<Arc<dyn ToolServer>>,
    tool_list_updater: Option<Arc<dyn ToolListUpdater>>,
    roots_list_watcher: Option<Arc<dyn RootsListWatcher>>,
    log_handler: Option<Arc<dyn LogHandler>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    timeouts: SessionTimeouts,
    stop_tx: mpsc::UnboundedSender<String>,
    stop_rx: StdMutex<Option<mpsc::UnboundedReceiver<String>>>,
    close: CancellationToken,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("server_info", &self.server_info)
            .field("capabilities", &self.capabilities)
            .field("sessions", &self.sessions.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// The capability record advertised during the handshake.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// The server identity.
    pub fn info(&self) -> &Info {
        &self.server_info
    }

    /// Launch the session collector and one fan-out task per
    /// configured updater. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let Some(mut stop_rx) = self.stop_rx.lock().unwrap().take() else {
            debug!("server already started");
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

        if let Some(updater) = &self.prompt_list_updater {
            self.spawn_unit_fanout(updater.prompt_list_updates(), |sess| &sess.prompts_list_tx);
        }
        if let Some(updater) = &self.resource_list_updater {
            self.spawn_unit_fanout(updater.resource_list_updates(), |sess| {
                &sess.resources_list_tx
            });
        }
        if let Some(updater) = &self.resource_subscribed_updater {
            self.spawn_subscribe_fanout(updater.resource_subscriber_updates());
        }
        if let Some(updater) = &self.tool_list_updater {
            self.spawn_unit_fanout(updater.tool_list_updates(), |sess| &sess.tools_list_tx);
        }
        if let Some(handler) = &self.log_handler {
            self.spawn_log_fanout(handler.log_streams());
        }
        if let Some(reporter) = &self.progress_reporter {
            self.spawn_progress_routing(reporter.progress_reports());
        }
    }

    /// Fan a unit change event out to every live session.
    ///
    /// Each inbox send is raced against the close token so shutdown
    /// is never blocked by a slow session; inboxes hold one event, so
    /// a session that is not consuming back-pressures the producer.
    fn spawn_unit_fanout(
        &self,
        mut updates: mpsc::Receiver<()>,
        pick: for<'a> fn(&'a ServerSession) -> &'a mpsc::Sender<()>,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let close = self.close.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = close.cancelled() => return,
                    ev = updates.recv() => if ev.is_none() { return; }
                }
                let targets: Vec<Arc<ServerSession>> =
                    sessions.lock().unwrap().values().cloned().collect();
                for sess in targets {
                    tokio::select! {
                        _ = close.cancelled() => return,
                        _ = pick(sess.as_ref()).send(()) => {}
                    }
                }
            }
        });
    }

    fn spawn_subscribe_fanout(&self, mut updates: mpsc::Receiver<String>) {
        let sessions = Arc::clone(&self.sessions);
        let close = self.close.clone();
        tokio::spawn(async move {
            loop {
                let uri = tokio::select! {
                    _ = close.cancelled() => return,
                    uri = updates.recv() => match uri {
                        Some(uri) => uri,
                        None => return,
                    }
                };
                let targets: Vec<Arc<ServerSession>> =
                    sessions.lock().unwrap().values().cloned().collect();
                for sess in targets {
                    tokio::select! {
                        _ = close.cancelled() => return,
                        _ = sess.resources_subscribe_tx.send(uri.clone()) => {}
                    }
                }
            }
        });
    }

    fn spawn_log_fanout(&self, mut logs: mpsc::Receiver<LogParams>) {
        let sessions = Arc::clone(&self.sessions);
        let close = self.close.clone();
        tokio::spawn(async move {
            loop {
                let params = tokio::select! {
                    _ = close.cancelled() => return,
                    params = logs.recv() => match params {
                        Some(params) => params,
                        None => return,
                    }
                };
                let targets: Vec<Arc<ServerSession>> =
                    sessions.lock().unwrap().values().cloned().collect();
                for sess in targets {
                    tokio::select! {
                        _ = close.cancelled() => return,
                        _ = sess.log_tx.send(params.clone()) => {}
                    }
                }
            }
        });
    }

    /// Route progress reports to the session whose request carried
    /// the matching token. Reports with no mapping are dropped.
    fn spawn_progress_routing(&self, mut reports: mpsc::Receiver<ProgressParams>) {
        let sessions = Arc::clone(&self.sessions);
        let progresses = Arc::clone(&self.progresses);
        let close = self.close.clone();
        tokio::spawn(async move {
            loop {
                let params = tokio::select! {
                    _ = close.cancelled() => return,
                    params = reports.recv() => match params {
                        Some(params) => params,
                        None => return,
                    }
                };
                let session_id = progresses
                    .lock()
                    .unwrap()
                    .get(&params.progress_token)
                    .cloned();
                let Some(session_id) = session_id else {
                    debug!(token = %params.progress_token, "no session for progress token");
                    continue;
                };
                let sess = sessions.lock().unwrap().get(&session_id).cloned();
                let Some(sess) = sess else { continue };
                tokio::select! {
                    _ = close.cancelled() => return,
                    _ = sess.progress_tx.send(params) => {}
                }
            }
        });
    }

    /// Allocate a session around the transport's write sink and start
    /// its reader-side state. Returns the new session id.
    pub fn start_session<W>(&self, writer: W) -> String
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let session_id = Uuid::new_v4().to_string();
        let core = Arc::new(SessionCore::new(
            session_id.clone(),
            Box::new(writer),
            self.timeouts,
            self.stop_tx.clone(),
        ));
        core.spawn_ping_loop();
        let sess = ServerSession::spawn(core);
        self.sessions.lock().unwrap().insert(session_id.clone(), sess);
        debug!(session = %session_id, "session started");
        session_id
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// The client capability record a session negotiated, if its
    /// handshake reached `initialize`.
    pub fn client_capabilities(&self, session_id: &str) -> McpResult<Option<ClientCapabilities>> {
        let sess = self.session(session_id)?;
        let caps = sess.client_capabilities.lock().unwrap().clone();
        Ok(caps)
    }

    /// The identity a session's client sent in `initialize`, if any.
    pub fn client_info(&self, session_id: &str) -> McpResult<Option<Info>> {
        let sess = self.session(session_id)?;
        let info = sess.client_info.lock().unwrap().clone();
        Ok(info)
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
        let sessions: Vec<Arc<ServerSession>> =
            self.sessions.lock().unwrap().values().cloned().collect();
        for sess in sessions {
            sess.core.terminate();
        }
        self.close.cancel();
        debug!("server stopped");
    }

    /// Ask the client behind `session_id` for its root list.
    pub async fn roots_list(&self, session_id: &str) -> McpResult<RootList> {
        let sess = self.session(session_id)?;
        let value = sess.core.send_request(METHOD_ROOTS_LIST, None).await?;
        serde_json::from_value(value).map_err(|e| McpError::InvalidJson(e.to_string()))
    }

    /// Ask the client behind `session_id` to run an LLM sampling
    /// request on the server's behalf.
    pub async fn create_sample_message(
        &self,
        session_id: &str,
        params: SamplingParams,
    ) -> McpResult<SamplingResult> {
        let sess = self.session(session_id)?;
        let params = serde_json::to_value(params).map_err(|e| McpError::Internal(e.to_string()))?;
        let value = sess
            .core
            .send_request(METHOD_SAMPLING_CREATE_MESSAGE, Some(params))
            .await?;
        serde_json::from_value(value).map_err(|e| McpError::InvalidJson(e.to_string()))
    }

    fn session(&self, session_id: &str) -> McpResult<Arc<ServerSession>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| McpError::SessionNotFound(session_id.to_string()))
    }

    /// Record the progress-token routing for a freshly dispatched
    /// request; the returned guard removes it when the handler
    /// finishes or is aborted.
    fn progress_guard(&self, sess: &ServerSession, token: Option<String>) -> ProgressGuard {
        if let Some(token) = &token {
            self.progresses
                .lock()
                .unwrap()
                .insert(token.clone(), sess.core.id.clone());
        }
        ProgressGuard {
            progresses: Arc::clone(&self.progresses),
            token,
        }
    }

    async fn handle_request(
        &self,
        sess: Arc<ServerSession>,
        msg: JsonRpcMessage,
    ) -> McpResult<()> {
        let (Some(id), Some(method)) = (msg.id.clone(), msg.method.clone()) else {
            return Err(McpError::InvalidRequest("malformed request frame".to_string()));
        };

        match method.as_str() {
            // Both handshake-independent methods come first: ping is
            // answered in any state, initialize drives the handshake.
            METHOD_PING => sess.core.send_response(id, Value::Object(Map::new())).await,
            METHOD_INITIALIZE => self.handle_initialize(sess, id, msg.params).await,
            _ if !sess.core.is_initialized() => {
                warn!(session = %sess.core.id, method = %method, "request before handshake completed");
                sess.core.send_error(id, JsonRpcError::not_initialized()).await
            }
            METHOD_PROMPTS_LIST => self.handle_prompts_list(sess, id, msg.params).await,
            METHOD_PROMPTS_GET => self.handle_prompts_get(sess, id, msg.params).await,
            METHOD_RESOURCES_LIST => self.handle_resources_list(sess, id, msg.params).await,
            METHOD_RESOURCES_READ => self.handle_resources_read(sess, id, msg.params).await,
            METHOD_RESOURCES_TEMPLATES_LIST => {
                self.handle_resources_templates_list(sess, id, msg.params).await
            }
            METHOD_RESOURCES_SUBSCRIBE => {
                self.handle_resources_subscribe(sess, id, msg.params).await
            }
            METHOD_TOOLS_LIST => self.handle_tools_list(sess, id, msg.params).await,
            METHOD_TOOLS_CALL => self.handle_tools_call(sess, id, msg.params).await,
            METHOD_COMPLETION_COMPLETE => {
                self.handle_completion_complete(sess, id, msg.params).await
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

    fn handle_notification(&self, sess: Arc<ServerSession>, msg: JsonRpcMessage) -> McpResult<()> {
        let method = msg.method.as_deref().unwrap_or_default();
        match method {
            NOTIFICATION_INITIALIZED => {
                sess.core.mark_initialized();
                Ok(())
            }
            NOTIFICATION_CANCELLED => {
                let params: CancelledParams = decode_params(msg.params)?;
                sess.core.cancel_running(&params.request_id, &params.reason);
                Ok(())
            }
            NOTIFICATION_ROOTS_LIST_CHANGED => {
                if let Some(watcher) = &self.roots_list_watcher {
                    watcher.on_roots_list_changed();
                }
                Ok(())
            }
            other => {
                debug!(method = %other, "ignoring unknown notification");
                Ok(())
            }
        }
    }

    async fn handle_initialize(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let params: InitializeParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };

        if let Some(missing) =
            missing_client_capability(&self.required_client_capabilities, &params.capabilities)
        {
            warn!(session = %sess.core.id, missing, "client lacks required capability");
            return sess
                .core
                .send_error(
                    id,
                    JsonRpcError::capability_not_supported(&format!(
                        "missing required capability: {}",
                        missing
                    )),
                )
                .await;
        }

        debug!(
            session = %sess.core.id,
            client = %params.client_info.name,
            protocol = %params.protocol_version,
            "initialize requested"
        );
        *sess.client_info.lock().unwrap() = Some(params.client_info);
        *sess.client_capabilities.lock().unwrap() = Some(params.capabilities);

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
        };
        let value = serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))?;
        sess.core.send_response(id, value).await
    }

    async fn handle_prompts_list(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.prompt_server.clone() else {
            return self.reject_unsupported(&sess, id, METHOD_PROMPTS_LIST).await;
        };
        let params: PromptsListParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        let token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        let guard = self.progress_guard(&sess, token.clone());
        sess.core.spawn_request_handler(id, async move {
            let _guard = guard;
            let list = provider
                .list_prompts(params.cursor.as_deref(), token.as_deref())
                .await?;
            serde_json::to_value(list).map_err(|e| McpError::Internal(e.to_string()))
        });
        Ok(())
    }

    async fn handle_prompts_get(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.prompt_server.clone() else {
            return self.reject_unsupported(&sess, id, METHOD_PROMPTS_GET).await;
        };
        let params: PromptsGetParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        let token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        let guard = self.progress_guard(&sess, token.clone());
        sess.core.spawn_request_handler(id, async move {
            let _guard = guard;
            let result = provider
                .get_prompt(&params.name, &params.arguments, token.as_deref())
                .await?;
            serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
        });
        Ok(())
    }

    async fn handle_resources_list(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.resource_server.clone() else {
            return self.reject_unsupported(&sess, id, METHOD_RESOURCES_LIST).await;
        };
        let params: ResourcesListParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        let token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        let guard = self.progress_guard(&sess, token.clone());
        sess.core.spawn_request_handler(id, async move {
            let _guard = guard;
            let list: ResourceList = provider
                .list_resources(params.cursor.as_deref(), token.as_deref())
                .await?;
            serde_json::to_value(list).map_err(|e| McpError::Internal(e.to_string()))
        });
        Ok(())
    }

    async fn handle_resources_read(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.resource_server.clone() else {
            return self.reject_unsupported(&sess, id, METHOD_RESOURCES_READ).await;
        };
        let params: ResourcesReadParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        let token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        let guard = self.progress_guard(&sess, token.clone());
        sess.core.spawn_request_handler(id, async move {
            let _guard = guard;
            let resource = provider
                .read_resource(&params.uri, token.as_deref())
                .await?;
            serde_json::to_value(resource).map_err(|e| McpError::Internal(e.to_string()))
        });
        Ok(())
    }

    async fn handle_resources_templates_list(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.resource_server.clone() else {
            return self
                .reject_unsupported(&sess, id, METHOD_RESOURCES_TEMPLATES_LIST)
                .await;
        };
        let params: ResourcesTemplatesListParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        let token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        let guard = self.progress_guard(&sess, token.clone());
        sess.core.spawn_request_handler(id, async move {
            let _guard = guard;
            let templates = provider.list_resource_templates(token.as_deref()).await?;
            serde_json::to_value(templates).map_err(|e| McpError::Internal(e.to_string()))
        });
        Ok(())
    }

    async fn handle_resources_subscribe(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.resource_server.clone() else {
            return self
                .reject_unsupported(&sess, id, METHOD_RESOURCES_SUBSCRIBE)
                .await;
        };
        let params: ResourcesSubscribeParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        sess.core.spawn_request_handler(id, async move {
            provider.subscribe_resource(&params.uri).await?;
            Ok(Value::Null)
        });
        Ok(())
    }

    async fn handle_tools_list(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.tool_server.clone() else {
            return self.reject_unsupported(&sess, id, METHOD_TOOLS_LIST).await;
        };
        let params: ToolsListParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        let token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        let guard = self.progress_guard(&sess, token.clone());
        sess.core.spawn_request_handler(id, async move {
            let _guard = guard;
            let list = provider
                .list_tools(params.cursor.as_deref(), token.as_deref())
                .await?;
            serde_json::to_value(list).map_err(|e| McpError::Internal(e.to_string()))
        });
        Ok(())
    }

    async fn handle_tools_call(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let Some(provider) = self.tool_server.clone() else {
            return self.reject_unsupported(&sess, id, METHOD_TOOLS_CALL).await;
        };
        let params: ToolsCallParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };
        let token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        let guard = self.progress_guard(&sess, token.clone());
        sess.core.spawn_request_handler(id, async move {
            let _guard = guard;
            let result = provider
                .call_tool(&params.name, &params.arguments, token.as_deref())
                .await?;
            serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
        });
        Ok(())
    }

    async fn handle_completion_complete(
        &self,
        sess: Arc<ServerSession>,
        id: MessageId,
        params: Option<Value>,
    ) -> McpResult<()> {
        let params: CompletionCompleteParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return sess.core.send_error(id, e.to_wire()).await,
        };

        match params.completion_ref.ref_type.as_str() {
            COMPLETION_REF_PROMPT => {
                let Some(provider) = self.prompt_server.clone() else {
                    return self
                        .reject_unsupported(&sess, id, METHOD_COMPLETION_COMPLETE)
                        .await;
                };
                sess.core.spawn_request_handler(id, async move {
                    let result = provider
                        .complete_prompt(&params.completion_ref.name, params.argument)
                        .await?;
                    serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
                });
                Ok(())
            }
            COMPLETION_REF_RESOURCE => {
                let Some(provider) = self.resource_server.clone() else {
                    return self
                        .reject_unsupported(&sess, id, METHOD_COMPLETION_COMPLETE)
                        .await;
                };
                if params.completion_ref.uri.is_empty() {
                    return sess
                        .core
                        .send_error(
                            id,
                            JsonRpcError::invalid_params("resource completion ref carries no uri"),
                        )
                        .await;
                }
                sess.core.spawn_request_handler(id, async move {
                    let result = provider
                        .complete_resource(&params.completion_ref.uri, params.argument)
                        .await?;
                    serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
                });
                Ok(())
            }
            other => {
                sess.core
                    .send_error(
                        id,
                        JsonRpcError::invalid_params(&format!(
                            "unknown completion ref type: {}",
                            other
                        )),
                    )
                    .await
            }
        }
    }

    async fn reject_unsupported(
        &self,
        sess: &ServerSession,
        id: MessageId,
        method: &str,
    ) -> McpResult<()> {
        debug!(session = %sess.core.id, method, "method not supported by this server");
        sess.core
            .send_error(
                id,
                JsonRpcError::method_not_found(&format!("method '{}' not supported", method)),
            )
            .await
    }
}

fn missing_client_capability(
    required: &ClientCapabilities,
    advertised: &ClientCapabilities,
) -> Option<&'static str> {
    if let Some(required_roots) = &required.roots {
        let Some(advertised_roots) = &advertised.roots else {
            return Some("roots");
        };
        if required_roots.list_changed && !advertised_roots.list_changed {
            return Some("roots.listChanged");
        }
    }
    if required.sampling.is_some() && advertised.sampling.is_none() {
        return Some("sampling");
    }
    None
}
