//! End-to-end scenarios: a client and a server coordinator wired
//! together over in-memory pipes, with newline-delimited frames
//! pumped between them the way a stdio transport would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time;

use mcp_peer::mcp::providers::{
    PromptServer, ResourceServer, ResourceSubscribedUpdater, ResourceSubscribedWatcher,
    RootsListHandler, SamplingHandler, ToolServer,
};
use mcp_peer::mcp::types::{
    CompletionArgument, CompletionResult, Completion, Content, Info, Prompt, PromptList,
    PromptMessage, PromptResult, Resource, ResourceList, ResourceTemplate, Role, Root, RootList,
    SamplingContent, SamplingMessage, SamplingModelPreferences, SamplingParams, SamplingResult,
    ToolList, ToolResult,
};
use mcp_peer::{
    Client, JsonRpcError, McpClient, McpClientBuilder, McpError, McpResult, McpServer,
    McpServerBuilder, Server,
};

struct TestServer;

impl Server for TestServer {
    fn info(&self) -> Info {
        Info {
            name: "test-server".to_string(),
            version: "1.0".to_string(),
        }
    }
}

struct TestClient;

impl Client for TestClient {
    fn info(&self) -> Info {
        Info {
            name: "test-client".to_string(),
            version: "0.1".to_string(),
        }
    }
}

struct FixturePromptServer {
    seen_token: Mutex<Option<String>>,
}

impl FixturePromptServer {
    fn new() -> Self {
        Self {
            seen_token: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PromptServer for FixturePromptServer {
    async fn list_prompts(
        &self,
        _cursor: Option<&str>,
        _progress_token: Option<&str>,
    ) -> McpResult<PromptList> {
        Ok(PromptList {
            prompts: vec![Prompt {
                name: "test-prompt".to_string(),
                description: "Test Prompt".to_string(),
                arguments: vec![],
            }],
            next_cursor: None,
        })
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
        progress_token: Option<&str>,
    ) -> McpResult<PromptResult> {
        *self.seen_token.lock().unwrap() = progress_token.map(str::to_string);
        if name != "test-prompt" {
            return Err(McpError::InvalidParams(format!("unknown prompt: {}", name)));
        }
        if arguments.get("test-arg").map(String::as_str) != Some("test-value") {
            return Err(McpError::InvalidParams("missing test-arg".to_string()));
        }
        Ok(PromptResult {
            description: "Test Prompt".to_string(),
            messages: vec![PromptMessage {
                role: Role::Assistant,
                content: Content::text("Test response message"),
            }],
        })
    }

    async fn complete_prompt(
        &self,
        _name: &str,
        _argument: CompletionArgument,
    ) -> McpResult<CompletionResult> {
        Ok(CompletionResult {
            completion: Completion {
                values: vec!["test-value1".to_string(), "test-value2".to_string()],
                has_more: true,
            },
        })
    }
}

struct FixtureResourceServer;

#[async_trait]
impl ResourceServer for FixtureResourceServer {
    async fn list_resources(
        &self,
        _cursor: Option<&str>,
        _progress_token: Option<&str>,
    ) -> McpResult<ResourceList> {
        Ok(ResourceList {
            resources: vec![Resource {
                uri: "test://resource".to_string(),
                name: "Test Resource".to_string(),
                ..Resource::default()
            }],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        uri: &str,
        _progress_token: Option<&str>,
    ) -> McpResult<Resource> {
        Ok(Resource {
            uri: uri.to_string(),
            name: "Test Resource".to_string(),
            description: "A test resource".to_string(),
            mime_type: "text/plain".to_string(),
            text: Some("This is the resource content".to_string()),
            blob: None,
        })
    }

    async fn list_resource_templates(
        &self,
        _progress_token: Option<&str>,
    ) -> McpResult<Vec<ResourceTemplate>> {
        Ok(vec![ResourceTemplate {
            uri_template: "test://resource/{name}".to_string(),
            name: "Test Template".to_string(),
            ..ResourceTemplate::default()
        }])
    }

    async fn subscribe_resource(&self, _uri: &str) -> McpResult<()> {
        Ok(())
    }

    async fn complete_resource(
        &self,
        _uri: &str,
        _argument: CompletionArgument,
    ) -> McpResult<CompletionResult> {
        Ok(CompletionResult::default())
    }
}

/// Signals when the tool handler future is dropped, which is how an
/// aborted call manifests.
struct DropSignal(mpsc::UnboundedSender<()>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

struct SlowToolServer {
    dropped_tx: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl ToolServer for SlowToolServer {
    async fn list_tools(
        &self,
        _cursor: Option<&str>,
        _progress_token: Option<&str>,
    ) -> McpResult<ToolList> {
        Ok(ToolList::default())
    }

    async fn call_tool(
        &self,
        _name: &str,
        _arguments: &HashMap<String, Value>,
        _progress_token: Option<&str>,
    ) -> McpResult<ToolResult> {
        let _guard = DropSignal(self.dropped_tx.clone());
        time::sleep(Duration::from_secs(3600)).await;
        Ok(ToolResult::default())
    }
}

struct TakeOnceSubscribedUpdater {
    rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl ResourceSubscribedUpdater for TakeOnceSubscribedUpdater {
    fn resource_subscriber_updates(&self) -> mpsc::Receiver<String> {
        self.rx.lock().unwrap().take().expect("updates taken once")
    }
}

struct RecordingSubscribedWatcher {
    tx: mpsc::UnboundedSender<String>,
}

impl ResourceSubscribedWatcher for RecordingSubscribedWatcher {
    fn on_resource_subscribed_changed(&self, uri: &str) {
        let _ = self.tx.send(uri.to_string());
    }
}

struct FixtureRootsHandler;

#[async_trait]
impl RootsListHandler for FixtureRootsHandler {
    async fn roots_list(&self) -> McpResult<RootList> {
        Ok(RootList {
            roots: vec![Root {
                uri: "test://root".to_string(),
                name: "Test Root".to_string(),
            }],
        })
    }
}

struct FixtureSamplingHandler;

#[async_trait]
impl SamplingHandler for FixtureSamplingHandler {
    async fn create_sample_message(&self, _params: SamplingParams) -> McpResult<SamplingResult> {
        Ok(SamplingResult {
            role: Role::Assistant,
            content: SamplingContent {
                content_type: "text".to_string(),
                text: "Test response".to_string(),
            },
            model: "test-model".to_string(),
            stop_reason: "completed".to_string(),
        })
    }
}

/// Both peers connected through two in-memory pipes, one per
/// direction, with a pump task splitting frames on newlines.
struct Peers {
    server: Arc<McpServer>,
    client: Arc<McpClient>,
    server_session_id: String,
    client_session_id: String,
}

fn server_builder() -> McpServerBuilder {
    McpServerBuilder::new()
        .with_write_timeout(Duration::from_secs(2))
        .with_read_timeout(Duration::from_secs(2))
        .with_ping_interval(Duration::from_secs(60))
}

fn client_builder() -> McpClientBuilder {
    McpClientBuilder::new()
        .with_write_timeout(Duration::from_secs(2))
        .with_read_timeout(Duration::from_secs(2))
        .with_ping_interval(Duration::from_secs(60))
}

fn connect(server: McpServer, client: McpClient) -> Peers {
    let server = Arc::new(server);
    let client = Arc::new(client);
    server.start();
    client.start();

    let (client_writer, server_reader) = tokio::io::duplex(1 << 16);
    let (server_writer, client_reader) = tokio::io::duplex(1 << 16);

    let server_session_id = server.start_session(server_writer);
    let client_session_id = "test-session".to_string();
    client.start_session(client_writer, &client_session_id);

    {
        let server = Arc::clone(&server);
        let session_id = server_session_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = server.handle_msg(line.as_bytes(), &session_id).await;
            }
        });
    }
    {
        let client = Arc::clone(&client);
        let session_id = client_session_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(client_reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = client.handle_msg(line.as_bytes(), &session_id).await;
            }
        });
    }

    Peers {
        server,
        client,
        server_session_id,
        client_session_id,
    }
}

#[tokio::test]
async fn test_handshake_gates_the_method_surface() {
    let server = server_builder()
        .with_prompt_server(Arc::new(FixturePromptServer::new()))
        .build(&TestServer);
    let client = client_builder()
        .with_roots_list_handler(Arc::new(FixtureRootsHandler))
        .build(&TestClient);
    let peers = connect(server, client);

    // Before the third handshake step, domain requests are rejected.
    let err = peers
        .client
        .list_prompts(&peers.client_session_id, None, None)
        .await
        .unwrap_err();
    match err {
        McpError::JsonRpc(err) => assert_eq!(err.code, JsonRpcError::NOT_INITIALIZED),
        other => panic!("expected wire error, got {:?}", other),
    }

    // The gate is symmetric: a server-initiated request is refused by
    // the client until the handshake completes, handler or not.
    let err = peers
        .server
        .roots_list(&peers.server_session_id)
        .await
        .unwrap_err();
    match err {
        McpError::JsonRpc(err) => assert_eq!(err.code, JsonRpcError::NOT_INITIALIZED),
        other => panic!("expected wire error, got {:?}", other),
    }

    let result = peers.client.initialize(&peers.client_session_id).await.unwrap();
    assert_eq!(result.server_info.name, "test-server");
    assert_eq!(result.server_info.version, "1.0");
    assert!(result.capabilities.prompts.is_some());

    // Both peers retain what they learned during the handshake.
    let server_info = peers.client.server_info(&peers.client_session_id).unwrap();
    assert_eq!(server_info.unwrap().name, "test-server");
    let client_info = peers.server.client_info(&peers.server_session_id).unwrap();
    assert_eq!(client_info.unwrap().name, "test-client");

    let prompts = peers
        .client
        .list_prompts(&peers.client_session_id, None, None)
        .await
        .unwrap();
    assert_eq!(prompts.prompts[0].name, "test-prompt");

    let roots = peers
        .server
        .roots_list(&peers.server_session_id)
        .await
        .unwrap();
    assert_eq!(roots.roots[0].uri, "test://root");

    peers.client.stop();
    peers.server.stop();
}

#[tokio::test]
async fn test_ping_round_trip() {
    let peers = connect(
        server_builder().build(&TestServer),
        client_builder().build(&TestClient),
    );

    // Accepted in any state, handshake or not.
    peers.client.ping(&peers.client_session_id).await.unwrap();

    peers.client.stop();
    peers.server.stop();
}

#[tokio::test]
async fn test_prompt_get_round_trip() {
    let prompt_server = Arc::new(FixturePromptServer::new());
    let provider: Arc<dyn PromptServer> = prompt_server.clone();
    let server = server_builder()
        .with_prompt_server(provider)
        .build(&TestServer);
    let peers = connect(server, client_builder().build(&TestClient));

    peers.client.initialize(&peers.client_session_id).await.unwrap();

    let result = peers
        .client
        .get_prompt(
            &peers.client_session_id,
            "test-prompt",
            HashMap::from([("test-arg".to_string(), "test-value".to_string())]),
            Some("123".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(result.description, "Test Prompt");
    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.messages[0].role, Role::Assistant);
    assert_eq!(
        result.messages[0].content.text.as_deref(),
        Some("Test response message")
    );
    assert_eq!(
        prompt_server.seen_token.lock().unwrap().as_deref(),
        Some("123")
    );

    peers.client.stop();
    peers.server.stop();
}

#[tokio::test]
async fn test_completion_round_trip() {
    let server = server_builder()
        .with_prompt_server(Arc::new(FixturePromptServer::new()))
        .build(&TestServer);
    let peers = connect(server, client_builder().build(&TestClient));

    peers.client.initialize(&peers.client_session_id).await.unwrap();

    let result = peers
        .client
        .complete_prompt(
            &peers.client_session_id,
            "test-prompt",
            CompletionArgument {
                name: "test-arg".to_string(),
                value: "test-".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.completion.values, vec!["test-value1", "test-value2"]);
    assert!(result.completion.has_more);

    peers.client.stop();
    peers.server.stop();
}

#[tokio::test]
async fn test_resource_update_fans_out_to_sessions() {
    let (update_tx, update_rx) = mpsc::channel::<String>(1);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

    let server = server_builder()
        .with_resource_server(Arc::new(FixtureResourceServer))
        .with_resource_subscribed_updater(Arc::new(TakeOnceSubscribedUpdater {
            rx: Mutex::new(Some(update_rx)),
        }))
        .build(&TestServer);
    let client = client_builder()
        .with_resource_subscribed_watcher(Arc::new(RecordingSubscribedWatcher { tx: seen_tx }))
        .build(&TestClient);
    let peers = connect(server, client);

    peers.client.initialize(&peers.client_session_id).await.unwrap();
    peers
        .client
        .subscribe_resource(&peers.client_session_id, "test://resource")
        .await
        .unwrap();

    update_tx.send("test://resource".to_string()).await.unwrap();

    let seen = time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .expect("update notification should arrive")
        .unwrap();
    assert_eq!(seen, "test://resource");

    peers.client.stop();
    peers.server.stop();
}

#[tokio::test]
async fn test_cancellation_aborts_server_handler() {
    let (dropped_tx, mut dropped_rx) = mpsc::unbounded_channel();
    let server = server_builder()
        .with_tool_server(Arc::new(SlowToolServer { dropped_tx }))
        .build(&TestServer);
    let server = Arc::new(server);
    server.start();

    let (writer, reader) = tokio::io::duplex(1 << 16);
    let session_id = server.start_session(writer);
    let mut lines = BufReader::new(reader).lines();

    let init = br#"{"jsonrpc":"2.0","id":"1","method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"c","version":"0"}}}"#;
    server.handle_msg(&init[..], &session_id).await.unwrap();
    lines.next_line().await.unwrap().unwrap();

    let initialized = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
    server.handle_msg(&initialized[..], &session_id).await.unwrap();

    let call = br#"{"jsonrpc":"2.0","id":"t","method":"tools/call","params":{"name":"slow","arguments":{}}}"#;
    server.handle_msg(&call[..], &session_id).await.unwrap();

    let cancel =
        br#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":"t","reason":"user"}}"#;
    server.handle_msg(&cancel[..], &session_id).await.unwrap();

    // The handler future is dropped...
    time::timeout(Duration::from_secs(2), dropped_rx.recv())
        .await
        .expect("handler should be aborted")
        .unwrap();

    // ...and no response frame for id "t" ever goes out.
    let quiet = time::timeout(Duration::from_millis(300), lines.next_line()).await;
    assert!(quiet.is_err(), "unexpected frame after cancellation");

    server.stop();
}

#[tokio::test]
async fn test_session_cancel_unblocks_caller() {
    let (dropped_tx, _dropped_rx) = mpsc::unbounded_channel();
    let server = server_builder()
        .with_tool_server(Arc::new(SlowToolServer { dropped_tx }))
        .build(&TestServer);
    let peers = connect(server, client_builder().build(&TestClient));

    peers.client.initialize(&peers.client_session_id).await.unwrap();

    let call = {
        let client = Arc::clone(&peers.client);
        let session_id = peers.client_session_id.clone();
        tokio::spawn(async move {
            client
                .call_tool(&session_id, "slow", HashMap::new(), None)
                .await
        })
    };

    time::sleep(Duration::from_millis(100)).await;
    peers.client.stop();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::Cancelled));

    peers.server.stop();
}

#[tokio::test]
async fn test_sampling_round_trip() {
    let server = server_builder().build(&TestServer);
    let client = client_builder()
        .with_sampling_handler(Arc::new(FixtureSamplingHandler))
        .build(&TestClient);
    let peers = connect(server, client);

    peers.client.initialize(&peers.client_session_id).await.unwrap();

    let result = peers
        .server
        .create_sample_message(
            &peers.server_session_id,
            SamplingParams {
                messages: vec![SamplingMessage {
                    role: Role::User,
                    content: SamplingContent {
                        content_type: "text".to_string(),
                        text: "Hello".to_string(),
                    },
                }],
                model_preferences: SamplingModelPreferences {
                    cost_priority: 1,
                    speed_priority: 2,
                    intelligence_priority: 3,
                },
                system_prompts: "Be helpful".to_string(),
                max_tokens: 100,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.role, Role::Assistant);
    assert_eq!(result.content.text, "Test response");
    assert_eq!(result.model, "test-model");
    assert_eq!(result.stop_reason, "completed");

    peers.client.stop();
    peers.server.stop();
}

#[tokio::test]
async fn test_resource_read_round_trip() {
    let server = server_builder()
        .with_resource_server(Arc::new(FixtureResourceServer))
        .build(&TestServer);
    let peers = connect(server, client_builder().build(&TestClient));

    peers.client.initialize(&peers.client_session_id).await.unwrap();

    let resource = peers
        .client
        .read_resource(&peers.client_session_id, "test://resource", None)
        .await
        .unwrap();
    assert_eq!(resource.uri, "test://resource");
    assert_eq!(resource.text.as_deref(), Some("This is the resource content"));

    let templates = peers
        .client
        .list_resource_templates(&peers.client_session_id, None)
        .await
        .unwrap();
    assert_eq!(templates[0].uri_template, "test://resource/{name}");

    peers.client.stop();
    peers.server.stop();
}
