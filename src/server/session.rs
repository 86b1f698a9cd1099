//! The session core: single authority over one session's mutable state and
//! the sole dispatcher of its inbound requests.
//!
//! A session walks Uninitialized → Active → Closing → Closed. Dispatch is
//! serialized by construction: stream transports drive the core from one
//! loop, the HTTP transport from one actor task per session. Protocol
//! faults reject only the offending request; downstream failures come back
//! as result data from the registry's invoke path.

use crate::auth::resolve_credential;
use crate::error::{Error, Result};
use crate::protocol::ProtocolConnection;
use crate::resources::{rendered_to_contents, resource_templates, DiagramUri};
use crate::scheduler::{self, NotificationScheduler, SessionShared};
use crate::transport::NetworkAdapter;
use crate::types::{
    CallToolParams, ClientRequest, CompleteParams, Completion, CompleteResult, EmptyResult,
    ErrorResponse, GetPromptParams, Implementation, IncomingMessage, InitializeRequestParams,
    InitializeResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, LoggingLevel, ReadResourceParams, ReadResourceResult, RequestId, Response,
    ServerCapabilities, SetLevelParams, SubscribeParams, UnsubscribeParams, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::server::Server;

/// Lifecycle of one session. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    Closing,
    Closed,
}

/// One session's state plus its dispatch logic, transport-agnostic.
pub struct SessionCore {
    id: String,
    server: Arc<Server>,
    shared: Arc<Mutex<SessionShared>>,
    scheduler: NotificationScheduler,
    state: SessionState,
    sink: mpsc::Sender<String>,
}

impl SessionCore {
    /// Creates a core in the Uninitialized state. `sink` receives serialized
    /// notifications; the transport decides how they reach the caller.
    pub fn new(id: String, server: Arc<Server>, sink: mpsc::Sender<String>) -> Self {
        Self {
            id,
            server,
            shared: Arc::new(Mutex::new(SessionShared::default())),
            scheduler: NotificationScheduler::idle(),
            state: SessionState::Uninitialized,
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.lock().unwrap().subscriptions.len()
    }

    /// Handles one inbound message. Returns the serialized response for
    /// requests, `None` for notifications. A fault in one request never
    /// touches session state or other requests.
    pub async fn handle_message(&mut self, raw: Value) -> Result<Option<String>> {
        let id = raw
            .get("id")
            .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());

        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            let Some(id) = id else { return Ok(None) };
            let error = Error::InvalidRequest("session is shutting down".to_string());
            return Ok(Some(serde_json::to_string(&ErrorResponse::new(
                id,
                error.to_error_data(),
            ))?));
        }

        let msg: IncomingMessage = match serde_json::from_value(raw) {
            Ok(msg) => msg,
            Err(e) => {
                let Some(id) = id else { return Ok(None) };
                let error = Error::InvalidRequest(e.to_string());
                return Ok(Some(serde_json::to_string(&ErrorResponse::new(
                    id,
                    error.to_error_data(),
                ))?));
            }
        };

        // Client-side notifications expect no reply.
        if msg.method.starts_with("notifications/") {
            debug!(session = %self.id, method = %msg.method, "client notification");
            return Ok(None);
        }

        let Some(id) = msg.id else {
            warn!(session = %self.id, method = %msg.method, "request without id dropped");
            return Ok(None);
        };

        match self.dispatch(&msg.method, msg.params).await {
            Ok(result) => Ok(Some(serde_json::to_string(&Response::new(id, result))?)),
            Err(e) => {
                debug!(session = %self.id, method = %msg.method, error = %e, "request rejected");
                Ok(Some(serde_json::to_string(&ErrorResponse::new(
                    id,
                    e.to_error_data(),
                ))?))
            }
        }
    }

    async fn dispatch(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = ClientRequest::parse(method, params)?;

        match (&self.state, &request) {
            (SessionState::Uninitialized, ClientRequest::Initialize(_)) => {}
            (SessionState::Uninitialized, _) => {
                return Err(Error::InvalidRequest(
                    "first request must be 'initialize'".to_string(),
                ))
            }
            (SessionState::Active, ClientRequest::Initialize(_)) => {
                return Err(Error::InvalidRequest(
                    "'initialize' may only be sent once".to_string(),
                ))
            }
            _ => {}
        }

        match request {
            ClientRequest::Initialize(params) => self.handle_initialize(params),
            ClientRequest::Ping => Ok(serde_json::to_value(EmptyResult {})?),
            ClientRequest::ListTools => Ok(serde_json::to_value(ListToolsResult {
                tools: self.server.registry.snapshot(),
            })?),
            ClientRequest::CallTool(params) => self.handle_call_tool(params).await,
            ClientRequest::ListResources => Ok(serde_json::to_value(ListResourcesResult {
                resources: Vec::new(),
            })?),
            ClientRequest::ListResourceTemplates => {
                Ok(serde_json::to_value(ListResourceTemplatesResult {
                    resource_templates: resource_templates(),
                })?)
            }
            ClientRequest::ReadResource(params) => self.handle_read_resource(params).await,
            ClientRequest::Subscribe(params) => self.handle_subscribe(params).await,
            ClientRequest::Unsubscribe(params) => self.handle_unsubscribe(params),
            ClientRequest::ListPrompts => Ok(serde_json::to_value(ListPromptsResult {
                prompts: self.server.prompts.list(),
            })?),
            ClientRequest::GetPrompt(params) => self.handle_get_prompt(params),
            ClientRequest::SetLevel(params) => self.handle_set_level(params).await,
            ClientRequest::Complete(params) => self.handle_complete(params),
        }
    }

    fn handle_initialize(&mut self, params: InitializeRequestParams) -> Result<Value> {
        self.state = SessionState::Active;
        self.scheduler = NotificationScheduler::start(
            self.id.clone(),
            self.shared.clone(),
            self.sink.clone(),
            self.server.resource_tick,
            self.server.heartbeat_tick,
        );
        info!(
            session = %self.id,
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            "session active"
        );
        Ok(serde_json::to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::full(),
            server_info: Implementation {
                name: self.server.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })?)
    }

    async fn handle_call_tool(&mut self, params: CallToolParams) -> Result<Value> {
        let entry = self.server.registry.lookup(&params.name)?;
        let credential = self.server.credentials.lookup(&self.id);
        let result = entry.invoke(params.arguments, credential.as_deref()).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_read_resource(&mut self, params: ReadResourceParams) -> Result<Value> {
        let uri = DiagramUri::parse(&params.uri)?;
        let rendered = self.server.provider.read(&uri).await?;
        Ok(serde_json::to_value(ReadResourceResult {
            contents: vec![rendered_to_contents(&uri, rendered)],
        })?)
    }

    async fn handle_subscribe(&mut self, params: SubscribeParams) -> Result<Value> {
        let newly_subscribed = self
            .shared
            .lock()
            .unwrap()
            .subscriptions
            .insert(params.uri.clone());

        if newly_subscribed {
            // One immediate informational exchange per new subscription,
            // awaited but never failing the subscription itself.
            let _ = scheduler::send_log(
                &self.shared,
                &self.sink,
                LoggingLevel::Info,
                Some("gateway"),
                json!({ "message": format!("subscribed to {}", params.uri) }),
            )
            .await;
        }
        Ok(serde_json::to_value(EmptyResult {})?)
    }

    fn handle_unsubscribe(&mut self, params: UnsubscribeParams) -> Result<Value> {
        // Removing an absent URI is a no-op, not an error.
        self.shared.lock().unwrap().subscriptions.remove(&params.uri);
        Ok(serde_json::to_value(EmptyResult {})?)
    }

    fn handle_get_prompt(&mut self, params: GetPromptParams) -> Result<Value> {
        let result = self.server.prompts.get(&params.name, params.arguments)?;
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_set_level(&mut self, params: SetLevelParams) -> Result<Value> {
        {
            self.shared.lock().unwrap().log_level = params.level;
        }
        // Confirmation goes out at the new level, so it always passes the
        // threshold it just installed.
        let _ = scheduler::send_log(
            &self.shared,
            &self.sink,
            params.level,
            Some("gateway"),
            json!({ "message": format!("log level set to {:?}", params.level).to_lowercase() }),
        )
        .await;
        Ok(serde_json::to_value(EmptyResult {})?)
    }

    fn handle_complete(&mut self, params: CompleteParams) -> Result<Value> {
        let values = crate::prompts::complete(&params.argument.name, &params.argument.value);
        let total = values.len();
        Ok(serde_json::to_value(CompleteResult {
            completion: Completion {
                values,
                total: Some(total),
            },
        })?)
    }

    /// Tears the session down: cancels timers, erases the credential
    /// binding, clears subscriptions. Idempotent; Closed is terminal.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        self.scheduler.shutdown();
        self.server.credentials.remove(&self.id);
        self.shared.lock().unwrap().subscriptions.clear();
        self.state = SessionState::Closed;
        info!(session = %self.id, "session closed");
    }
}

/// A single stream-transport session: one connection maps 1:1 to one core.
pub struct ServerSession<A: NetworkAdapter> {
    connection: ProtocolConnection<A>,
    core: SessionCore,
    notifications: mpsc::Receiver<String>,
}

impl<A: NetworkAdapter + Send + 'static> ServerSession<A> {
    /// Creates a session for a fresh connection. Stream transports have no
    /// per-request identity, so the process-level credential default is
    /// bound at creation, if present.
    pub fn new(connection: ProtocolConnection<A>, server: Arc<Server>) -> Self {
        let id = Uuid::new_v4().to_string();
        if let Some(token) = resolve_credential(None, None) {
            server.credentials().bind(&id, token);
        }
        let (notification_tx, notification_rx) = mpsc::channel::<String>(32);
        Self {
            connection,
            core: SessionCore::new(id, server, notification_tx),
            notifications: notification_rx,
        }
    }

    /// Drives the session until the connection closes. Requests are handled
    /// strictly in arrival order; notifications interleave between them.
    ///
    /// Teardown runs on every exit path, clean close and write failure
    /// alike, so the credential binding never outlives the session and
    /// nothing queued can be observed afterwards.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.core.close();
        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.connection.recv_message::<Value>() => {
                    // Connection loss is the close signal.
                    let raw = match result {
                        Ok(Some(msg)) => msg,
                        Ok(None) | Err(_) => return Ok(()),
                    };
                    match self.core.handle_message(raw).await {
                        Ok(Some(response)) => self.connection.send_raw(&response).await?,
                        Ok(None) => {}
                        Err(e) => warn!(session = %self.core.id(), error = %e, "failed to handle message"),
                    }
                },
                Some(notification) = self.notifications.recv() => {
                    self.connection.send_raw(&notification).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialStore;
    use crate::backend::Rendered;
    use crate::error::Result;
    use crate::prompts::PromptRegistry;
    use crate::registry::{Capability, CapabilityRegistry};
    use crate::resources::ResourceProvider;
    use crate::types::{
        CallToolResult, Content, JSONRPCResponse, ListToolsResult, INVALID_PARAMS,
        INVALID_REQUEST, METHOD_NOT_FOUND, MISSING_CREDENTIAL,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    // --- Mock Infrastructure ---

    #[derive(Default, Clone)]
    struct MockAdapter {
        incoming: Arc<Mutex<VecDeque<String>>>,
        outgoing: Arc<Mutex<VecDeque<String>>>,
    }

    impl MockAdapter {
        fn push_incoming(&self, msg: String) {
            self.incoming.lock().unwrap().push_back(msg);
        }
    }

    #[async_trait]
    impl NetworkAdapter for MockAdapter {
        async fn send(&mut self, msg: &str) -> Result<()> {
            self.outgoing.lock().unwrap().push_back(msg.to_string());
            Ok(())
        }
        async fn recv(&mut self) -> Result<Option<String>> {
            Ok(self.incoming.lock().unwrap().pop_front())
        }
    }

    struct EchoCapability {
        requires_token: bool,
    }

    #[async_trait]
    impl Capability for EchoCapability {
        fn name(&self) -> &str {
            if self.requires_token {
                "secure-echo"
            } else {
                "echo"
            }
        }
        fn description(&self) -> &str {
            "echoes its message argument"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"],
                "additionalProperties": false
            })
        }
        fn requires_credential(&self) -> bool {
            self.requires_token
        }
        async fn execute(
            &self,
            arguments: Value,
            _credential: Option<&str>,
        ) -> Result<CallToolResult> {
            let message = arguments["message"].as_str().unwrap_or_default();
            Ok(CallToolResult::text(message))
        }
    }

    struct StaticProvider;

    #[async_trait]
    impl ResourceProvider for StaticProvider {
        async fn read(&self, _uri: &DiagramUri) -> Result<Rendered> {
            Ok(Rendered {
                bytes: b"<svg/>".to_vec(),
                mime_type: "image/svg+xml".to_string(),
            })
        }
    }

    fn test_server() -> Arc<Server> {
        let registry = CapabilityRegistry::build(vec![
            Arc::new(EchoCapability {
                requires_token: false,
            }),
            Arc::new(EchoCapability {
                requires_token: true,
            }),
        ])
        .unwrap();
        Arc::new(
            Server::new(
                "test-gateway",
                registry,
                PromptRegistry::standard(),
                Arc::new(StaticProvider),
                Arc::new(CredentialStore::new()),
            )
            .with_intervals(Duration::from_secs(3600), Duration::from_secs(3600)),
        )
    }

    fn make_core(server: &Arc<Server>) -> (SessionCore, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(32);
        (
            SessionCore::new("test-session".to_string(), server.clone(), tx),
            rx,
        )
    }

    fn init_request() -> Value {
        json!({
            "jsonrpc": "2.0", "id": 0, "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": { "name": "test-client", "version": "0" },
                "capabilities": {}
            }
        })
    }

    async fn init(core: &mut SessionCore) {
        let response = core.handle_message(init_request()).await.unwrap().unwrap();
        assert!(response.contains("serverInfo"));
        assert_eq!(core.state(), SessionState::Active);
    }

    fn parse_error_code(response: &str) -> i32 {
        let parsed: JSONRPCResponse<Value> = serde_json::from_str(response).unwrap();
        match parsed {
            JSONRPCResponse::Error(e) => e.error.code,
            JSONRPCResponse::Success(_) => panic!("expected an error response"),
        }
    }

    // --- Dispatch Tests ---

    #[tokio::test]
    async fn request_before_initialize_is_rejected() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        let response = core
            .handle_message(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_error_code(&response), INVALID_REQUEST);
        assert_eq!(core.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;
        let response = core.handle_message(init_request()).await.unwrap().unwrap();
        assert_eq!(parse_error_code(&response), INVALID_REQUEST);
        assert_eq!(core.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn list_tools_returns_full_catalog_once() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;

        let response = core
            .handle_message(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
            .await
            .unwrap()
            .unwrap();
        let parsed: JSONRPCResponse<ListToolsResult> = serde_json::from_str(&response).unwrap();
        let JSONRPCResponse::Success(res) = parsed else {
            panic!("expected success");
        };
        assert_eq!(res.result.tools.len(), 2);
        for tool in &res.result.tools {
            assert!(!tool.name.is_empty());
            assert!(!tool.description.is_empty());
        }
    }

    #[tokio::test]
    async fn unknown_capability_is_a_fault() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;

        let response = core
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": { "name": "doesNotExist", "arguments": {} }
            }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_error_code(&response), METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_arguments_are_a_fault() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;

        let response = core
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": { "name": "echo", "arguments": { "message": 42 } }
            }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_error_code(&response), INVALID_PARAMS);
    }

    #[tokio::test]
    async fn credential_gated_tool_fails_without_binding_and_works_with_it() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;

        let call = json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": { "name": "secure-echo", "arguments": { "message": "hi" } }
        });
        let response = core.handle_message(call.clone()).await.unwrap().unwrap();
        assert_eq!(parse_error_code(&response), MISSING_CREDENTIAL);

        server.credentials().bind(core.id(), "token".to_string());
        let response = core.handle_message(call).await.unwrap().unwrap();
        let parsed: JSONRPCResponse<CallToolResult> = serde_json::from_str(&response).unwrap();
        let JSONRPCResponse::Success(res) = parsed else {
            panic!("expected success");
        };
        assert!(matches!(&res.result.content[0], Content::Text { text } if text == "hi"));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_and_unsubscribe_nets_out() {
        let server = test_server();
        let (mut core, mut rx) = make_core(&server);
        init(&mut core).await;

        let uri = "diagram://d290f1ee-6c54-4b01-90e6-d701748f0851/svg";
        for id in [1, 2] {
            let response = core
                .handle_message(json!({
                    "jsonrpc": "2.0", "id": id, "method": "resources/subscribe",
                    "params": { "uri": uri }
                }))
                .await
                .unwrap()
                .unwrap();
            assert!(response.contains("result"));
        }
        assert_eq!(core.subscription_count(), 1);

        // Exactly one informational exchange: the duplicate subscribe is a
        // no-op from the caller's perspective.
        let context = rx.try_recv().expect("subscription context message");
        assert!(context.contains("subscribed to"));
        assert!(rx.try_recv().is_err());

        core.handle_message(json!({
            "jsonrpc": "2.0", "id": 3, "method": "resources/unsubscribe",
            "params": { "uri": uri }
        }))
        .await
        .unwrap()
        .unwrap();
        assert_eq!(core.subscription_count(), 0);

        // Unsubscribing an absent URI is a no-op, not an error.
        let response = core
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 4, "method": "resources/unsubscribe",
                "params": { "uri": uri }
            }))
            .await
            .unwrap()
            .unwrap();
        assert!(response.contains("result"));
    }

    #[tokio::test]
    async fn malformed_resource_uri_never_reaches_the_provider() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;

        let response = core
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 5, "method": "resources/read",
                "params": { "uri": "diagram://not-a-uuid/svg" }
            }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_error_code(&response), INVALID_PARAMS);
    }

    #[tokio::test]
    async fn set_level_updates_threshold_and_confirms() {
        let server = test_server();
        let (mut core, mut rx) = make_core(&server);
        init(&mut core).await;

        let response = core
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 6, "method": "logging/setLevel",
                "params": { "level": "warning" }
            }))
            .await
            .unwrap()
            .unwrap();
        assert!(response.contains("result"));

        let confirmation = rx.try_recv().expect("confirmation notification");
        assert!(confirmation.contains("notifications/message"));
        assert!(confirmation.contains("log level set to warning"));
    }

    #[tokio::test]
    async fn completion_is_prefix_filtered_and_unknown_names_are_empty() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;

        let response = core
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 7, "method": "completion/complete",
                "params": {
                    "ref": { "type": "ref/prompt", "name": "flowchart" },
                    "argument": { "name": "direction", "value": "T" }
                }
            }))
            .await
            .unwrap()
            .unwrap();
        let parsed: JSONRPCResponse<CompleteResult> = serde_json::from_str(&response).unwrap();
        let JSONRPCResponse::Success(res) = parsed else {
            panic!("expected success");
        };
        assert_eq!(res.result.completion.values, vec!["TB", "TD"]);

        let response = core
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 8, "method": "completion/complete",
                "params": {
                    "ref": { "type": "ref/prompt", "name": "flowchart" },
                    "argument": { "name": "bogus", "value": "x" }
                }
            }))
            .await
            .unwrap()
            .unwrap();
        let parsed: JSONRPCResponse<CompleteResult> = serde_json::from_str(&response).unwrap();
        let JSONRPCResponse::Success(res) = parsed else {
            panic!("expected success");
        };
        assert!(res.result.completion.values.is_empty());
    }

    #[tokio::test]
    async fn close_erases_credential_and_subscriptions_exactly_once() {
        let server = test_server();
        let (mut core, _rx) = make_core(&server);
        init(&mut core).await;

        server.credentials().bind(core.id(), "token".to_string());
        core.handle_message(json!({
            "jsonrpc": "2.0", "id": 1, "method": "resources/subscribe",
            "params": { "uri": "diagram://d290f1ee-6c54-4b01-90e6-d701748f0851/svg" }
        }))
        .await
        .unwrap();

        core.close();
        assert_eq!(core.state(), SessionState::Closed);
        assert_eq!(core.subscription_count(), 0);
        assert!(server.credentials().lookup(core.id()).is_none());

        // Closed is terminal; a second close is a no-op and requests are
        // rejected without touching state.
        core.close();
        let response = core
            .handle_message(json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_error_code(&response), INVALID_REQUEST);
    }

    // --- Stream Session Tests ---

    /// Runs a full stream session over the mock adapter and collects output.
    async fn run_session_with_requests(
        server: Arc<Server>,
        requests: Vec<String>,
    ) -> Arc<Mutex<VecDeque<String>>> {
        let adapter = MockAdapter::default();
        let outgoing = Arc::clone(&adapter.outgoing);
        for request in requests {
            adapter.push_incoming(request);
        }

        let conn = ProtocolConnection::new(adapter);
        let session = ServerSession::new(conn, server);

        tokio::time::timeout(Duration::from_secs(1), session.run())
            .await
            .expect("session run timed out")
            .expect("session run failed");

        outgoing
    }

    #[tokio::test]
    async fn stream_session_dispatches_in_arrival_order() {
        let server = test_server();
        let requests = vec![
            serde_json::to_string(&init_request()).unwrap(),
            serde_json::to_string(&json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/list"
            }))
            .unwrap(),
            serde_json::to_string(&json!({
                "jsonrpc": "2.0", "id": 2, "method": "ping"
            }))
            .unwrap(),
        ];
        let outgoing = run_session_with_requests(server, requests).await;

        let responses = outgoing.lock().unwrap();
        assert_eq!(responses.len(), 3);
        assert!(responses[0].contains("serverInfo"));
        assert!(responses[1].contains("\"id\":1"));
        assert!(responses[2].contains("\"id\":2"));
    }

    #[tokio::test]
    async fn stream_disconnect_tears_the_session_down() {
        let server = test_server();
        let requests = vec![serde_json::to_string(&init_request()).unwrap()];
        // run_session_with_requests returns only after run() finished, i.e.
        // after the simulated disconnect closed the session.
        let outgoing = run_session_with_requests(server.clone(), requests).await;
        assert_eq!(outgoing.lock().unwrap().len(), 1);
    }

    /// Every send fails, as if the peer reset the connection mid-write.
    struct FailingSendAdapter {
        incoming: Arc<Mutex<VecDeque<String>>>,
    }

    #[async_trait]
    impl NetworkAdapter for FailingSendAdapter {
        async fn send(&mut self, _msg: &str) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer reset").into())
        }
        async fn recv(&mut self) -> Result<Option<String>> {
            Ok(self.incoming.lock().unwrap().pop_front())
        }
    }

    #[tokio::test]
    async fn write_failure_still_erases_the_credential_binding() {
        let server = test_server();
        let incoming = Arc::new(Mutex::new(VecDeque::from([
            serde_json::to_string(&init_request()).unwrap(),
        ])));
        let session = ServerSession::new(
            ProtocolConnection::new(FailingSendAdapter { incoming }),
            server.clone(),
        );
        let session_id = session.core.id().to_string();
        server.credentials().bind(&session_id, "bound-token".to_string());

        let result = tokio::time::timeout(Duration::from_secs(1), session.run())
            .await
            .expect("session run timed out");
        assert!(result.is_err(), "write failure must surface");
        assert!(
            server.credentials().lookup(&session_id).is_none(),
            "credential binding must not outlive the session"
        );
    }
}
