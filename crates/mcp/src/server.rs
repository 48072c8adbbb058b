// MCP protocol engine: line-delimited JSON-RPC over a duplex byte stream
//
// The read side is strictly sequential. Tool calls run as spawned tasks
// bounded by a semaphore; every response goes through one ResponseWriter.

use crate::codec::{Frame, MessageCodec};
use crate::error::McpError;
use crate::protocol::{
    recover_id, CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability, JSONRPC_VERSION,
    PROTOCOL_VERSION,
};
use crate::sanitize::Sanitizer;
use crate::tools::{ToolHandler, ToolRegistry};
use futures::StreamExt;
use openpact_core::config::McpSettings;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

/// How a serve loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The peer closed the input stream
    InputClosed,
    /// Graceful shutdown was requested and has completed
    Shutdown,
}

/// External cancellation signal for a serve loop. Cloneable; triggering it
/// more than once has no further effect.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Serializes responses onto the single output stream. Each line is encoded
/// before the lock is taken and written and flushed while holding it.
#[derive(Clone)]
pub struct ResponseWriter {
    output: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
    failed: CancellationToken,
}

impl ResponseWriter {
    pub fn new<W>(output: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            output: Arc::new(Mutex::new(Box::new(output))),
            failed: CancellationToken::new(),
        }
    }

    pub async fn send(&self, response: &JsonRpcResponse) -> Result<(), McpError> {
        if self.failed.is_cancelled() {
            return Err(McpError::OutputClosed);
        }

        let mut line = serde_json::to_string(response).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize response: {}", e);
            format!(
                r#"{{"jsonrpc":"2.0","id":{},"error":{{"code":-32603,"message":"Failed to encode response"}}}}"#,
                response.id
            )
        });
        line.push('\n');

        let mut output = self.output.lock().await;
        let written = match output.write_all(line.as_bytes()).await {
            Ok(()) => output.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            tracing::error!("Failed to write response: {}", e);
            self.failed.cancel();
            return Err(McpError::OutputClosed);
        }
        Ok(())
    }

    /// Resolves once a write has failed
    pub async fn closed(&self) {
        self.failed.cancelled().await
    }

    async fn close(&self) {
        let mut output = self.output.lock().await;
        if let Err(e) = output.flush().await {
            tracing::debug!("Flush on close failed: {}", e);
        }
        if let Err(e) = output.shutdown().await {
            tracing::debug!("Output shutdown failed: {}", e);
        }
    }
}

/// Outcome of parsing one input line
enum Inbound {
    Request(JsonRpcRequest),
    Reply(JsonRpcResponse),
    Ignore,
}

/// A tool invocation ready to run on its own task
struct ToolJob {
    id: Option<Value>,
    tool: String,
    arguments: Value,
    handler: Arc<dyn ToolHandler>,
}

impl ToolJob {
    async fn run(self, sanitizer: Arc<Sanitizer>, writer: ResponseWriter, _permit: OwnedSemaphorePermit) {
        let started = Instant::now();
        let result = self.handler.execute(self.arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match (self.id, result) {
            (None, Ok(_)) => {
                tracing::debug!(tool = %self.tool, elapsed_ms, "Tool notification completed");
                return;
            }
            (None, Err(e)) => {
                tracing::warn!(tool = %self.tool, elapsed_ms, "Tool notification failed: {}", sanitizer.sanitize(&e.to_string()));
                return;
            }
            (Some(id), Ok(result)) => {
                tracing::debug!(request_id = %id, tool = %self.tool, elapsed_ms, "Tool call completed");
                JsonRpcResponse::from_serializable(id, &result)
            }
            (Some(id), Err(e)) => {
                let message = sanitizer.sanitize(&e.to_string());
                tracing::warn!(request_id = %id, tool = %self.tool, elapsed_ms, "Tool call failed: {}", message);
                JsonRpcResponse::error(id, JsonRpcError::custom(e.code(), message))
            }
        };

        if writer.send(&response).await.is_err() {
            tracing::debug!(tool = %self.tool, "Dropping response, output is closed");
        }
    }
}

/// JSON-RPC server exposing the tool registry
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    sanitizer: Arc<Sanitizer>,
    settings: McpSettings,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(registry: ToolRegistry, sanitizer: Sanitizer) -> Self {
        Self {
            registry: Arc::new(registry),
            sanitizer: Arc::new(sanitizer),
            settings: McpSettings::default(),
            info: ServerInfo::default(),
        }
    }

    pub fn with_settings(mut self, settings: McpSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Serve on the process's stdin and stdout
    pub async fn serve_stdio(&self, shutdown: ShutdownHandle) -> Result<ServeOutcome, McpError> {
        self.serve(tokio::io::stdin(), tokio::io::stdout(), shutdown).await
    }

    /// Serve until the input closes, shutdown completes, or a stream fails
    pub async fn serve<R, W>(
        &self,
        input: R,
        output: W,
        shutdown: ShutdownHandle,
    ) -> Result<ServeOutcome, McpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = ResponseWriter::new(output);
        let mut frames = FramedRead::new(input, MessageCodec::new(self.settings.max_message_bytes));
        let limiter = Arc::new(Semaphore::new(self.settings.max_concurrent_handlers.max(1)));
        let mut handlers: JoinSet<()> = JoinSet::new();
        let mut in_flight: HashMap<Id, Value> = HashMap::new();

        tracing::info!(
            tools = self.registry.len(),
            max_concurrent = self.settings.max_concurrent_handlers,
            "MCP server started"
        );

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break Ok(ServeOutcome::Shutdown),

                _ = writer.closed() => break Err(McpError::OutputClosed),

                Some(joined) = handlers.join_next_with_id(), if !handlers.is_empty() => {
                    reap(joined, &mut in_flight, &writer).await;
                }

                frame = frames.next() => match frame {
                    None => break Ok(ServeOutcome::InputClosed),
                    Some(Err(e)) => break Err(McpError::Input(e)),
                    Some(Ok(Frame::Oversized)) => {
                        tracing::warn!(
                            limit = self.settings.max_message_bytes,
                            "Dropping message exceeding the maximum length"
                        );
                    }
                    Some(Ok(Frame::InvalidUtf8(text))) => {
                        if let Inbound::Reply(response) = undecodable(&text) {
                            let _ = writer.send(&response).await;
                        }
                    }
                    Some(Ok(Frame::Message(line))) => {
                        let Some(job) = self.accept(&line, &writer).await else {
                            continue;
                        };

                        let permit = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break Ok(ServeOutcome::Shutdown),
                            permit = limiter.clone().acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break Ok(ServeOutcome::Shutdown),
                            },
                        };

                        let request_id = job.id.clone();
                        let handle = handlers.spawn(job.run(self.sanitizer.clone(), writer.clone(), permit));
                        if let Some(id) = request_id {
                            in_flight.insert(handle.id(), id);
                        }
                    }
                },
            }
        };

        match &outcome {
            Err(McpError::OutputClosed) => {
                handlers.shutdown().await;
            }
            _ => self.drain(&mut handlers, &mut in_flight, &writer).await,
        }
        writer.close().await;

        match &outcome {
            Ok(result) => tracing::info!("MCP server stopped: {:?}", result),
            Err(e) => tracing::error!("MCP server stopped: {}", e),
        }
        outcome
    }

    /// Give in-flight handlers the grace period, then abort the rest
    async fn drain(&self, handlers: &mut JoinSet<()>, in_flight: &mut HashMap<Id, Value>, writer: &ResponseWriter) {
        if handlers.is_empty() {
            return;
        }
        tracing::info!(in_flight = handlers.len(), "Waiting for in-flight handlers");

        let finished = tokio::time::timeout(self.settings.shutdown_grace, async {
            while let Some(joined) = handlers.join_next_with_id().await {
                reap(joined, in_flight, writer).await;
            }
        })
        .await;

        if finished.is_err() {
            tracing::warn!(aborted = handlers.len(), "Grace period elapsed, aborting handlers");
            handlers.shutdown().await;
        }
    }

    /// Parse one line and answer it inline unless it needs a tool task
    async fn accept(&self, line: &str, writer: &ResponseWriter) -> Option<ToolJob> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match parse_message(line) {
            Inbound::Ignore => None,
            Inbound::Reply(response) => {
                let _ = writer.send(&response).await;
                None
            }
            Inbound::Request(request) => {
                tracing::debug!(method = %request.method, request_id = ?request.id, "Received request");
                match self.route(request) {
                    Ok(job) => job,
                    Err(Some(response)) => {
                        let _ = writer.send(&response).await;
                        None
                    }
                    Err(None) => None,
                }
            }
        }
    }

    /// Resolve a request to a tool job, or to an immediate response
    /// (`Err(None)` when nothing is to be sent)
    fn route(&self, request: JsonRpcRequest) -> Result<Option<ToolJob>, Option<JsonRpcResponse>> {
        let JsonRpcRequest { id, method, params, .. } = request;
        let reply = |result: Result<Value, JsonRpcError>| match (&id, result) {
            (Some(id), Ok(value)) => Some(JsonRpcResponse::success(id.clone(), value)),
            (Some(id), Err(error)) => Some(JsonRpcResponse::error(id.clone(), error)),
            (None, Err(error)) => {
                tracing::debug!("Not answering notification: {}", error.message);
                None
            }
            (None, Ok(_)) => None,
        };

        match method.as_str() {
            "initialize" => Err(reply(self.initialize(params))),
            "ping" => Err(reply(Ok(serde_json::json!({})))),
            "tools/list" => Err(reply(
                serde_json::to_value(ListToolsResult {
                    tools: self.registry.list_schemas(),
                })
                .map_err(|e| JsonRpcError::internal_error(e.to_string())),
            )),
            "notifications/initialized" => {
                tracing::info!("Client initialized");
                Err(None)
            }
            "notifications/cancelled" => {
                let target = params.as_ref().and_then(|p| p.get("requestId")).cloned();
                tracing::debug!(request_id = ?target, "Client cancelled a request");
                Err(None)
            }
            "tools/call" => {
                let call: CallToolParams = match params.map(serde_json::from_value) {
                    Some(Ok(call)) => call,
                    Some(Err(e)) => {
                        return Err(reply(Err(JsonRpcError::invalid_params(format!("Invalid tools/call params: {}", e)))))
                    }
                    None => return Err(reply(Err(JsonRpcError::invalid_params("Missing tools/call params")))),
                };
                match self.registry.get(&call.name) {
                    Some(tool) => Ok(Some(ToolJob {
                        id,
                        tool: call.name,
                        arguments: call.arguments.unwrap_or_else(empty_object),
                        handler: tool.handler.clone(),
                    })),
                    None => Err(reply(Err(JsonRpcError::method_not_found(&call.name)))),
                }
            }
            name => match self.registry.get(name) {
                Some(tool) => Ok(Some(ToolJob {
                    id,
                    tool: name.to_string(),
                    arguments: params.unwrap_or_else(empty_object),
                    handler: tool.handler.clone(),
                })),
                None => Err(reply(Err(JsonRpcError::method_not_found(name)))),
            },
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        if let Some(Ok(params)) = params.map(serde_json::from_value::<InitializeParams>) {
            tracing::info!(
                protocol = %params.protocol_version,
                "Client connected: {} {}",
                params.client_info.name,
                params.client_info.version
            );
        }

        serde_json::to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.info.clone(),
        })
        .map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Record a finished handler task; a panic is answered with an internal error
async fn reap(joined: Result<(Id, ()), JoinError>, in_flight: &mut HashMap<Id, Value>, writer: &ResponseWriter) {
    match joined {
        Ok((task, ())) => {
            in_flight.remove(&task);
        }
        Err(e) => {
            let request_id = in_flight.remove(&e.id());
            if !e.is_panic() {
                return;
            }
            tracing::error!(request_id = ?request_id, "Tool handler panicked");
            if let Some(id) = request_id {
                let response = JsonRpcResponse::error(
                    id,
                    JsonRpcError::internal_error("Internal error: tool handler panicked"),
                );
                let _ = writer.send(&response).await;
            }
        }
    }
}

/// Classify a raw line per JSON-RPC 2.0
fn parse_message(line: &str) -> Inbound {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return match recover_id(line) {
                Some(id) => Inbound::Reply(JsonRpcResponse::error(
                    id,
                    JsonRpcError::parse_error(format!("Parse error: {}", e)),
                )),
                None => {
                    tracing::warn!("Dropping unparseable message without an id: {}", e);
                    Inbound::Ignore
                }
            };
        }
    };

    let object = match value {
        Value::Object(object) => object,
        Value::Array(_) => {
            return Inbound::Reply(JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::invalid_request("Batch requests are not supported"),
            ))
        }
        _ => {
            return Inbound::Reply(JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::invalid_request("Request must be a JSON object"),
            ))
        }
    };

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(id @ (Value::String(_) | Value::Number(_))) => Some(id.clone()),
        Some(_) => {
            return Inbound::Reply(JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::invalid_request("id must be a string or number"),
            ))
        }
    };

    if !object.contains_key("method") {
        if object.contains_key("result") || object.contains_key("error") {
            tracing::debug!(request_id = ?id, "Ignoring response-shaped message");
            return Inbound::Ignore;
        }
        return reject(id, "Missing method".to_string());
    }

    let request: JsonRpcRequest = match serde_json::from_value(Value::Object(object)) {
        Ok(request) => request,
        Err(e) => return reject(id, format!("Invalid request: {}", e)),
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return reject(id, format!("Unsupported jsonrpc version: {}", request.jsonrpc));
    }

    Inbound::Request(request)
}

/// A line that is not UTF-8 is a parse error, answered only if its id survives
fn undecodable(text: &str) -> Inbound {
    match recover_id(text) {
        Some(id) => Inbound::Reply(JsonRpcResponse::error(
            id,
            JsonRpcError::parse_error("Parse error: message is not valid UTF-8"),
        )),
        None => {
            tracing::warn!("Dropping message that is not valid UTF-8");
            Inbound::Ignore
        }
    }
}

fn reject(id: Option<Value>, message: String) -> Inbound {
    match id {
        Some(id) => Inbound::Reply(JsonRpcResponse::error(id, JsonRpcError::invalid_request(message))),
        None => {
            tracing::warn!("Dropping invalid notification: {}", message);
            Inbound::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::protocol::{CallToolResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};
    use crate::tools::{json_schema_object, ToolDescriptor};
    use openpact_core::ServerConfig;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
    use tokio::task::JoinHandle;

    /// Sleeps, then answers with its label
    struct Sleepy {
        delay: Duration,
        label: &'static str,
    }

    #[async_trait::async_trait]
    impl ToolHandler for Sleepy {
        async fn execute(&self, _arguments: Value) -> Result<CallToolResult, ToolError> {
            tokio::time::sleep(self.delay).await;
            Ok(CallToolResult::text(self.label))
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl ToolHandler for Failing {
        async fn execute(&self, _arguments: Value) -> Result<CallToolResult, ToolError> {
            Err(ToolError::Failed(
                "cannot open /srv/openpact/workspace/notes.md using key sk-test-secret-value".to_string(),
            ))
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl ToolHandler for Panicking {
        async fn execute(&self, _arguments: Value) -> Result<CallToolResult, ToolError> {
            panic!("handler exploded")
        }
    }

    struct Strict;

    #[async_trait::async_trait]
    impl ToolHandler for Strict {
        async fn execute(&self, arguments: Value) -> Result<CallToolResult, ToolError> {
            #[derive(serde::Deserialize)]
            struct Args {
                #[allow(dead_code)]
                count: u32,
            }
            let _: Args = serde_json::from_value(arguments)?;
            Ok(CallToolResult::text("ok"))
        }
    }

    /// Tracks the highest number of simultaneous executions
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolHandler for Gauge {
        async fn execute(&self, _arguments: Value) -> Result<CallToolResult, ToolError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(CallToolResult::text("measured"))
        }
    }

    fn tool(name: &str, handler: Arc<dyn ToolHandler>) -> ToolDescriptor {
        ToolDescriptor::new(name, format!("{} tool", name), json_schema_object(json!({}), vec![]), move |_| {
            Ok(handler.clone())
        })
    }

    fn sleepy(delay: Duration, label: &'static str) -> Arc<dyn ToolHandler> {
        Arc::new(Sleepy { delay, label })
    }

    fn catalog() -> Vec<ToolDescriptor> {
        vec![
            tool("slow", sleepy(Duration::from_millis(200), "slow")),
            tool("fast", sleepy(Duration::ZERO, "fast")),
            tool("hang", sleepy(Duration::from_secs(3600), "never")),
            tool("failing", Arc::new(Failing)),
            tool("panicking", Arc::new(Panicking)),
            tool("strict", Arc::new(Strict)),
            tool("toolA", sleepy(Duration::ZERO, "A")).requires("toolA"),
            tool("toolB", sleepy(Duration::ZERO, "B")).requires("toolB"),
        ]
    }

    fn server_with(settings: McpSettings, catalog: Vec<ToolDescriptor>) -> McpServer {
        let mut config = ServerConfig::for_workspace("/srv/openpact/workspace");
        config.features = ["toolA".to_string()].into_iter().collect();
        let registry = ToolRegistry::build(&config, catalog).unwrap();
        let sanitizer = Sanitizer::from_config(&config).with_secrets(["sk-test-secret-value"]);
        McpServer::new(registry, sanitizer).with_settings(settings)
    }

    fn server() -> McpServer {
        server_with(McpSettings::default(), catalog())
    }

    struct Harness {
        input: Option<DuplexStream>,
        output: Lines<BufReader<DuplexStream>>,
        shutdown: ShutdownHandle,
        task: JoinHandle<Result<ServeOutcome, McpError>>,
    }

    impl Harness {
        fn start(server: McpServer) -> Self {
            let (client_in, server_in) = tokio::io::duplex(64 * 1024);
            let (server_out, client_out) = tokio::io::duplex(64 * 1024);
            let shutdown = ShutdownHandle::new();
            let task = {
                let shutdown = shutdown.clone();
                tokio::spawn(async move { server.serve(server_in, server_out, shutdown).await })
            };
            Self {
                input: Some(client_in),
                output: BufReader::new(client_out).lines(),
                shutdown,
                task,
            }
        }

        async fn send(&mut self, line: &str) {
            let input = self.input.as_mut().unwrap();
            input.write_all(line.as_bytes()).await.unwrap();
            input.write_all(b"\n").await.unwrap();
        }

        async fn send_bytes(&mut self, bytes: &[u8]) {
            self.input.as_mut().unwrap().write_all(bytes).await.unwrap();
        }

        async fn request(&mut self, id: u64, method: &str, params: Value) {
            let line = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string();
            self.send(&line).await;
        }

        async fn recv(&mut self) -> Value {
            let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
                .await
                .expect("timed out waiting for a response")
                .unwrap()
                .expect("output closed");
            serde_json::from_str(&line).unwrap()
        }

        async fn finish(mut self) -> Result<ServeOutcome, McpError> {
            self.input.take();
            tokio::time::timeout(Duration::from_secs(5), self.task).await.unwrap().unwrap()
        }
    }

    fn error_code(response: &Value) -> i64 {
        response["error"]["code"].as_i64().unwrap()
    }

    fn text_of(response: &Value) -> &str {
        response["result"]["content"][0]["text"].as_str().unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mut h = Harness::start(server());
        h.request(1, "not.a.real.tool", json!({})).await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(error_code(&response), METHOD_NOT_FOUND as i64);
        assert_eq!(h.finish().await.unwrap(), ServeOutcome::InputClosed);
    }

    #[tokio::test]
    async fn test_parse_error_with_recoverable_id() {
        let mut h = Harness::start(server());
        h.send(r#"{"jsonrpc":"2.0","id":7,"method":"#).await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(7));
        assert_eq!(error_code(&response), PARSE_ERROR as i64);
    }

    #[tokio::test]
    async fn test_malformed_notification_is_dropped() {
        let mut h = Harness::start(server());
        h.send(r#"{"jsonrpc":"2.0","method":"ping""#).await;
        h.send("total garbage").await;
        h.request(2, "ping", json!({})).await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(2));
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn test_invalid_utf8_gets_parse_error_and_service_continues() {
        let mut h = Harness::start(server());
        h.send_bytes(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"\xff\xfe\"}\n").await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(error_code(&response), PARSE_ERROR as i64);

        h.request(2, "ping", json!({})).await;
        let response = h.recv().await;
        assert_eq!(response["id"], json!(2));
        assert_eq!(response["result"], json!({}));
        assert_eq!(h.finish().await.unwrap(), ServeOutcome::InputClosed);
    }

    #[tokio::test]
    async fn test_oversized_message_is_dropped() {
        let settings = McpSettings {
            max_message_bytes: 64,
            ..Default::default()
        };
        let mut h = Harness::start(server_with(settings, catalog()));

        let padding = "x".repeat(160);
        h.request(1, "ping", json!({"padding": padding})).await;
        h.request(2, "ping", json!({})).await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(2));
        assert_eq!(response["result"], json!({}));
        assert_eq!(h.finish().await.unwrap(), ServeOutcome::InputClosed);
    }

    #[tokio::test]
    async fn test_undecodable_lines_without_id_are_dropped() {
        let mut h = Harness::start(server());
        h.send("{not json").await;
        h.send_bytes(b"\xc3\x28 garbage\n").await;
        h.send_bytes(b"{\"jsonrpc\":\"2.0\",\"method\":\"\xff\"}\r\n").await;
        h.request(3, "ping", json!({})).await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(3));
        assert_eq!(response["result"], json!({}));

        h.request(4, "tools/call", json!({"name": "fast"})).await;
        let response = h.recv().await;
        assert_eq!(response["id"], json!(4));
        assert_eq!(text_of(&response), "fast");
        assert_eq!(h.finish().await.unwrap(), ServeOutcome::InputClosed);
    }

    #[tokio::test]
    async fn test_feature_gated_tools() {
        let mut h = Harness::start(server());

        h.request(1, "tools/call", json!({"name": "toolB", "arguments": {}})).await;
        assert_eq!(error_code(&h.recv().await), METHOD_NOT_FOUND as i64);

        h.request(2, "toolB", json!({})).await;
        assert_eq!(error_code(&h.recv().await), METHOD_NOT_FOUND as i64);

        h.request(3, "tools/call", json!({"name": "toolA"})).await;
        let response = h.recv().await;
        assert_eq!(response["id"], json!(3));
        assert_eq!(text_of(&response), "A");

        h.request(4, "toolA", json!({})).await;
        assert_eq!(text_of(&h.recv().await), "A");
    }

    #[tokio::test]
    async fn test_responses_correlate_out_of_order() {
        let mut h = Harness::start(server());
        h.request(1, "tools/call", json!({"name": "slow"})).await;
        h.request(2, "tools/call", json!({"name": "fast"})).await;

        let first = h.recv().await;
        let second = h.recv().await;
        assert_eq!(first["id"], json!(2));
        assert_eq!(text_of(&first), "fast");
        assert_eq!(second["id"], json!(1));
        assert_eq!(text_of(&second), "slow");
    }

    #[tokio::test]
    async fn test_concurrent_responses_are_not_interleaved() {
        let mut h = Harness::start(server());
        for id in 0..50u64 {
            let name = if id % 2 == 0 { "fast" } else { "toolA" };
            h.request(id, name, json!({})).await;
        }

        let mut seen = HashSet::new();
        for _ in 0..50 {
            let response = h.recv().await;
            assert!(response.get("result").is_some());
            assert!(seen.insert(response["id"].as_u64().unwrap()));
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_handler_failure_is_sanitized() {
        let mut h = Harness::start(server());
        h.request(5, "failing", json!({})).await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(5));
        assert_eq!(error_code(&response), INTERNAL_ERROR as i64);
        let message = response["error"]["message"].as_str().unwrap();
        assert!(!message.contains("/srv/openpact"));
        assert!(!message.contains("sk-test-secret-value"));
        assert!(message.contains("<workspace>/notes.md"));
        assert!(message.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_panicking_handler_returns_internal_error() {
        let mut h = Harness::start(server());
        h.request(9, "panicking", json!({})).await;

        let response = h.recv().await;
        assert_eq!(response["id"], json!(9));
        assert_eq!(error_code(&response), INTERNAL_ERROR as i64);

        // The loop keeps serving
        h.request(10, "ping", json!({})).await;
        assert_eq!(h.recv().await["id"], json!(10));
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let mut h = Harness::start(server());

        h.request(1, "tools/call", json!({"arguments": {}})).await;
        assert_eq!(error_code(&h.recv().await), INVALID_PARAMS as i64);

        h.send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call"}"#).await;
        assert_eq!(error_code(&h.recv().await), INVALID_PARAMS as i64);

        h.request(3, "strict", json!({"count": "many"})).await;
        assert_eq!(error_code(&h.recv().await), INVALID_PARAMS as i64);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let mut h = Harness::start(server());

        h.send(r#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#).await;
        let response = h.recv().await;
        assert_eq!(response["id"], Value::Null);
        assert_eq!(error_code(&response), INVALID_REQUEST as i64);

        h.send(r#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#).await;
        let response = h.recv().await;
        assert_eq!(response["id"], json!(3));
        assert_eq!(error_code(&response), INVALID_REQUEST as i64);

        h.send(r#"{"jsonrpc":"2.0","id":4,"method":42}"#).await;
        assert_eq!(error_code(&h.recv().await), INVALID_REQUEST as i64);
    }

    #[tokio::test]
    async fn test_notifications_and_responses_get_no_reply() {
        let mut h = Harness::start(server());
        h.send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        h.send(r#"{"jsonrpc":"2.0","method":"toolA"}"#).await;
        h.send(r#"{"jsonrpc":"2.0","method":"no.such.method"}"#).await;
        h.send(r#"{"jsonrpc":"2.0","id":77,"result":{}}"#).await;
        h.request(8, "ping", json!({})).await;

        assert_eq!(h.recv().await["id"], json!(8));
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let mut h = Harness::start(server());
        h.request(
            1,
            "initialize",
            json!({"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "test", "version": "1"}}),
        )
        .await;
        let response = h.recv().await;
        assert_eq!(response["result"]["protocolVersion"], json!(PROTOCOL_VERSION));
        assert_eq!(response["result"]["serverInfo"]["name"], json!("openpact-mcp"));

        h.request(2, "tools/list", json!({})).await;
        let response = h.recv().await;
        let names: Vec<_> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["failing", "fast", "hang", "panicking", "slow", "strict", "toolA"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let settings = McpSettings {
            max_concurrent_handlers: 2,
            ..McpSettings::default()
        };
        let mut h = Harness::start(server_with(settings, vec![tool("measure", gauge.clone())]));

        for id in 0..6 {
            h.request(id, "measure", json!({})).await;
        }
        for _ in 0..6 {
            assert_eq!(text_of(&h.recv().await), "measured");
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_handlers_finish() {
        let mut h = Harness::start(server());
        h.request(1, "tools/call", json!({"name": "slow"})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.shutdown.shutdown();
        h.shutdown.shutdown();

        let response = h.recv().await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(text_of(&response), "slow");

        let outcome = tokio::time::timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();
        assert_eq!(outcome.unwrap(), ServeOutcome::Shutdown);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_grace() {
        let settings = McpSettings {
            shutdown_grace: Duration::from_millis(50),
            ..McpSettings::default()
        };
        let mut h = Harness::start(server_with(settings, catalog()));
        h.request(1, "hang", json!({})).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.shutdown.shutdown();
        let outcome = tokio::time::timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();
        assert_eq!(outcome.unwrap(), ServeOutcome::Shutdown);

        // Output is closed without a response for the aborted call
        assert_eq!(h.output.next_line().await.unwrap(), None);
        assert!(h.shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_output_failure_stops_loop() {
        let Harness { mut input, output, task, .. } = Harness::start(server());
        drop(output);

        let line = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string();
        let input_stream = input.as_mut().unwrap();
        input_stream.write_all(format!("{}\n", line).as_bytes()).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(outcome, Err(McpError::OutputClosed)));
    }
}
