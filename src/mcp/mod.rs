//! Model Context Protocol client and per-run tool integration.
//!
//! Specialist templates can declare MCP servers as dependencies; each
//! benchmark run resolves those declarations into live connections, merges
//! the servers' tools into the run's tool set, and tears everything down
//! when the run ends. Connections are JSON-RPC 2.0 over stdio
//! (newline-delimited, spawned child process) or HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AgentError, McpError};
use crate::llm::types::{ToolDefinition, ToolHandler, ToolHandlerMap};

/// MCP protocol revision this client speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// How long to wait for a single server response.
const RESPONSE_TIMEOUT_SECS: u64 = 30;

/// Declaration of one MCP server, as written in a specialist template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Server name, used in logs and error messages.
    pub name: String,
    pub transport: McpTransportConfig,
}

/// Transport-specific connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransportConfig {
    /// Spawn a child process and speak newline-delimited JSON-RPC on its
    /// stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// POST JSON-RPC requests to a remote endpoint.
    Http {
        base_url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Tool definition as reported by a server's `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl JsonRpcRequest {
    fn call(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    /// Notification: no id, no response expected.
    fn notification(method: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params: Some(json!({})),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

struct StdioTransport {
    process: Child,
    stdin: tokio::process::ChildStdin,
    stdout_reader: BufReader<tokio::process::ChildStdout>,
}

struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
}

enum ActiveTransport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

/// JSON-RPC 2.0 client for one MCP server.
pub struct McpClient {
    server_name: String,
    transport: Mutex<ActiveTransport>,
    request_id: AtomicU64,
}

impl McpClient {
    /// Connects and performs the MCP initialization handshake:
    /// `initialize` request, capability response, `notifications/initialized`.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        let transport = match &config.transport {
            McpTransportConfig::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null());
                for (key, value) in env {
                    cmd.env(key, value);
                }

                let mut process = cmd.spawn().map_err(|e| McpError::SpawnFailed {
                    server: config.name.clone(),
                    command: command.clone(),
                    reason: e.to_string(),
                })?;

                let stdin = process.stdin.take().ok_or_else(|| McpError::SpawnFailed {
                    server: config.name.clone(),
                    command: command.clone(),
                    reason: "stdin not captured".to_string(),
                })?;
                let stdout = process.stdout.take().ok_or_else(|| McpError::SpawnFailed {
                    server: config.name.clone(),
                    command: command.clone(),
                    reason: "stdout not captured".to_string(),
                })?;

                ActiveTransport::Stdio(StdioTransport {
                    process,
                    stdin,
                    stdout_reader: BufReader::new(stdout),
                })
            }
            McpTransportConfig::Http { base_url, headers } => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(RESPONSE_TIMEOUT_SECS))
                    .build()
                    .unwrap_or_default();
                ActiveTransport::Http(HttpTransport {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    client,
                    headers: headers.clone(),
                })
            }
        };

        let client = Self {
            server_name: config.name.clone(),
            transport: Mutex::new(transport),
            request_id: AtomicU64::new(1),
        };
        client.initialize().await?;
        info!(server = %config.name, "MCP server connected");
        Ok(client)
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "benchforge",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let response = self.send_request("initialize", Some(params)).await?;
        let result = response.result.ok_or_else(|| McpError::InitFailed {
            server: self.server_name.clone(),
            reason: response
                .error
                .map(|e| format!("[{}] {}", e.code, e.message))
                .unwrap_or_else(|| "no result in initialize response".to_string()),
        })?;

        debug!(
            server = %self.server_name,
            protocol = result
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown"),
            "MCP handshake complete"
        );

        self.send_notification("notifications/initialized").await
    }

    /// Lists the tools this server exposes.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let response = self.send_request("tools/list", None).await?;
        let result = response.result.ok_or_else(|| McpError::RequestFailed {
            method: "tools/list".to_string(),
            reason: response
                .error
                .map(|e| format!("[{}] {}", e.code, e.message))
                .unwrap_or_else(|| "no result".to_string()),
        })?;

        let tools = result
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .into_iter()
            .map(|tool| McpToolInfo {
                name: tool
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                input_schema: tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
            .collect())
    }

    /// Calls a tool and flattens the MCP content envelope
    /// (`{content: [{type: "text", text}]}`) into plain text.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<String, McpError> {
        let params = json!({ "name": name, "arguments": args });
        let response = self.send_request("tools/call", Some(params)).await?;

        if let Some(error) = response.error {
            return Err(McpError::ToolCallFailed {
                tool: name.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        let result = response.result.unwrap_or(Value::Null);
        if let Some(content) = result.get("content").and_then(|v| v.as_array()) {
            let text_parts: Vec<&str> = content
                .iter()
                .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
                .collect();
            if !text_parts.is_empty() {
                return Ok(text_parts.join("\n"));
            }
        }

        Ok(serde_json::to_string(&result)?)
    }

    /// Closes the connection, killing the child process for stdio servers.
    pub async fn disconnect(&self) {
        let mut transport = self.transport.lock().await;
        if let ActiveTransport::Stdio(stdio) = &mut *transport {
            let _ = stdio.stdin.shutdown().await;
            let _ = stdio.process.kill().await;
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::call(id, method, params);

        let mut transport = self.transport.lock().await;
        match &mut *transport {
            ActiveTransport::Stdio(stdio) => {
                write_stdio_message(&mut stdio.stdin, &request).await?;
                read_stdio_response(&mut stdio.stdout_reader).await
            }
            ActiveTransport::Http(http) => send_http_request(http, &request).await,
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), McpError> {
        let request = JsonRpcRequest::notification(method);
        let mut transport = self.transport.lock().await;
        match &mut *transport {
            ActiveTransport::Stdio(stdio) => write_stdio_message(&mut stdio.stdin, &request).await,
            ActiveTransport::Http(http) => {
                // Best effort; notifications carry no response.
                let _ = send_http_request(http, &request).await;
                Ok(())
            }
        }
    }
}

async fn write_stdio_message(
    stdin: &mut tokio::process::ChildStdin,
    request: &JsonRpcRequest,
) -> Result<(), McpError> {
    let message = serde_json::to_string(request)?;
    stdin.write_all(message.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// Reads newline-delimited JSON until a JSON-RPC response appears, skipping
/// log lines servers print to stdout.
async fn read_stdio_response(
    reader: &mut BufReader<tokio::process::ChildStdout>,
) -> Result<JsonRpcResponse, McpError> {
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = tokio::time::timeout(
            Duration::from_secs(RESPONSE_TIMEOUT_SECS),
            reader.read_line(&mut line),
        )
        .await
        .map_err(|_| McpError::Timeout)??;

        if bytes_read == 0 {
            return Err(McpError::RequestFailed {
                method: "read".to_string(),
                reason: "server closed stdout (process may have crashed)".to_string(),
            });
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) {
            return Ok(response);
        }
    }
}

async fn send_http_request(
    transport: &HttpTransport,
    request: &JsonRpcRequest,
) -> Result<JsonRpcResponse, McpError> {
    let url = format!("{}/jsonrpc", transport.base_url);
    let mut builder = transport
        .client
        .post(&url)
        .header("Content-Type", "application/json");
    for (key, value) in &transport.headers {
        builder = builder.header(key, value);
    }

    let response = builder
        .json(request)
        .send()
        .await
        .map_err(|e| McpError::RequestFailed {
            method: request.method.clone(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(McpError::RequestFailed {
            method: request.method.clone(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let body = response.text().await.map_err(|e| McpError::RequestFailed {
        method: request.method.clone(),
        reason: e.to_string(),
    })?;
    Ok(serde_json::from_str(&body)?)
}

/// Bridges one MCP tool into the agent's handler map.
struct McpToolHandler {
    client: Arc<McpClient>,
    tool: String,
}

#[async_trait]
impl ToolHandler for McpToolHandler {
    async fn call(&self, args: Value) -> Result<String, AgentError> {
        self.client
            .call_tool(&self.tool, args)
            .await
            .map_err(|e| AgentError::ToolFailed(e.to_string()))
    }
}

/// All MCP connections belonging to one benchmark run.
///
/// Scoped to the run on purpose: concurrent runs each resolve their own set,
/// and [`McpToolSet::release`] must be called when the run ends, success or
/// not. Release is idempotent, so calling it from a cleanup path and again
/// from a happy path is fine.
pub struct McpToolSet {
    clients: Vec<Arc<McpClient>>,
    definitions: Vec<ToolDefinition>,
    handlers: ToolHandlerMap,
    released: AtomicBool,
}

impl McpToolSet {
    /// Connects to every declared server and merges their tools.
    ///
    /// If any server fails to connect, servers that already connected are
    /// released before the error is returned.
    pub async fn resolve(servers: &[McpServerConfig]) -> Result<Self, McpError> {
        let mut clients: Vec<Arc<McpClient>> = Vec::new();
        let mut definitions: Vec<ToolDefinition> = Vec::new();
        let mut handlers: ToolHandlerMap = HashMap::new();

        for config in servers {
            let client = match McpClient::connect(config).await {
                Ok(client) => Arc::new(client),
                Err(err) => {
                    for connected in &clients {
                        connected.disconnect().await;
                    }
                    return Err(err);
                }
            };

            let tools = match client.list_tools().await {
                Ok(tools) => tools,
                Err(err) => {
                    client.disconnect().await;
                    for connected in &clients {
                        connected.disconnect().await;
                    }
                    return Err(err);
                }
            };

            debug!(server = %config.name, tools = tools.len(), "MCP tools merged");
            for tool in tools {
                definitions.push(ToolDefinition::new(
                    tool.name.clone(),
                    tool.description,
                    tool.input_schema,
                ));
                handlers.insert(
                    tool.name.clone(),
                    Arc::new(McpToolHandler {
                        client: Arc::clone(&client),
                        tool: tool.name,
                    }),
                );
            }
            clients.push(client);
        }

        Ok(Self {
            clients,
            definitions,
            handlers,
            released: AtomicBool::new(false),
        })
    }

    /// Tool definitions contributed by all connected servers.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Handler map entries for the run's tool set.
    pub fn handlers(&self) -> ToolHandlerMap {
        self.handlers.clone()
    }

    /// Disconnects every server. Idempotent.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for client in &self.clients {
            client.disconnect().await;
        }
        if !self.clients.is_empty() {
            info!(servers = self.clients.len(), "MCP servers released");
        }
    }
}

impl Drop for McpToolSet {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) && !self.clients.is_empty() {
            warn!("MCP tool set dropped without release; child servers may linger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOCK_SERVER: &str = r#"
import sys, json

def respond(request_id, result):
    response = {"jsonrpc": "2.0", "id": request_id, "result": result}
    sys.stdout.write(json.dumps(response) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        msg = json.loads(line)
    except Exception:
        continue

    method = msg.get("method", "")
    msg_id = msg.get("id")

    if method == "initialize":
        respond(msg_id, {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock", "version": "0.1.0"}
        })
    elif method == "tools/list":
        respond(msg_id, {
            "tools": [{
                "name": "lookup_docs",
                "description": "Look up documentation",
                "inputSchema": {
                    "type": "object",
                    "properties": {"topic": {"type": "string"}},
                    "required": ["topic"]
                }
            }]
        })
    elif method == "tools/call":
        args = msg.get("params", {}).get("arguments", {})
        respond(msg_id, {
            "content": [{"type": "text", "text": "docs for " + args.get("topic", "?")}]
        })
"#;

    fn mock_server_config(dir: &std::path::Path) -> McpServerConfig {
        let script = dir.join("mock_server.py");
        std::fs::write(&script, MOCK_SERVER).unwrap();
        McpServerConfig {
            name: "mock".to_string(),
            transport: McpTransportConfig::Stdio {
                command: "python3".to_string(),
                args: vec![script.to_string_lossy().to_string()],
                env: HashMap::new(),
            },
        }
    }

    #[test]
    fn test_server_config_from_yaml() {
        let yaml = r#"
name: context7
transport:
  type: stdio
  command: npx
  args: ["-y", "@upstash/context7-mcp"]
  env:
    API_KEY: secret
"#;
        let config: McpServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "context7");
        match config.transport {
            McpTransportConfig::Stdio { command, args, env } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 2);
                assert_eq!(env["API_KEY"], "secret");
            }
            other => panic!("unexpected transport: {:?}", other),
        }
    }

    #[test]
    fn test_http_config_from_yaml() {
        let yaml = r#"
name: remote
transport:
  type: http
  base_url: http://localhost:8080
"#;
        let config: McpServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.transport,
            McpTransportConfig::Http { .. }
        ));
    }

    #[test]
    fn test_notification_has_no_id() {
        let request = JsonRpcRequest::notification("notifications/initialized");
        let json = serde_json::to_string(&request).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert!(parsed.get("id").is_none());
        assert_eq!(parsed["method"], "notifications/initialized");
    }

    #[tokio::test]
    async fn test_connect_nonexistent_command() {
        let config = McpServerConfig {
            name: "bad".to_string(),
            transport: McpTransportConfig::Stdio {
                command: "/nonexistent/mcp/server".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        };

        let result = McpClient::connect(&config).await;
        assert!(matches!(result, Err(McpError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_tool_set_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = mock_server_config(dir.path());

        let set = McpToolSet::resolve(std::slice::from_ref(&config))
            .await
            .unwrap();

        assert_eq!(set.definitions().len(), 1);
        assert_eq!(set.definitions()[0].name, "lookup_docs");

        let handlers = set.handlers();
        let handler = handlers.get("lookup_docs").unwrap();
        let output = handler.call(json!({"topic": "tokio"})).await.unwrap();
        assert_eq!(output, "docs for tokio");

        set.release().await;
        // A second release is a no-op.
        set.release().await;
    }

    #[tokio::test]
    async fn test_resolve_failure_releases_earlier_servers() {
        let dir = tempfile::tempdir().unwrap();
        let good = mock_server_config(dir.path());
        let bad = McpServerConfig {
            name: "bad".to_string(),
            transport: McpTransportConfig::Stdio {
                command: "/nonexistent/mcp/server".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        };

        let result = McpToolSet::resolve(&[good, bad]).await;
        assert!(result.is_err());
    }
}
