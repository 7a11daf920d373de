//! MCP server — request routing and the stdio serve loop.
//!
//! Every request runs on its own task so a synchronous tool that blocks for
//! minutes never stalls `get_job_status` polling on the same connection.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::task::JoinSet;

use super::errors::ServerError;
use super::transport::{Incoming, MessageReader, MessageWriter};
use super::types::{
    error_codes, CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse, ServerInfo,
    TextContent, ToolDefinition, DEFAULT_PROTOCOL_VERSION, JSONRPC_VERSION,
};
use crate::tools::{status_tool_schema, Dispatcher, STATUS_TOOL_DESCRIPTION, STATUS_TOOL_NAME};

// ─── McpServer ───────────────────────────────────────────────────────────────

/// Serves the configured tools over JSON-RPC.
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let identity = &dispatcher.config().server;
        let info = ServerInfo {
            name: identity.name.clone(),
            version: identity.version.clone(),
        };
        Self { dispatcher, info }
    }

    /// Tool list: configured tools followed by the status tool.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .dispatcher
            .config()
            .tools
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema(),
            })
            .collect();

        tools.push(ToolDefinition {
            name: STATUS_TOOL_NAME.to_string(),
            description: STATUS_TOOL_DESCRIPTION.to_string(),
            input_schema: status_tool_schema(),
        });
        tools
    }

    // ─── Routing ─────────────────────────────────────────────────────────

    /// Handle one request. Notifications produce no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }
        let id = request.id.clone().unwrap_or_default();

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                error_codes::INVALID_REQUEST,
                format!("unsupported jsonrpc version: {:?}", request.jsonrpc),
            ));
        }

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize(request.params.as_ref())),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                serde_json::json!({ "tools": self.tool_definitions() }),
            ),
            "tools/call" => self.call_tool(id, request.params).await,
            other => {
                tracing::debug!(method = other, "unknown method");
                JsonRpcResponse::failure(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                )
            }
        };

        Some(response)
    }

    fn initialize(&self, params: Option<&serde_json::Value>) -> serde_json::Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        tracing::info!(protocol_version, "client initialized");

        serde_json::json!({
            "protocolVersion": protocol_version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": self.info,
        })
    }

    async fn call_tool(
        &self,
        id: serde_json::Value,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        let params: CallToolParams =
            match serde_json::from_value(params.unwrap_or(serde_json::Value::Null)) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::failure(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid tools/call params: {e}"),
                    );
                }
            };

        let response = self
            .dispatcher
            .call_tool(&params.name, params.arguments)
            .await;

        let text = serde_json::to_string_pretty(&response.payload)
            .unwrap_or_else(|_| response.payload.to_string());
        let result = CallToolResult {
            content: vec![TextContent::new(text)],
            is_error: response.is_error,
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    // ─── Serve Loop ──────────────────────────────────────────────────────

    /// Serve until the client closes its input, then wait for in-flight
    /// requests to answer.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = MessageReader::new(reader);
        let writer = Arc::new(MessageWriter::new(writer));
        let mut in_flight = JoinSet::new();

        while let Some(message) = reader.next_message().await? {
            // Reap finished request tasks so the set stays small.
            while in_flight.try_join_next().is_some() {}

            match message {
                Incoming::Malformed { reason } => {
                    tracing::warn!(reason = %reason, "malformed message");
                    let response = JsonRpcResponse::failure(
                        serde_json::Value::Null,
                        error_codes::PARSE_ERROR,
                        format!("Parse error: {reason}"),
                    );
                    writer.send(&response).await?;
                }
                Incoming::Request(request) => {
                    let server = Arc::clone(&self);
                    let writer = Arc::clone(&writer);
                    in_flight.spawn(async move {
                        let method = request.method.clone();
                        if let Some(response) = server.handle_request(request).await {
                            if let Err(e) = writer.send(&response).await {
                                tracing::error!(method = %method, error = %e, "failed to send response");
                            }
                        }
                    });
                }
            }
        }

        tracing::info!(pending = in_flight.len(), "client closed input");
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }

    /// Serve over the process's stdin/stdout.
    pub async fn serve_stdio(self: Arc<Self>) -> Result<(), ServerError> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
