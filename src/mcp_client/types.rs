//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, and the catalog-level
//! [`Tool`] handle that the retrieval and execution layers pass around.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::McpError;
use super::source::ToolInvoker;
use crate::inference::types::{FunctionDefinition, ToolDefinition};

/// MCP protocol revision sent in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Tool definition as listed by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
}

/// `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// `tools/call` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenate the `text` content blocks, one per line.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// How to launch one stdio MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Shown to the planner next to the server name.
    #[serde(default)]
    pub description: String,
}

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tool ────────────────────────────────────────────────────────────────────

/// A callable function exposed by one server.
///
/// Names are unique within a server. The invoker routes calls back to the
/// owning source, so a `Tool` can be handed to an execution capability
/// without the catalog.
#[derive(Clone)]
pub struct Tool {
    pub server: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    invoker: Arc<dyn ToolInvoker>,
}

impl Tool {
    pub fn new(
        server: impl Into<String>,
        definition: McpToolDefinition,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            server: server.into(),
            name: definition.name,
            description: definition.description,
            input_schema: definition.input_schema,
            invoker,
        }
    }

    /// Text embedded into the vector index for this tool.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.name, self.description)
    }

    /// Function name advertised to the chat model. Qualified with the server
    /// so that equally named tools from different servers stay distinct.
    pub fn function_name(&self) -> String {
        format!("{}__{}", self.server, self.name)
    }

    /// OpenAI-style tool definition.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        let parameters = if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            serde_json::json!({ "type": "object", "properties": {} })
        };
        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: self.function_name(),
                description: self.description.clone(),
                parameters,
            },
        }
    }

    /// Invoke the tool on its owning server.
    pub async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value, McpError> {
        self.invoker.call_tool(&self.name, arguments).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("server", &self.server)
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoInvoker;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "result": null,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_tool_definition_accepts_camel_case_schema() {
        let json = r#"{"name": "send_email", "inputSchema": {"type": "object"}}"#;
        let def: McpToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.description, "");
        assert_eq!(def.input_schema["type"], "object");
    }

    #[test]
    fn test_call_tool_result_text_joins_text_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "line two"}
            ],
            "isError": false
        }"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.text(), "line one\nline two");
        assert!(!result.is_error);
    }

    #[test]
    fn test_tool_definition_falls_back_to_empty_object_schema() {
        let tool = Tool::new(
            "mail",
            McpToolDefinition {
                name: "send_email".into(),
                description: "Send an email".into(),
                input_schema: serde_json::Value::Null,
            },
            Arc::new(EchoInvoker),
        );
        let def = tool.to_tool_definition();
        assert_eq!(def.function.name, "mail__send_email");
        assert_eq!(def.function.parameters["type"], "object");
        assert_eq!(tool.embedding_text(), "send_email: Send an email");
    }
}
