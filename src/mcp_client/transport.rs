//! JSON-RPC over stdio transport.
//!
//! Line-delimited JSON-RPC with a spawned MCP server: requests are written to
//! the child's stdin, responses read back from its stdout. Lines that are not
//! JSON-RPC responses (server log output) are skipped.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
///
/// Requests are serialized: the reader lock is held from the moment a request
/// is written until its response arrives, so concurrent callers never consume
/// each other's replies.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<Option<ChildStdin>>,
    reader: Mutex<BufReader<ChildStdout>>,
}

impl StdioTransport {
    pub fn new(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Some(stdin)),
            reader: Mutex::new(BufReader::new(stdout)),
        }
    }

    /// Send a JSON-RPC request and wait for the response with the same `id`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let payload = serde_json::to_value(&req)
            .map_err(|e| self.error(format!("failed to serialize request: {e}")))?;

        let mut reader = self.reader.lock().await;
        self.write_line(&payload).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.error("server stdout closed (process may have exited)".into()));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = resp.id,
                        "skipping response for another request"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = trimmed, "non-JSON-RPC output");
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }
        self.write_line(&notification).await
    }

    async fn write_line(&self, message: &serde_json::Value) -> Result<(), McpError> {
        let mut line = message.to_string();
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(self.error("stdin already closed".into()));
        };
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.error(format!("failed to flush stdin: {e}")))
    }

    /// Close the child's stdin, which signals an MCP server to exit.
    pub async fn close(&self) {
        self.writer.lock().await.take();
    }

    fn error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
