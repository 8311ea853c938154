//! Stdio MCP servers as tool sources.
//!
//! Spawns the configured command, performs the MCP handshake
//! (`initialize` then `notifications/initialized`), lists tools with
//! `tools/list` and dispatches `tools/call`. Shutdown closes stdin, waits,
//! then kills.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::source::{ToolInvoker, ToolSource};
use super::transport::{extract_result, StdioTransport};
use super::types::{
    CallToolResult, InitializeResult, ServerConfig, ServerInfo, Tool, ToolListResult,
    PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake. Generous because some servers pull
/// packages (`npx -y …`) on first launch.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single `tools/list` or `tools/call`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── StdioToolSource ─────────────────────────────────────────────────────────

/// A tool source backed by one child process speaking MCP over stdio.
pub struct StdioToolSource {
    name: String,
    config: ServerConfig,
    session: Mutex<Option<Arc<StdioSession>>>,
}

impl StdioToolSource {
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            session: Mutex::new(None),
        }
    }

    async fn current_session(&self) -> Result<Arc<StdioSession>, McpError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::NotConnected {
                name: self.name.clone(),
            })
    }
}

#[async_trait]
impl ToolSource for StdioToolSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), McpError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let session = spawn_session(&self.name, &self.config).await?;
        tracing::info!(
            server = %self.name,
            server_name = ?session.server_info.as_ref().and_then(|i| i.name.as_deref()),
            server_version = ?session.server_info.as_ref().and_then(|i| i.version.as_deref()),
            "MCP server connected"
        );
        *slot = Some(Arc::new(session));
        Ok(())
    }

    async fn list_functions(&self) -> Result<Vec<Tool>, McpError> {
        let session = self.current_session().await?;
        let result = session
            .call("tools/list", Some(serde_json::json!({})), "tools/list")
            .await?;
        let listed: ToolListResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: self.name.clone(),
                reason: format!("failed to parse tools/list response: {e}"),
            })?;

        let invoker: Arc<dyn ToolInvoker> = session;
        Ok(listed
            .tools
            .into_iter()
            .map(|def| Tool::new(self.name.clone(), def, Arc::clone(&invoker)))
            .collect())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.shutdown().await;
            tracing::info!(server = %self.name, "MCP server disconnected");
        }
        Ok(())
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// A live, initialized server process.
struct StdioSession {
    server: String,
    process: Mutex<Child>,
    transport: StdioTransport,
    server_info: Option<ServerInfo>,
}

impl StdioSession {
    /// Send a request with [`REQUEST_TIMEOUT`] and unwrap the JSON-RPC result.
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        label: &str,
    ) -> Result<serde_json::Value, McpError> {
        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.transport.request(method, params))
            .await
            .map_err(|_| McpError::Timeout {
                tool: label.to_string(),
                timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
            })??;
        extract_result(response)
    }

    async fn shutdown(&self) {
        self.transport.close().await;
        let mut process = self.process.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server, %status, "server exited");
            }
            _ => {
                tracing::warn!(server = %self.server, "server did not exit, killing");
                let _ = process.kill().await;
            }
        }
    }
}

#[async_trait]
impl ToolInvoker for StdioSession {
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = self.call("tools/call", Some(params), name).await?;

        let parsed: CallToolResult =
            serde_json::from_value(result.clone()).map_err(|e| McpError::TransportError {
                server: self.server.clone(),
                reason: format!("failed to parse tools/call response: {e}"),
            })?;
        if parsed.is_error {
            return Err(McpError::ToolFailed {
                tool: name.to_string(),
                message: parsed.text(),
            });
        }
        Ok(result)
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

async fn spawn_session(name: &str, config: &ServerConfig) -> Result<StdioSession, McpError> {
    let (program, args) = platform_command(&config.command, &config.args, cfg!(windows));
    let mut cmd = Command::new(&program);
    cmd.args(&args);
    cmd.envs(&config.env);
    if let Some(dir) = config.cwd.as_deref() {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{program}: {e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr_handle = child.stderr.take();

    let transport = StdioTransport::new(name, stdin, stdout);

    let failure = match tokio::time::timeout(INIT_TIMEOUT, initialize(&transport, name)).await {
        Ok(Ok(server_info)) => {
            return Ok(StdioSession {
                server: name.to_string(),
                process: Mutex::new(child),
                transport,
                server_info,
            });
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
    };

    let _ = child.kill().await;
    let stderr_ctx = read_stderr_on_failure(stderr_handle).await;
    if !stderr_ctx.is_empty() {
        tracing::warn!(server = name, stderr = %stderr_ctx, "server stderr captured on failure");
    }
    Err(McpError::InitFailed {
        name: name.to_string(),
        reason: format!("{failure}{}", format_stderr_suffix(&stderr_ctx)),
    })
}

/// MCP handshake. Returns the server's self-description.
async fn initialize(
    transport: &StdioTransport,
    server_name: &str,
) -> Result<Option<ServerInfo>, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;
    tracing::debug!(
        server = server_name,
        protocol = ?init.protocol_version,
        capabilities = %init.capabilities,
        "initialize acknowledged"
    );

    transport.notify("notifications/initialized", None).await?;
    Ok(init.server_info)
}

/// `npx`/`npm` are batch shims on Windows and cannot be spawned directly.
fn platform_command(command: &str, args: &[String], windows: bool) -> (String, Vec<String>) {
    if windows && matches!(command, "npx" | "npm") {
        let mut wrapped = vec!["/c".to_string(), command.to_string()];
        wrapped.extend(args.iter().cloned());
        return ("cmd".to_string(), wrapped);
    }
    (command.to_string(), args.to_vec())
}

/// Read whatever a failed server wrote to stderr, truncated to 2000 chars.
async fn read_stderr_on_failure(stderr_handle: Option<tokio::process::ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > 2000 {
                let mut cut = 2000;
                while !buf.is_char_boundary(cut) {
                    cut -= 1;
                }
                buf.truncate(cut);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}
