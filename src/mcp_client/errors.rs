//! MCP client error types.

use thiserror::Error;

/// Errors from tool sources and the server catalog.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The server reported the tool call itself as failed.
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
    },

    /// Tool call arguments are missing fields the input schema requires.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        tool: String,
        timeout_ms: u64,
    },

    /// The source was used before `connect` or after `disconnect`.
    #[error("server '{name}' is not connected")]
    NotConnected {
        name: String,
    },

    /// A server with this name is already registered.
    #[error("server '{name}' is already registered")]
    DuplicateServer {
        name: String,
    },

    /// No server with this name is registered.
    #[error("unknown server: '{name}'")]
    UnknownServer {
        name: String,
    },
}
