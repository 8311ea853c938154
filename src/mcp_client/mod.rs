//! MCP client: capability providers and the server catalog.
//!
//! This module handles:
//! - JSON-RPC 2.0 over the stdio of spawned MCP servers
//! - The [`ToolSource`] seam (`connect`, `list_functions`, `disconnect`)
//! - The [`ServerCatalog`] of connected servers and their tools, with
//!   runtime registration and removal

pub mod catalog;
pub mod errors;
pub mod source;
pub mod stdio;
pub mod transport;
pub mod types;

pub use catalog::{validate_arguments, ServerCatalog, ServerSummary};
pub use errors::McpError;
pub use source::{StaticToolSource, ToolInvoker, ToolSource};
pub use stdio::StdioToolSource;
pub use types::{McpToolDefinition, ServerConfig, Tool};
