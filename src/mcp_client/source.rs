//! Capability provider seam.
//!
//! A [`ToolSource`] is anything that can expose callable functions with a
//! name, description and input schema: a spawned MCP server
//! ([`super::stdio::StdioToolSource`]) or an in-process table
//! ([`StaticToolSource`]). The catalog only talks to this trait.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::McpError;
use super::types::{McpToolDefinition, Tool};

/// Dispatches a call for one of a source's tools.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError>;
}

/// A capability provider with an explicit connection lifecycle.
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Server name; becomes the catalog key and a planning target.
    fn name(&self) -> &str;

    /// Establish the persistent connection.
    async fn connect(&self) -> Result<(), McpError>;

    /// Functions currently exposed. Requires a live connection.
    async fn list_functions(&self) -> Result<Vec<Tool>, McpError>;

    /// Tear the connection down. Idempotent.
    async fn disconnect(&self) -> Result<(), McpError>;
}

/// In-process source backed by a fixed list of definitions and one invoker.
pub struct StaticToolSource {
    name: String,
    definitions: Vec<McpToolDefinition>,
    invoker: Arc<dyn ToolInvoker>,
}

impl StaticToolSource {
    pub fn new(
        name: impl Into<String>,
        definitions: Vec<McpToolDefinition>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            name: name.into(),
            definitions,
            invoker,
        }
    }
}

#[async_trait]
impl ToolSource for StaticToolSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), McpError> {
        Ok(())
    }

    async fn list_functions(&self) -> Result<Vec<Tool>, McpError> {
        Ok(self
            .definitions
            .iter()
            .cloned()
            .map(|def| Tool::new(self.name.clone(), def, Arc::clone(&self.invoker)))
            .collect())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        Ok(())
    }
}
