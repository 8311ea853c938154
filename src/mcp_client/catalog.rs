//! Server catalog: server name → ordered tool list.
//!
//! Entries are created when a source connects and discarded when it is
//! removed. Tools are listed once at connect time and treated as immutable
//! for the lifetime of the connection.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use serde::Serialize;

use super::errors::McpError;
use super::source::ToolSource;
use super::stdio::StdioToolSource;
use super::types::{ServerConfig, Tool};

struct ServerEntry {
    description: String,
    source: Arc<dyn ToolSource>,
    tools: Vec<Tool>,
}

/// Summary row for listing connected servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub description: String,
    pub tool_count: usize,
}

/// All connected capability providers, keyed by server name.
#[derive(Default)]
pub struct ServerCatalog {
    servers: RwLock<BTreeMap<String, ServerEntry>>,
}

impl ServerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a source, list its tools and register it.
    ///
    /// Fails with [`McpError::DuplicateServer`] if the name is taken. A source
    /// that connects but fails to list is disconnected again.
    pub async fn connect_server(
        &self,
        source: Arc<dyn ToolSource>,
        description: impl Into<String>,
    ) -> Result<usize, McpError> {
        let name = source.name().to_string();
        if self.contains(&name) {
            return Err(McpError::DuplicateServer { name });
        }

        source.connect().await?;
        let tools = match source.list_functions().await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(cleanup) = source.disconnect().await {
                    tracing::warn!(server = %name, error = %cleanup, "disconnect after failed listing failed");
                }
                return Err(e);
            }
        };
        let tool_count = tools.len();

        let rejected = {
            let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
            if servers.contains_key(&name) {
                Some(source)
            } else {
                servers.insert(
                    name.clone(),
                    ServerEntry {
                        description: description.into(),
                        source,
                        tools,
                    },
                );
                None
            }
        };
        if let Some(source) = rejected {
            if let Err(e) = source.disconnect().await {
                tracing::warn!(server = %name, error = %e, "disconnect of rejected duplicate failed");
            }
            return Err(McpError::DuplicateServer { name });
        }

        tracing::info!(server = %name, tool_count, "server registered");
        Ok(tool_count)
    }

    /// Spawn and register every configured stdio server concurrently.
    ///
    /// Returns the servers that failed; partial startup is acceptable.
    pub async fn connect_configured(
        &self,
        configs: &BTreeMap<String, ServerConfig>,
    ) -> Vec<(String, McpError)> {
        let attempts = configs.iter().map(|(name, config)| async move {
            let source: Arc<dyn ToolSource> =
                Arc::new(StdioToolSource::new(name.clone(), config.clone()));
            let result = self.connect_server(source, config.description.clone()).await;
            (name.clone(), result)
        });

        join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "server failed to start (non-fatal)");
                    Some((name, e))
                }
            })
            .collect()
    }

    /// Unregister a server and disconnect its source.
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        let entry = self
            .servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;

        entry.source.disconnect().await?;
        tracing::info!(server = %name, "server removed");
        Ok(())
    }

    /// Disconnect and drop every server.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(String, ServerEntry)> = {
            let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *servers).into_iter().collect()
        };
        for (name, entry) in drained {
            if let Err(e) = entry.source.disconnect().await {
                tracing::warn!(server = %name, error = %e, "disconnect failed");
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Tools of one server in listing order; empty for unknown servers.
    pub fn tools(&self, name: &str) -> Vec<Tool> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.tools.clone())
            .unwrap_or_default()
    }

    /// `(name, description)` of every server, sorted by name.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, entry)| (name.clone(), entry.description.clone()))
            .collect()
    }

    pub fn summaries(&self) -> Vec<ServerSummary> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, entry)| ServerSummary {
                name: name.clone(),
                description: entry.description.clone(),
                tool_count: entry.tools.len(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Structural check that every field listed in the schema's `required`
/// array is present. Full JSON Schema validation is left to the server.
pub fn validate_arguments(tool: &Tool, arguments: &serde_json::Value) -> Result<(), McpError> {
    let Some(required) = tool.input_schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };

    let args_obj = arguments.as_object();
    for field_name in required.iter().filter_map(|f| f.as_str()) {
        let has_field = args_obj
            .map(|obj| obj.contains_key(field_name))
            .unwrap_or(false);
        if !has_field {
            return Err(McpError::InvalidArguments {
                tool: tool.name.clone(),
                reason: format!("missing required field: '{field_name}'"),
            });
        }
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
