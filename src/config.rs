//! Orchestrator configuration loading and validation.
//!
//! Reads `orchestrator.yaml` and resolves environment variables. The config
//! is the single source of truth for model endpoints, retrieval knobs, the
//! stdio servers to launch, and the agents to register.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::agents::AgentSpec;
use crate::mcp_client::ServerConfig;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "orchestrator.yaml";

/// Env var that points directly at a config file.
pub const CONFIG_ENV_VAR: &str = "MCP_ORCHESTRATOR_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find orchestrator.yaml (searched upward from {start})")]
    NotFound { start: String },

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// One OpenAI-compatible endpoint (chat or embeddings).
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model_name: String,
    /// Bearer token. Empty strings (e.g. from `${KEY:-}`) count as unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl EndpointConfig {
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_timeout_secs() -> u64 {
    60
}

/// Result-count knobs for the retrieval layer.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Tools kept per server in the single-agent design.
    #[serde(default = "default_tool_top_k")]
    pub tool_top_k: usize,
    /// Agents shortlisted for the planner in the multi-agent design.
    #[serde(default = "default_agent_shortlist_k")]
    pub agent_shortlist_k: usize,
    /// Tools kept per agent when filtering its server's catalog.
    #[serde(default = "default_agent_tool_top_k")]
    pub agent_tool_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tool_top_k: default_tool_top_k(),
            agent_shortlist_k: default_agent_shortlist_k(),
            agent_tool_top_k: default_agent_tool_top_k(),
        }
    }
}

fn default_tool_top_k() -> usize {
    5
}
fn default_agent_shortlist_k() -> usize {
    3
}
fn default_agent_tool_top_k() -> usize {
    10
}

/// Execution agent settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on model ↔ tool round trips for one query.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// System instructions for the single-agent executor.
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            instructions: default_instructions(),
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    8
}
fn default_instructions() -> String {
    "You are a helpful assistant. Use the available tools when they help answer the \
     request, and answer directly when they do not."
        .to_string()
}

/// Top-level configuration (mirrors `orchestrator.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub chat: EndpointConfig,
    pub embedding: EndpointConfig,
    /// Directory for the vector index cache. Defaults to the data directory.
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Stdio MCP servers, launched at startup.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Agents for the multi-agent design, in registration order.
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

impl OrchestratorConfig {
    /// Reject configs the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.tool_top_k == 0 || self.retrieval.agent_tool_top_k == 0 {
            return Err(ConfigError::Invalid {
                reason: "tool top_k values must be at least 1".into(),
            });
        }
        if self.execution.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid {
                reason: "execution.max_tool_rounds must be at least 1".into(),
            });
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate agent name '{}'", agent.name),
                });
            }
            if let Some(server) = &agent.mcp_server {
                if !self.servers.contains_key(server) {
                    tracing::warn!(
                        agent = %agent.name,
                        server = %server,
                        "agent references a server that is not configured; it will get no tools"
                    );
                }
            }
        }
        Ok(())
    }

    /// Directory that holds the index cache database.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => PathBuf::from(expand_tilde(dir)),
            None => crate::data_dir().join("indexes"),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `MCP_ORCHESTRATOR_CONFIG` first, then searches upward from `start`
/// for `orchestrator.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        start: start.display().to_string(),
    })
}

/// Load, interpolate, parse and validate the configuration file.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse configuration text (after `${VAR}` interpolation) and validate it.
pub fn parse_config(raw: &str) -> Result<OrchestratorConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let config: OrchestratorConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
