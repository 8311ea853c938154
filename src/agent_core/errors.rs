//! Agent core error types.
//!
//! [`OrchestratorError`] is the single structured error a request can end
//! with. Its [`kind`](OrchestratorError::kind) tells planning failures apart
//! from index, catalog and execution failures.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;
use crate::retrieval::IndexError;

/// Errors from the planning call.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The planner model could not be reached or answered with an error.
    #[error("planner model call failed: {source}")]
    Llm {
        #[source]
        source: InferenceError,
    },

    /// The planner reply is not the expected JSON object.
    #[error("failed to parse plan: {reason}")]
    Parse {
        reason: String,
        /// Reply text as received, before fence stripping.
        raw_response: String,
    },
}

impl From<InferenceError> for PlanError {
    fn from(source: InferenceError) -> Self {
        PlanError::Llm { source }
    }
}

/// A failure raised by an execution capability.
///
/// Keeps the class name of the underlying error next to its message so the
/// caller can still tell a timeout from a malformed reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}: {message}")]
pub struct ExecutionError {
    pub class: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

impl From<InferenceError> for ExecutionError {
    fn from(e: InferenceError) -> Self {
        Self::new(e.class_name(), e.to_string())
    }
}

/// Errors from agent registration.
#[derive(Debug, Error)]
pub enum AgentError {
    /// An agent with this name is already registered.
    #[error("agent '{name}' is already registered")]
    DuplicateAgent { name: String },

    /// No agent with this name is registered.
    #[error("unknown agent: '{name}'")]
    UnknownAgent { name: String },
}

/// Request-boundary error of the orchestration loop.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The query was empty or whitespace.
    #[error("query is empty")]
    EmptyQuery,

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("tool index unavailable: {0}")]
    Index(#[from] IndexError),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("catalog error: {0}")]
    Catalog(#[from] McpError),
}

impl OrchestratorError {
    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::EmptyQuery => "invalid_query",
            OrchestratorError::Plan(_) => "plan",
            OrchestratorError::Index(_) => "index",
            OrchestratorError::Execution(_) => "execution",
            OrchestratorError::Catalog(_) => "catalog",
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
