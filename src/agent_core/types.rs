//! Shared types for the agent core.
//!
//! Plans, threads, execution responses and the per-request report returned
//! by the orchestration loop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── Planning ───────────────────────────────────────────────────────────────

/// A server or agent the planner may choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub name: String,
    pub description: String,
}

impl TargetDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Planner output for one query. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Chosen targets in the order the planner listed them, without repeats.
    pub targets: Vec<String>,
    /// Tool-search sub-query per target. Every target has an entry.
    pub tool_queries: BTreeMap<String, String>,
}

impl Plan {
    /// Sub-query for `target`, or `query` when the plan has none.
    pub fn tool_query<'a>(&'a self, target: &str, query: &'a str) -> &'a str {
        self.tool_queries
            .get(target)
            .map(String::as_str)
            .unwrap_or(query)
    }
}

// ─── Threads ────────────────────────────────────────────────────────────────

/// Conversation continuation state produced and consumed by an execution
/// capability.
///
/// The orchestration layer only stores and forwards it. It is a plain value:
/// each run takes the old thread and hands back a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thread(serde_json::Value);

impl Thread {
    pub fn new(state: serde_json::Value) -> Self {
        Self(state)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

// ─── Execution ──────────────────────────────────────────────────────────────

/// One tool call made while producing a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Qualified `server__tool` name.
    pub tool: String,
    pub arguments: serde_json::Value,
    /// The tool reported failure, or the call could not be dispatched.
    pub is_error: bool,
}

/// What one agent contributed to a collaboration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContribution {
    pub agent: String,
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,
}

/// Response of an execution capability. Adapters normalise whatever their
/// backend returns into one of these shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResponse {
    /// A single agent answered, possibly after calling tools.
    Message {
        text: String,
        tool_calls: Vec<ToolInvocation>,
    },
    /// Several agents answered in turn. `text` is the final answer.
    Collaboration {
        text: String,
        contributions: Vec<AgentContribution>,
    },
}

impl ExecutionResponse {
    /// Final answer text.
    pub fn text(&self) -> &str {
        match self {
            ExecutionResponse::Message { text, .. } => text,
            ExecutionResponse::Collaboration { text, .. } => text,
        }
    }
}

/// Result of one execution run: the response and the thread to continue from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub response: ExecutionResponse,
    pub thread: Thread,
}

// ─── Reports ────────────────────────────────────────────────────────────────

/// Items chosen for one planned target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSelection {
    pub target: String,
    /// Tool names (servers) or agent names (agents), in selection order.
    pub selected: Vec<String>,
}

/// How a request ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered { response: ExecutionResponse },
    /// The planned targets own nothing to execute with.
    NoToolsAvailable { message: String },
}

/// Everything one orchestration run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub plan: Plan,
    /// One entry per known planned target, in plan order.
    pub selections: Vec<TargetSelection>,
    /// Targets that contributed at least one item to the execution set.
    pub targets_used: Vec<String>,
    /// Filtering found nothing and every item of the planned targets was used.
    pub used_fallback: bool,
    pub outcome: QueryOutcome,
}

impl QueryReport {
    /// Answer text, if execution ran.
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            QueryOutcome::Answered { response } => Some(response.text()),
            QueryOutcome::NoToolsAvailable { .. } => None,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_query_falls_back_to_query() {
        let plan = Plan {
            targets: vec!["mail".into(), "chat".into()],
            tool_queries: BTreeMap::from([("mail".to_string(), "send email".to_string())]),
        };
        assert_eq!(plan.tool_query("mail", "raw"), "send email");
        assert_eq!(plan.tool_query("chat", "raw"), "raw");
    }

    #[test]
    fn test_execution_response_is_tagged() {
        let response = ExecutionResponse::Message {
            text: "done".into(),
            tool_calls: vec![],
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["kind"], "message");
        assert_eq!(value["text"], "done");

        let back: ExecutionResponse = serde_json::from_value(json!({
            "kind": "collaboration",
            "text": "final",
            "contributions": [{"agent": "writer", "text": "draft"}]
        }))
        .unwrap();
        assert_eq!(back.text(), "final");
    }

    #[test]
    fn test_thread_serializes_transparently() {
        let thread = Thread::new(json!({"messages": []}));
        assert_eq!(serde_json::to_value(&thread).unwrap(), json!({"messages": []}));
    }

    #[test]
    fn test_report_outcome_status() {
        let report = QueryReport {
            session_id: None,
            plan: Plan::default(),
            selections: vec![],
            targets_used: vec![],
            used_fallback: true,
            outcome: QueryOutcome::NoToolsAvailable {
                message: "no tools available".into(),
            },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcome"]["status"], "no_tools_available");
        assert!(value.get("session_id").is_none());
        assert!(report.answer().is_none());
    }
}
