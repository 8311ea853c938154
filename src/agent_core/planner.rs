//! LLM planner: picks targets for a query and phrases a tool-search
//! sub-query for each.
//!
//! One model call per plan, no retries. Retrying belongs to the chat
//! capability, not to this layer.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::errors::PlanError;
use super::plan_parser::parse_plan;
use super::types::{Plan, TargetDescriptor};
use crate::inference::{ChatCapability, ChatMessage, SamplingOverrides};

/// Planner temperature. Low so the JSON shape stays stable.
const PLANNER_TEMPERATURE: f32 = 0.2;

pub struct Planner {
    chat: Arc<dyn ChatCapability>,
}

impl Planner {
    pub fn new(chat: Arc<dyn ChatCapability>) -> Self {
        Self { chat }
    }

    /// Plan `query` against `candidates`.
    ///
    /// Targets the model names but does not give a sub-query get `query`
    /// itself. Targets are not checked against `candidates` here; unknown
    /// ones are the caller's to skip.
    pub async fn plan(
        &self,
        query: &str,
        candidates: &[TargetDescriptor],
    ) -> Result<Plan, PlanError> {
        let messages = vec![
            ChatMessage::system(planning_prompt(candidates)),
            ChatMessage::user(query),
        ];
        let sampling = SamplingOverrides {
            temperature: Some(PLANNER_TEMPERATURE),
            top_p: None,
        };

        let completion = self.chat.complete(messages, None, Some(sampling)).await?;
        let text = completion.content.unwrap_or_default();
        let raw = parse_plan(&text)?;

        let mut seen = HashSet::new();
        let targets: Vec<String> = raw
            .targets
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let mut tool_queries = BTreeMap::new();
        for target in &targets {
            let sub_query = raw
                .tool_queries
                .get(target)
                .filter(|q| !q.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| query.to_string());
            tool_queries.insert(target.clone(), sub_query);
        }

        tracing::info!(
            targets = ?targets,
            candidate_count = candidates.len(),
            "plan created"
        );
        Ok(Plan {
            targets,
            tool_queries,
        })
    }
}

/// System instruction listing the candidate targets.
pub fn planning_prompt(candidates: &[TargetDescriptor]) -> String {
    let listing = if candidates.is_empty() {
        "(none)".to_string()
    } else {
        candidates
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You route user requests to the targets able to serve them.\n\
         \n\
         Available targets:\n\
         {listing}\n\
         \n\
         Choose every target the request needs (several for cross-target \
         tasks, none if no target applies). For each chosen target write a \
         short tool search query made of the actions and objects to look for.\n\
         \n\
         Respond with JSON only, no prose, in exactly this shape:\n\
         {{\"targets\": [\"crm\", \"chat\"], \"tool_queries\": \
         {{\"crm\": \"search list contacts email\", \"chat\": \"post send message channel\"}}}}"
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────
