//! Planner output parser.
//!
//! The planner must answer with exactly
//! `{"targets": [string, ...], "tool_queries": {string: string}}`,
//! either bare or inside a markdown code fence. Anything else is a parse
//! failure; nothing is coerced.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::errors::PlanError;

/// Plan JSON as the model produced it, before normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPlan {
    pub targets: Vec<String>,
    pub tool_queries: BTreeMap<String, String>,
}

/// Decode a planner reply.
pub fn parse_plan(text: &str) -> Result<RawPlan, PlanError> {
    serde_json::from_str::<RawPlan>(strip_code_fences(text)).map_err(|e| PlanError::Parse {
        reason: e.to_string(),
        raw_response: text.to_string(),
    })
}

/// Body of the first ```` ```json ```` / ```` ``` ```` block, if any.
///
/// Text before or after the block is ignored. Without a complete fence the
/// trimmed reply is returned as is, so prose around bare JSON still fails
/// to decode.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[open + 3..];
    let Some(close) = rest.find("```") else {
        return trimmed;
    };
    // Info string (`json`, `JSON`, ...) ends at the first non-alphanumeric.
    rest[..close]
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
        .trim()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
