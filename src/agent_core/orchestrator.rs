//! Plan → filter → execute orchestration loop.
//!
//! States per request:
//! 1. **Plan**: one planner call over the candidate targets
//! 2. **Filter**: each known planned target narrows its items to its
//!    sub-query; unknown targets are skipped with a warning
//! 3. **Fallback**: only when the whole aggregate is empty, every item of
//!    every known planned target is used instead
//! 4. **Execute**: one execution call with the aggregate and the session's
//!    thread; the returned thread replaces the stored one
//!
//! Targets are servers ([`ServerTargets`]) or agents
//! ([`super::agents::AgentTargets`]); the loop only sees [`TargetCatalog`].

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::OrchestratorError;
use super::execution::ExecutionCapability;
use super::planner::Planner;
use super::sessions::SessionThreadStore;
use super::types::{QueryOutcome, QueryReport, TargetDescriptor, TargetSelection};
use crate::mcp_client::Tool;
use crate::retrieval::{HybridToolSearch, IndexError};

/// Message returned when the planned targets own nothing to execute with.
pub const NO_TOOLS_MESSAGE: &str =
    "No tools are available for this request. None of the selected targets provide any.";

/// The set of targets a loop plans over, and how their items are chosen.
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    /// What gets handed to the execution capability: tools or agents.
    type Item: Clone + Send + Sync + 'static;

    /// Targets offered to the planner for `query`.
    async fn candidates(&self, query: &str) -> Result<Vec<TargetDescriptor>, IndexError>;

    /// Whether `target` is currently registered.
    fn contains(&self, target: &str) -> bool;

    /// Items of `target` relevant to `sub_query`.
    async fn select(&self, target: &str, sub_query: &str) -> Result<Vec<Self::Item>, IndexError>;

    /// Every item of `target`, unfiltered.
    async fn all_items(&self, target: &str) -> Result<Vec<Self::Item>, IndexError>;

    fn item_name(item: &Self::Item) -> &str;
}

// ─── ServerTargets ───────────────────────────────────────────────────────────

/// Connected servers as targets; items are their tools.
pub struct ServerTargets {
    search: Arc<HybridToolSearch>,
    top_k: usize,
}

impl ServerTargets {
    pub fn new(search: Arc<HybridToolSearch>, top_k: usize) -> Self {
        Self { search, top_k }
    }
}

#[async_trait]
impl TargetCatalog for ServerTargets {
    type Item = Tool;

    async fn candidates(&self, _query: &str) -> Result<Vec<TargetDescriptor>, IndexError> {
        Ok(self
            .search
            .catalog()
            .descriptions()
            .into_iter()
            .map(|(name, description)| TargetDescriptor { name, description })
            .collect())
    }

    fn contains(&self, target: &str) -> bool {
        self.search.catalog().contains(target)
    }

    async fn select(&self, target: &str, sub_query: &str) -> Result<Vec<Tool>, IndexError> {
        self.search.search(target, sub_query, self.top_k).await
    }

    async fn all_items(&self, target: &str) -> Result<Vec<Tool>, IndexError> {
        Ok(self.search.catalog().tools(target))
    }

    fn item_name(item: &Tool) -> &str {
        &item.name
    }
}

// ─── OrchestrationLoop ───────────────────────────────────────────────────────

pub struct OrchestrationLoop<T, E> {
    planner: Planner,
    targets: Arc<T>,
    executor: Arc<E>,
    sessions: Arc<SessionThreadStore>,
}

impl<T, E> OrchestrationLoop<T, E>
where
    T: TargetCatalog,
    E: ExecutionCapability<T::Item>,
{
    pub fn new(
        planner: Planner,
        targets: Arc<T>,
        executor: Arc<E>,
        sessions: Arc<SessionThreadStore>,
    ) -> Self {
        Self {
            planner,
            targets,
            executor,
            sessions,
        }
    }

    pub fn targets(&self) -> &Arc<T> {
        &self.targets
    }

    pub fn sessions(&self) -> &Arc<SessionThreadStore> {
        &self.sessions
    }

    /// Drop the stored thread of a session. Returns whether one existed.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id)
    }

    /// Run one query. With a `session_id`, the session's thread is passed to
    /// execution and replaced by the one it returns; concurrent runs on the
    /// same session wait for each other.
    pub async fn run(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<QueryReport, OrchestratorError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(OrchestratorError::EmptyQuery);
        }

        let _session_guard = match session_id {
            Some(id) => Some(self.sessions.lock(id).await),
            None => None,
        };

        // Plan
        let candidates = self.targets.candidates(query).await?;
        let plan = self.planner.plan(query, &candidates).await?;

        // Filter
        let mut aggregate: Vec<T::Item> = Vec::new();
        let mut selections: Vec<TargetSelection> = Vec::new();
        let mut targets_used: Vec<String> = Vec::new();

        for target in &plan.targets {
            if !self.targets.contains(target) {
                tracing::warn!(target_name = %target, "planned target is not registered, skipping");
                continue;
            }
            let sub_query = plan.tool_query(target, query);
            let items = self.targets.select(target, sub_query).await?;
            let selected = item_names::<T>(&items);
            tracing::info!(
                target_name = %target,
                sub_query,
                selected = ?selected,
                "items selected"
            );
            if !items.is_empty() {
                targets_used.push(target.clone());
            }
            selections.push(TargetSelection {
                target: target.clone(),
                selected,
            });
            aggregate.extend(items);
        }

        // Fallback
        let used_fallback = aggregate.is_empty() && !selections.is_empty();
        if used_fallback {
            tracing::warn!(
                targets = ?selections.iter().map(|s| s.target.as_str()).collect::<Vec<_>>(),
                "filtering selected nothing, using every item of the planned targets"
            );
            for selection in &mut selections {
                let items = self.targets.all_items(&selection.target).await?;
                selection.selected = item_names::<T>(&items);
                if !items.is_empty() {
                    targets_used.push(selection.target.clone());
                }
                aggregate.extend(items);
            }
        }

        if aggregate.is_empty() {
            tracing::warn!(targets = ?plan.targets, "no tools available for the planned targets");
            return Ok(QueryReport {
                session_id: session_id.map(str::to_string),
                plan,
                selections,
                targets_used,
                used_fallback,
                outcome: QueryOutcome::NoToolsAvailable {
                    message: NO_TOOLS_MESSAGE.to_string(),
                },
            });
        }

        // Execute
        let thread = session_id.and_then(|id| self.sessions.get(id));
        tracing::info!(
            item_count = aggregate.len(),
            continues_thread = thread.is_some(),
            "executing"
        );
        let output = match self.executor.run(query, &aggregate, thread).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(class = %e.class, error = %e.message, "execution failed");
                return Err(e.into());
            }
        };

        if let Some(id) = session_id {
            self.sessions.set(id, output.thread);
        }

        Ok(QueryReport {
            session_id: session_id.map(str::to_string),
            plan,
            selections,
            targets_used,
            used_fallback,
            outcome: QueryOutcome::Answered {
                response: output.response,
            },
        })
    }
}

fn item_names<T: TargetCatalog>(items: &[T::Item]) -> Vec<String> {
    items.iter().map(|i| T::item_name(i).to_string()).collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::agents::{AgentRegistration, AgentRegistry, AgentSpec, AgentTargets, ChatAgentFactory};
    use crate::agent_core::errors::PlanError;
    use crate::agent_core::types::Thread;
    use crate::mcp_client::ServerCatalog;
    use crate::retrieval::IndexCache;
    use crate::testing::{static_source, RecordingExecutor, ScriptedChat, WordEmbedder};
    use serde_json::json;

    struct Fixture {
        chat: Arc<ScriptedChat>,
        executor: Arc<RecordingExecutor>,
        embedder: Arc<WordEmbedder>,
        orchestrator: OrchestrationLoop<ServerTargets, RecordingExecutor>,
    }

    async fn fixture(servers: &[(&str, &[(&str, &str)])], top_k: usize) -> Fixture {
        let catalog = Arc::new(ServerCatalog::new());
        for (name, tools) in servers {
            catalog
                .connect_server(static_source(name, tools), format!("{name} tools"))
                .await
                .unwrap();
        }
        let embedder = Arc::new(WordEmbedder::new());
        let search = Arc::new(HybridToolSearch::new(
            catalog,
            embedder.clone(),
            Arc::new(IndexCache::in_memory().unwrap()),
        ));
        let chat = Arc::new(ScriptedChat::new());
        let executor = Arc::new(RecordingExecutor::new());
        let orchestrator = OrchestrationLoop::new(
            Planner::new(chat.clone()),
            Arc::new(ServerTargets::new(search, top_k)),
            executor.clone(),
            Arc::new(SessionThreadStore::new()),
        );
        Fixture {
            chat,
            executor,
            embedder,
            orchestrator,
        }
    }

    const MAIL: &[(&str, &str)] = &[
        ("send_email", "Send an email"),
        ("read_inbox", "List recent emails"),
    ];

    #[tokio::test]
    async fn test_filters_each_target_with_its_sub_query() {
        let f = fixture(&[("mail", MAIL), ("chat", &[("post_message", "Post to a channel")])], 1).await;
        f.chat.push_text(r#"{"targets": ["mail"], "tool_queries": {"mail": "send"}}"#);

        let report = f.orchestrator.run("email the team", None).await.unwrap();

        assert_eq!(report.selections[0].selected, vec!["send_email"]);
        assert_eq!(report.targets_used, vec!["mail"]);
        assert!(!report.used_fallback);
        let runs = f.executor.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].items, vec!["send_email"]);
        assert_eq!(runs[0].query, "email the team");
        assert!(report.answer().is_some());
    }

    #[tokio::test]
    async fn test_fallback_uses_every_tool_of_planned_targets() {
        // With a zero search budget no sub-query can select anything.
        let f = fixture(
            &[
                ("serverA", &[("send_email", "Send an email")]),
                ("serverB", &[("post_message", "Post a chat message")]),
            ],
            0,
        )
        .await;
        f.chat.push_text(
            r#"{"targets": ["serverA", "serverB"], "tool_queries": {"serverA": "zzz", "serverB": "qqq"}}"#,
        );

        let report = f.orchestrator.run("do something", None).await.unwrap();

        assert!(report.used_fallback);
        let runs = f.executor.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].items, vec!["send_email", "post_message"]);
        assert_eq!(report.targets_used, vec!["serverA", "serverB"]);
        assert_eq!(f.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_planned_targets_without_tools_yield_no_tools_available() {
        let f = fixture(&[("empty1", &[]), ("empty2", &[])], 5).await;
        f.chat.push_text(r#"{"targets": ["empty1", "empty2"], "tool_queries": {}}"#);

        let report = f.orchestrator.run("anything", Some("s1")).await.unwrap();

        assert!(matches!(report.outcome, QueryOutcome::NoToolsAvailable { .. }));
        assert!(report.used_fallback);
        assert!(f.executor.runs().is_empty());
        assert!(f.orchestrator.sessions().get("s1").is_none());
    }

    #[tokio::test]
    async fn test_unknown_targets_are_skipped() {
        let f = fixture(&[("mail", MAIL)], 1).await;
        f.chat.push_text(r#"{"targets": ["ghost", "mail"], "tool_queries": {"mail": "inbox"}}"#);

        let report = f.orchestrator.run("check mail", None).await.unwrap();

        assert_eq!(report.plan.targets, vec!["ghost", "mail"]);
        assert_eq!(report.selections.len(), 1);
        assert_eq!(report.selections[0].target, "mail");
        assert_eq!(f.executor.runs()[0].items, vec!["read_inbox"]);
    }

    #[tokio::test]
    async fn test_only_unknown_targets_is_no_tools_available() {
        let f = fixture(&[("mail", MAIL)], 1).await;
        f.chat.push_text(r#"{"targets": ["ghost"], "tool_queries": {}}"#);

        let report = f.orchestrator.run("q", None).await.unwrap();
        assert!(matches!(report.outcome, QueryOutcome::NoToolsAvailable { .. }));
        assert!(!report.used_fallback);
        assert!(f.executor.runs().is_empty());
    }

    #[tokio::test]
    async fn test_session_thread_continues_and_clears() {
        let f = fixture(&[("mail", MAIL)], 1).await;
        for _ in 0..3 {
            f.chat.push_text(r#"{"targets": ["mail"], "tool_queries": {}}"#);
        }

        f.orchestrator.run("send email", Some("s1")).await.unwrap();
        f.orchestrator.run("send email", Some("s1")).await.unwrap();
        assert!(f.orchestrator.clear_session("s1"));
        f.orchestrator.run("send email", Some("s1")).await.unwrap();

        let runs = f.executor.runs();
        assert_eq!(runs[0].thread, None);
        assert_eq!(runs[1].thread, Some(Thread::new(json!({"turn": 1}))));
        assert_eq!(runs[2].thread, None);
        assert_eq!(
            f.orchestrator.sessions().get("s1"),
            Some(Thread::new(json!({"turn": 3})))
        );
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let f = fixture(&[("mail", MAIL)], 1).await;
        for _ in 0..2 {
            f.chat.push_text(r#"{"targets": ["mail"], "tool_queries": {}}"#);
        }
        f.orchestrator.run("send email", Some("a")).await.unwrap();
        f.orchestrator.run("send email", Some("b")).await.unwrap();
        assert_eq!(f.executor.runs()[1].thread, None);
    }

    #[tokio::test]
    async fn test_plan_parse_error_aborts_before_filtering() {
        let f = fixture(&[("mail", MAIL)], 1).await;
        f.chat.push_text("not json");

        let err = f.orchestrator.run("send email", Some("s1")).await.unwrap_err();

        assert_eq!(err.kind(), "plan");
        assert!(matches!(err, OrchestratorError::Plan(PlanError::Parse { .. })));
        assert!(f.executor.runs().is_empty());
        assert_eq!(f.embedder.calls(), 0);
        assert_eq!(f.chat.calls(), 1);
    }

    #[tokio::test]
    async fn test_execution_failure_surfaces_once() {
        let f = fixture(&[("mail", MAIL)], 1).await;
        f.chat.push_text(r#"{"targets": ["mail"], "tool_queries": {}}"#);
        f.executor.fail_with("Timeout", "inference timeout after 60s");

        let err = f.orchestrator.run("send email", Some("s1")).await.unwrap_err();

        assert_eq!(err.kind(), "execution");
        assert!(err.to_string().contains("Timeout"));
        assert_eq!(f.executor.runs().len(), 1);
        assert_eq!(f.chat.calls(), 1);
        assert!(f.orchestrator.sessions().get("s1").is_none());
    }

    #[tokio::test]
    async fn test_empty_query_rejected_without_planning() {
        let f = fixture(&[("mail", MAIL)], 1).await;
        let err = f.orchestrator.run("   ", None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyQuery));
        assert_eq!(f.chat.calls(), 0);
    }

    #[tokio::test]
    async fn test_planner_sees_every_server() {
        let f = fixture(&[("mail", MAIL), ("chat", &[("post_message", "Post")])], 1).await;
        f.chat.push_text(r#"{"targets": [], "tool_queries": {}}"#);
        f.orchestrator.run("hi", None).await.unwrap();

        let system = f.chat.requests()[0][0].content.clone().unwrap();
        assert!(system.contains("- chat: chat tools"));
        assert!(system.contains("- mail: mail tools"));
    }

    #[tokio::test]
    async fn test_agent_targets_end_to_end() {
        let catalog = Arc::new(ServerCatalog::new());
        catalog
            .connect_server(
                static_source("slack", &[("post_message", "Post a message"), ("list_users", "List users")]),
                "Slack",
            )
            .await
            .unwrap();
        let embedder = Arc::new(WordEmbedder::new());
        let cache = Arc::new(IndexCache::in_memory().unwrap());
        let search = Arc::new(HybridToolSearch::new(catalog, embedder.clone(), cache.clone()));
        let registry = AgentRegistry::new(vec![AgentRegistration::new(
            AgentSpec {
                name: "slack_agent".into(),
                description: "Posts Slack messages".into(),
                capabilities: vec![],
                mcp_server: Some("slack".into()),
                instructions: String::new(),
            },
            Arc::new(ChatAgentFactory),
        )])
        .unwrap();
        let targets = Arc::new(AgentTargets::new(Arc::new(registry), search, embedder, cache, 3, 1));

        let chat = Arc::new(ScriptedChat::new());
        chat.push_text(r#"{"targets": ["slack_agent"], "tool_queries": {"slack_agent": "post"}}"#);
        let executor = Arc::new(RecordingExecutor::new());
        let orchestrator = OrchestrationLoop::new(
            Planner::new(chat.clone()),
            targets,
            executor.clone(),
            Arc::new(SessionThreadStore::new()),
        );

        let report = orchestrator.run("post hello to slack", None).await.unwrap();

        assert_eq!(report.targets_used, vec!["slack_agent"]);
        let runs = executor.runs();
        assert_eq!(runs[0].items, vec!["slack_agent"]);
        assert_eq!(runs[0].agent_tools, vec![vec!["post_message".to_string()]]);
        let system = chat.requests()[0][0].content.clone().unwrap();
        assert!(system.contains("- slack_agent: Posts Slack messages"));
    }
}
