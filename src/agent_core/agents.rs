//! Multi-agent targets.
//!
//! The [`AgentRegistry`] is built by the composition root from an explicit
//! list of [`AgentRegistration`]s. [`AgentTargets`] exposes it to the
//! orchestration loop: the planner sees a vector shortlist of agents, and
//! each planned agent is instantiated with the tools of its MCP server
//! narrowed to its sub-query.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::errors::AgentError;
use super::orchestrator::TargetCatalog;
use super::types::TargetDescriptor;
use crate::inference::EmbeddingProvider;
use crate::mcp_client::Tool;
use crate::retrieval::{AgentSelector, HybridToolSearch, IndexCache, IndexError};

/// Declarative description of an agent, as found in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Server whose tools the agent works with. `None` for tool-less agents.
    #[serde(default)]
    pub mcp_server: Option<String>,
    #[serde(default)]
    pub instructions: String,
}

/// A runnable agent: instructions plus the tools it was given for one query.
#[derive(Debug, Clone)]
pub struct AgentInstance {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub tools: Vec<Tool>,
}

/// Builds agent instances from a spec and the tools chosen for it.
pub trait AgentFactory: Send + Sync {
    fn create(&self, spec: &AgentSpec, tools: Vec<Tool>) -> AgentInstance;
}

/// Default factory: a chat agent driven by the spec's instructions, or by a
/// prompt derived from its description when none are given.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatAgentFactory;

impl AgentFactory for ChatAgentFactory {
    fn create(&self, spec: &AgentSpec, tools: Vec<Tool>) -> AgentInstance {
        let instructions = if spec.instructions.trim().is_empty() {
            let mut prompt = format!("You are {}. {}", spec.name, spec.description);
            if !spec.capabilities.is_empty() {
                prompt.push_str(&format!(" Capabilities: {}.", spec.capabilities.join(", ")));
            }
            prompt
        } else {
            spec.instructions.clone()
        };
        AgentInstance {
            name: spec.name.clone(),
            description: spec.description.clone(),
            instructions,
            tools,
        }
    }
}

/// One registry entry.
#[derive(Clone)]
pub struct AgentRegistration {
    pub spec: AgentSpec,
    pub factory: Arc<dyn AgentFactory>,
}

impl AgentRegistration {
    pub fn new(spec: AgentSpec, factory: Arc<dyn AgentFactory>) -> Self {
        Self { spec, factory }
    }
}

/// Registered agents in registration order.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<AgentRegistration>>,
}

impl AgentRegistry {
    /// Registry holding exactly `registrations`.
    pub fn new(registrations: Vec<AgentRegistration>) -> Result<Self, AgentError> {
        let registry = Self::default();
        for registration in registrations {
            registry.register(registration)?;
        }
        Ok(registry)
    }

    pub fn register(&self, registration: AgentRegistration) -> Result<(), AgentError> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        if agents.iter().any(|a| a.spec.name == registration.spec.name) {
            return Err(AgentError::DuplicateAgent {
                name: registration.spec.name,
            });
        }
        tracing::info!(agent = %registration.spec.name, "agent registered");
        agents.push(registration);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<AgentSpec, AgentError> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let position = agents
            .iter()
            .position(|a| a.spec.name == name)
            .ok_or_else(|| AgentError::UnknownAgent {
                name: name.to_string(),
            })?;
        tracing::info!(agent = %name, "agent unregistered");
        Ok(agents.remove(position).spec)
    }

    pub fn get(&self, name: &str) -> Option<AgentRegistration> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|a| a.spec.name == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// `(name, description)` pairs in registration order.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| (a.spec.name.clone(), a.spec.description.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Agents as orchestration targets.
pub struct AgentTargets {
    registry: Arc<AgentRegistry>,
    search: Arc<HybridToolSearch>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<IndexCache>,
    shortlist_k: usize,
    tool_top_k: usize,
    selector: Mutex<Option<Arc<AgentSelector>>>,
}

impl AgentTargets {
    pub fn new(
        registry: Arc<AgentRegistry>,
        search: Arc<HybridToolSearch>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<IndexCache>,
        shortlist_k: usize,
        tool_top_k: usize,
    ) -> Self {
        Self {
            registry,
            search,
            embedder,
            cache,
            shortlist_k,
            tool_top_k,
            selector: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Selector for the current roster, reopened when the roster changed.
    async fn selector(&self, agents: &[(String, String)]) -> Result<Arc<AgentSelector>, IndexError> {
        let mut slot = self.selector.lock().await;
        if let Some(selector) = slot.as_ref() {
            if selector.matches(agents) {
                return Ok(Arc::clone(selector));
            }
        }
        let selector =
            Arc::new(AgentSelector::open(agents, Arc::clone(&self.embedder), &self.cache).await?);
        *slot = Some(Arc::clone(&selector));
        Ok(selector)
    }

    /// Instantiate a registered agent. With `sub_query` its server's tools
    /// are narrowed to `tool_top_k`; without, it gets all of them.
    async fn instantiate(
        &self,
        name: &str,
        sub_query: Option<&str>,
    ) -> Result<Vec<AgentInstance>, IndexError> {
        let Some(registration) = self.registry.get(name) else {
            return Ok(Vec::new());
        };

        let tools = match registration.spec.mcp_server.as_deref() {
            None => Vec::new(),
            Some(server) if !self.search.catalog().contains(server) => {
                tracing::warn!(agent = %name, server, "agent's server is not connected");
                Vec::new()
            }
            Some(server) => match sub_query {
                Some(q) => self.search.search(server, q, self.tool_top_k).await?,
                None => self.search.catalog().tools(server),
            },
        };

        tracing::info!(
            agent = %name,
            tool_count = tools.len(),
            filtered = sub_query.is_some(),
            "agent instantiated"
        );
        Ok(vec![registration.factory.create(&registration.spec, tools)])
    }
}

#[async_trait]
impl TargetCatalog for AgentTargets {
    type Item = AgentInstance;

    async fn candidates(&self, query: &str) -> Result<Vec<TargetDescriptor>, IndexError> {
        let agents = self.registry.descriptions();
        let selector = self.selector(&agents).await?;
        let shortlist = selector.search(query, self.shortlist_k).await?;
        tracing::info!(shortlist = ?shortlist, "agents shortlisted");

        Ok(shortlist
            .into_iter()
            .filter_map(|name| {
                agents
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(n, d)| TargetDescriptor::new(n.clone(), d.clone()))
            })
            .collect())
    }

    fn contains(&self, target: &str) -> bool {
        self.registry.contains(target)
    }

    async fn select(&self, target: &str, sub_query: &str) -> Result<Vec<AgentInstance>, IndexError> {
        self.instantiate(target, Some(sub_query)).await
    }

    async fn all_items(&self, target: &str) -> Result<Vec<AgentInstance>, IndexError> {
        self.instantiate(target, None).await
    }

    fn item_name(item: &AgentInstance) -> &str {
        &item.name
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::ServerCatalog;
    use crate::testing::{static_source, WordEmbedder};

    fn spec(name: &str, description: &str, server: Option<&str>) -> AgentSpec {
        AgentSpec {
            name: name.into(),
            description: description.into(),
            capabilities: vec![],
            mcp_server: server.map(str::to_string),
            instructions: String::new(),
        }
    }

    fn registration(spec: AgentSpec) -> AgentRegistration {
        AgentRegistration::new(spec, Arc::new(ChatAgentFactory))
    }

    async fn fixture(registry: AgentRegistry) -> (AgentTargets, Arc<WordEmbedder>) {
        let catalog = Arc::new(ServerCatalog::new());
        catalog
            .connect_server(
                static_source(
                    "slack",
                    &[
                        ("post_message", "Post a message to a channel"),
                        ("list_channels", "List channels"),
                        ("add_reaction", "React to a message"),
                    ],
                ),
                "Slack",
            )
            .await
            .unwrap();
        let embedder = Arc::new(WordEmbedder::new());
        let cache = Arc::new(IndexCache::in_memory().unwrap());
        let search = Arc::new(HybridToolSearch::new(catalog, embedder.clone(), cache.clone()));
        let targets = AgentTargets::new(Arc::new(registry), search, embedder.clone(), cache, 2, 1);
        (targets, embedder)
    }

    #[test]
    fn test_registry_rejects_duplicates_and_keeps_order() {
        let registry = AgentRegistry::new(vec![
            registration(spec("b", "second", None)),
            registration(spec("a", "first", None)),
        ])
        .unwrap();
        let names: Vec<String> = registry.descriptions().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);

        let err = registry.register(registration(spec("a", "again", None))).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateAgent { .. }));

        assert_eq!(registry.unregister("b").unwrap().name, "b");
        assert!(matches!(
            registry.unregister("b"),
            Err(AgentError::UnknownAgent { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_default_factory_derives_instructions() {
        let mut s = spec("writer", "Drafts prose.", None);
        s.capabilities = vec!["drafting".into()];
        let agent = ChatAgentFactory.create(&s, vec![]);
        assert!(agent.instructions.contains("You are writer"));
        assert!(agent.instructions.contains("drafting"));

        s.instructions = "Write well.".into();
        assert_eq!(ChatAgentFactory.create(&s, vec![]).instructions, "Write well.");
    }

    #[tokio::test]
    async fn test_select_narrows_server_tools() {
        let registry = AgentRegistry::new(vec![
            registration(spec("slack_agent", "Posts Slack messages", Some("slack"))),
            registration(spec("writer", "Drafts prose", None)),
        ])
        .unwrap();
        let (targets, _) = fixture(registry).await;

        let agents = targets.select("slack_agent", "post").await.unwrap();
        assert_eq!(agents.len(), 1);
        let tools: Vec<&str> = agents[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tools, vec!["post_message"]);

        let all = targets.all_items("slack_agent").await.unwrap();
        assert_eq!(all[0].tools.len(), 3);

        let writer = targets.select("writer", "anything").await.unwrap();
        assert!(writer[0].tools.is_empty());
        assert!(targets.select("ghost", "x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_candidates_shortlist_and_follow_registry_changes() {
        let registry = AgentRegistry::new(vec![
            registration(spec("slack_agent", "Posts Slack messages", Some("slack"))),
            registration(spec("github_agent", "Manages GitHub issues", None)),
            registration(spec("writer", "Drafts prose", None)),
        ])
        .unwrap();
        let (targets, embedder) = fixture(registry).await;

        let shortlist = targets.candidates("open GitHub issues").await.unwrap();
        assert_eq!(shortlist.len(), 2);
        assert_eq!(shortlist[0].name, "github_agent");
        // Three agents embedded plus the query.
        assert_eq!(embedder.calls(), 4);

        targets.candidates("Slack").await.unwrap();
        assert_eq!(embedder.calls(), 5, "unchanged roster reuses the selector");

        targets.registry().unregister("writer").unwrap();
        let shortlist = targets.candidates("Slack messages").await.unwrap();
        assert!(shortlist.iter().all(|d| d.name != "writer"));
        assert_eq!(embedder.calls(), 5 + 2 + 1);
    }
}
