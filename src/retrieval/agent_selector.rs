//! Vector shortlist of agents for the planner.
//!
//! Pure nearest-neighbour search over `"name: description"` texts. No
//! keyword layer: agent descriptions are prose, not identifiers.

use std::sync::Arc;

use super::cache::IndexCache;
use super::errors::IndexError;
use super::vector_index::{IndexItem, VectorIndex};
use crate::inference::EmbeddingProvider;

/// Cache collection shared by every agent selector.
pub const AGENT_COLLECTION: &str = "agent_index";

pub struct AgentSelector {
    index: VectorIndex,
}

impl AgentSelector {
    /// Load or rebuild the agent index for `(name, description)` pairs in
    /// registration order.
    pub async fn open(
        agents: &[(String, String)],
        embedder: Arc<dyn EmbeddingProvider>,
        cache: &IndexCache,
    ) -> Result<Self, IndexError> {
        let index = VectorIndex::open(AGENT_COLLECTION, agent_items(agents), embedder, cache).await?;
        Ok(Self { index })
    }

    /// Names of the `top_k` agents nearest to `query`.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>, IndexError> {
        self.index.search(query, top_k).await
    }

    /// Whether this selector was built from exactly these agents.
    pub fn matches(&self, agents: &[(String, String)]) -> bool {
        self.index.items() == agent_items(agents).as_slice()
    }
}

fn agent_items(agents: &[(String, String)]) -> Vec<IndexItem> {
    agents
        .iter()
        .map(|(name, description)| IndexItem::new(name.clone(), format!("{name}: {description}")))
        .collect()
}
