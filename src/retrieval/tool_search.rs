//! Hybrid keyword + vector tool search.
//!
//! Keyword scoring handles the common case where the planner's sub-query
//! names the tool outright; the per-server vector index is only consulted
//! (and only built) when keywords alone cannot fill `top_k`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;

use super::cache::IndexCache;
use super::errors::IndexError;
use super::vector_index::{fingerprint, IndexItem, VectorIndex};
use crate::inference::EmbeddingProvider;
use crate::mcp_client::{ServerCatalog, Tool};

/// Per-server vector index, built lazily on first semantic lookup.
pub struct ToolIndex {
    pub server_name: String,
    pub tools: Vec<Tool>,
    pub vector_index: VectorIndex,
    /// Digest of the `(name, "name: description")` pairs the index was built from.
    pub cache_fingerprint: String,
}

/// One server's index, locked on its own while it is (re)built.
type IndexSlot = Arc<Mutex<Option<Arc<ToolIndex>>>>;

/// Ranks a server's tools against a sub-query.
pub struct HybridToolSearch {
    catalog: Arc<ServerCatalog>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<IndexCache>,
    indexes: std::sync::Mutex<HashMap<String, IndexSlot>>,
}

impl HybridToolSearch {
    pub fn new(
        catalog: Arc<ServerCatalog>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<IndexCache>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            cache,
            indexes: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<ServerCatalog> {
        &self.catalog
    }

    /// At most `top_k` tools of `server_name`, most relevant first.
    ///
    /// Unknown servers and servers with no tools yield an empty list without
    /// touching any index.
    pub async fn search(
        &self,
        server_name: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Tool>, IndexError> {
        let tools = self.catalog.tools(server_name);
        if tools.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let keyword_matches = keyword_rank(&tools, query);
        if keyword_matches.len() >= top_k {
            tracing::debug!(
                server = server_name,
                matches = keyword_matches.len(),
                top_k,
                "keyword matches suffice, vector search skipped"
            );
            return Ok(keyword_matches
                .into_iter()
                .take(top_k)
                .map(|i| tools[i].clone())
                .collect());
        }

        let index = self.tool_index(server_name, &tools).await?;
        let k = (2 * top_k).min(tools.len());
        let semantic = index.vector_index.search(query, k).await?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut results = Vec::with_capacity(top_k);
        for i in keyword_matches {
            seen.insert(tools[i].name.as_str());
            results.push(tools[i].clone());
        }
        for name in &semantic {
            if results.len() >= top_k {
                break;
            }
            if seen.contains(name.as_str()) {
                continue;
            }
            if let Some(tool) = tools.iter().find(|t| &t.name == name) {
                seen.insert(tool.name.as_str());
                results.push(tool.clone());
            }
        }

        tracing::debug!(
            server = server_name,
            selected = ?results.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "hybrid tool search"
        );
        Ok(results)
    }

    /// Current index for a server, rebuilt if its tool list changed.
    async fn tool_index(&self, server_name: &str, tools: &[Tool]) -> Result<Arc<ToolIndex>, IndexError> {
        let items = index_items(tools);
        let current = fingerprint(&items);

        let slot = self.slot(server_name);
        let mut slot = slot.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.cache_fingerprint == current {
                return Ok(Arc::clone(existing));
            }
        }

        let vector_index = VectorIndex::open(
            &collection_name(server_name),
            items,
            Arc::clone(&self.embedder),
            &self.cache,
        )
        .await?;
        let index = Arc::new(ToolIndex {
            server_name: server_name.to_string(),
            tools: tools.to_vec(),
            cache_fingerprint: vector_index.fingerprint().to_string(),
            vector_index,
        });
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Index slot of a server. Slots of servers that left the catalog are
    /// dropped here; their durable cache entries stay.
    fn slot(&self, server_name: &str) -> IndexSlot {
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        indexes.retain(|name, _| name == server_name || self.catalog.contains(name));
        Arc::clone(indexes.entry(server_name.to_string()).or_default())
    }
}

/// Cache collection name for a server's tools.
pub fn collection_name(server_name: &str) -> String {
    format!("tool_{server_name}")
}

fn index_items(tools: &[Tool]) -> Vec<IndexItem> {
    tools
        .iter()
        .map(|t| IndexItem::new(t.name.clone(), t.embedding_text()))
        .collect()
}

/// Indices of tools with a positive keyword score, best first.
///
/// The score is the number of lowercase whitespace-separated query words
/// found as substrings of the tool's lowercased name or description. The
/// sort is stable, so ties keep catalog order.
pub fn keyword_rank(tools: &[Tool], query: &str) -> Vec<usize> {
    let lowered = query.to_lowercase();
    let keywords: Vec<&str> = lowered.split_whitespace().collect();

    let mut scored: Vec<(usize, usize)> = tools
        .iter()
        .enumerate()
        .filter_map(|(i, tool)| {
            let name = tool.name.to_lowercase();
            let description = tool.description.to_lowercase();
            let score = keywords
                .iter()
                .filter(|kw| name.contains(*kw) || description.contains(*kw))
                .count();
            (score > 0).then_some((i, score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(i, _)| i).collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
