//! Retrieval: narrowing tool catalogs and agent rosters to a relevant few.
//!
//! - [`VectorIndex`]: flat L2 nearest-neighbour index, cached per collection
//! - [`HybridToolSearch`]: keyword scoring with a lazy per-server vector fallback
//! - [`AgentSelector`]: vector shortlist of agents

pub mod agent_selector;
pub mod cache;
pub mod errors;
pub mod tool_search;
pub mod vector_index;

pub use agent_selector::AgentSelector;
pub use cache::IndexCache;
pub use errors::IndexError;
pub use tool_search::{HybridToolSearch, ToolIndex};
pub use vector_index::{IndexItem, VectorIndex};
