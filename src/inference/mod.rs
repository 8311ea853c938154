//! Inference: the chat model and the embedding model.
//!
//! Both speak the OpenAI HTTP API, so the backing service is a config change.
//! The rest of the crate only sees the [`ChatCapability`] and
//! [`EmbeddingProvider`] traits.

pub mod client;
pub mod embeddings;
pub mod errors;
pub mod types;

pub use client::{ChatCapability, InferenceClient};
pub use embeddings::{EmbeddingProvider, HttpEmbeddingProvider};
pub use errors::{EmbeddingError, InferenceError};
pub use types::{ChatCompletion, ChatMessage, Role, SamplingOverrides, ToolCall, ToolDefinition};
