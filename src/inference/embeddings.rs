//! Text embedding provider.
//!
//! The retrieval layer only depends on [`EmbeddingProvider`]: one text in,
//! one fixed-length vector out. [`HttpEmbeddingProvider`] implements it
//! against an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use super::errors::EmbeddingError;
use crate::config::EndpointConfig;

/// Maps a text to a fixed-length vector. Implementations must return the
/// same dimension for every call.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawEmbeddingItem {
    index: usize,
    embedding: serde_json::Value, // number[] or number[][] (per-token)
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<RawEmbeddingItem>,
}

// ─── HttpEmbeddingProvider ──────────────────────────────────────────────────

/// Embedding provider for `POST {base_url}/embeddings`.
pub struct HttpEmbeddingProvider {
    http: HttpClient,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, EmbeddingError> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            url: format!("{}/embeddings", endpoint.base_url.trim_end_matches('/')),
            model: endpoint.model_name.clone(),
            api_key: endpoint.api_key().map(str::to_string),
        })
    }

    /// Embed a batch of texts in one request, preserving input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestFailed {
                reason: format!("embedding request to {}: {e}", self.url),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(EmbeddingError::HttpError {
                status,
                body: body_text,
            });
        }

        let result: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::RequestFailed {
                    reason: format!("failed to parse embedding response: {e}"),
                })?;

        if result.data.len() != texts.len() {
            return Err(EmbeddingError::EmptyResponse {
                count: texts.len(),
            });
        }

        let mut items = result.data;
        items.sort_by_key(|item| item.index);

        items
            .into_iter()
            .map(|item| mean_pool_embedding(&item.embedding))
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::EmptyResponse { count: 1 })
    }
}

/// Mean-pool per-token embeddings into a single vector.
///
/// 1D input (already pooled) is returned as-is; 2D input is averaged across
/// the token dimension.
pub(crate) fn mean_pool_embedding(
    embedding: &serde_json::Value,
) -> Result<Vec<f32>, EmbeddingError> {
    let serde_json::Value::Array(arr) = embedding else {
        return Err(EmbeddingError::UnexpectedFormat {
            reason: "expected number[] or number[][]".to_string(),
        });
    };

    match arr.first() {
        None => Err(EmbeddingError::UnexpectedFormat {
            reason: "empty embedding".to_string(),
        }),

        Some(first) if first.is_number() => arr
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| EmbeddingError::UnexpectedFormat {
                    reason: format!("non-numeric component: {v}"),
                })
            })
            .collect(),

        Some(first) if first.is_array() => {
            let tokens: Vec<Vec<f32>> = arr
                .iter()
                .filter_map(|row| {
                    row.as_array().map(|r| {
                        r.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
                    })
                })
                .collect();

            let n_tokens = tokens.len();
            let n_dim = tokens[0].len();
            if tokens.iter().any(|t| t.len() != n_dim) {
                return Err(EmbeddingError::UnexpectedFormat {
                    reason: "ragged per-token embedding".to_string(),
                });
            }

            let mut result = vec![0.0_f32; n_dim];
            for token in &tokens {
                for (d, val) in token.iter().enumerate() {
                    result[d] += val;
                }
            }
            for val in &mut result {
                *val /= n_tokens as f32;
            }
            Ok(result)
        }

        Some(_) => Err(EmbeddingError::UnexpectedFormat {
            reason: "expected number[] or number[][]".to_string(),
        }),
    }
}
