//! OpenAI-compatible chat completion client.
//!
//! Used twice per request at most: once by the planner and once (or once per
//! tool round) by the execution agent. Both depend on the [`ChatCapability`]
//! trait rather than on this client directly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{
    ChatCompletion, ChatCompletionRequest, ChatMessage, SamplingOverrides, ToolCall,
    ToolDefinition,
};
use crate::config::EndpointConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ChatCapability ──────────────────────────────────────────────────────────

/// Opaque chat model: messages (and optionally tools) in, one reply out.
#[async_trait]
pub trait ChatCapability: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        sampling: Option<SamplingOverrides>,
    ) -> Result<ChatCompletion, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for one chat completion endpoint.
pub struct InferenceClient {
    http: HttpClient,
    endpoint: EndpointConfig,
}

impl InferenceClient {
    /// Build the client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn new(endpoint: EndpointConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: endpoint.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, endpoint })
    }

    pub fn model_name(&self) -> &str {
        &self.endpoint.model_name
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        sampling: Option<SamplingOverrides>,
    ) -> ChatCompletionRequest {
        let tools = tools.filter(|t| !t.is_empty());
        ChatCompletionRequest {
            model: self.endpoint.model_name.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: sampling
                .and_then(|s| s.temperature)
                .unwrap_or(self.endpoint.temperature),
            top_p: sampling.and_then(|s| s.top_p),
            max_tokens: self.endpoint.max_tokens,
            stream: false,
        }
    }
}

#[async_trait]
impl ChatCapability for InferenceClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        sampling: Option<SamplingOverrides>,
    ) -> Result<ChatCompletion, InferenceError> {
        let url = format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        );
        let body = self.build_request(messages, tools, sampling);

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            "chat completion request"
        );

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = self.endpoint.api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.endpoint.timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_chat_response(&body_text)
    }
}

// ─── Response parsing ────────────────────────────────────────────────────────

/// Parse a non-streaming `/chat/completions` response body.
pub fn parse_chat_response(body: &str) -> Result<ChatCompletion, InferenceError> {
    #[derive(Deserialize)]
    struct Response {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct Message {
        content: Option<String>,
        tool_calls: Option<Vec<RawToolCall>>,
    }

    #[derive(Deserialize)]
    struct RawToolCall {
        id: Option<String>,
        function: RawFunction,
    }

    #[derive(Deserialize)]
    struct RawFunction {
        name: String,
        arguments: String,
    }

    let resp: Response = serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
        reason: format!("failed to parse chat response: {e}"),
    })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let arguments = if tc.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&tc.function.arguments).map_err(|e| {
                InferenceError::ToolCallParseError {
                    raw_response: tc.function.arguments.clone(),
                    reason: format!("invalid JSON: {e}"),
                }
            })?
        };
        tool_calls.push(ToolCall {
            id: tc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            arguments,
        });
    }

    Ok(ChatCompletion {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
