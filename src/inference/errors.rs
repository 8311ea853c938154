//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility. These types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors from the chat completion endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// A tool call returned by the model carried invalid JSON arguments.
    #[error("tool call parse error: {reason}")]
    ToolCallParseError {
        raw_response: String,
        reason: String,
    },
}

impl InferenceError {
    /// Variant name, used as the error class when an inference failure
    /// surfaces through an execution capability.
    pub fn class_name(&self) -> &'static str {
        match self {
            InferenceError::ConnectionFailed { .. } => "ConnectionFailed",
            InferenceError::Timeout { .. } => "Timeout",
            InferenceError::HttpError { .. } => "HttpError",
            InferenceError::MalformedResponse { .. } => "MalformedResponse",
            InferenceError::ToolCallParseError { .. } => "ToolCallParseError",
        }
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Errors from the embedding endpoint.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed (HTTP {status}): {body}")]
    HttpError { status: u16, body: String },

    #[error("embedding request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("empty embedding response for {count} inputs")]
    EmptyResponse { count: usize },

    #[error("unexpected embedding format: {reason}")]
    UnexpectedFormat { reason: String },
}
