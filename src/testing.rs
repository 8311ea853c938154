//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::agent_core::agents::AgentInstance;
use crate::agent_core::errors::ExecutionError;
use crate::agent_core::execution::ExecutionCapability;
use crate::agent_core::types::{ExecutionOutput, ExecutionResponse, Thread};
use crate::inference::{
    ChatCapability, ChatCompletion, ChatMessage, EmbeddingError, EmbeddingProvider,
    InferenceError, SamplingOverrides, ToolDefinition,
};
use crate::mcp_client::{McpError, McpToolDefinition, StaticToolSource, Tool, ToolInvoker, ToolSource};

// ─── Embeddings ──────────────────────────────────────────────────────────────

const WORD_DIMENSIONS: usize = 512;

/// Deterministic bag-of-words embedder that counts its calls.
///
/// Each lowercase alphanumeric word is hashed into one of 512 buckets and
/// the vector is L2-normalised, so texts sharing words are near each other.
#[derive(Default)]
pub struct WordEmbedder {
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl WordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fails for any text containing `needle`.
    pub fn failing_on(needle: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(needle.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for WordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(EmbeddingError::RequestFailed {
                    reason: format!("refusing to embed '{text}'"),
                });
            }
        }

        let mut vector = vec![0.0f32; WORD_DIMENSIONS];
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            vector[bucket(word)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// FNV-1a bucket of a word.
fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % WORD_DIMENSIONS as u64) as usize
}

// ─── Tool sources ────────────────────────────────────────────────────────────

/// Answers every call with `{"tool": name, "arguments": args}`.
pub struct EchoInvoker;

#[async_trait]
impl ToolInvoker for EchoInvoker {
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        Ok(json!({ "tool": name, "arguments": arguments }))
    }
}

pub fn tool_def(name: &str, description: &str) -> McpToolDefinition {
    McpToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({ "type": "object", "properties": {} }),
    }
}

fn tool_defs(tools: &[(&str, &str)]) -> Vec<McpToolDefinition> {
    tools.iter().map(|(n, d)| tool_def(n, d)).collect()
}

/// Static source of echo tools.
pub fn static_source(name: &str, tools: &[(&str, &str)]) -> Arc<dyn ToolSource> {
    Arc::new(StaticToolSource::new(name, tool_defs(tools), Arc::new(EchoInvoker)))
}

/// Echo tools owned by `server`.
pub fn tools(server: &str, tools: &[(&str, &str)]) -> Vec<Tool> {
    tool_defs(tools)
        .into_iter()
        .map(|def| Tool::new(server, def, Arc::new(EchoInvoker)))
        .collect()
}

/// Source that records whether it is connected.
pub struct TrackingSource {
    name: String,
    definitions: Vec<McpToolDefinition>,
    connected: AtomicBool,
}

impl TrackingSource {
    pub fn new(name: &str, definitions: Vec<McpToolDefinition>) -> Self {
        Self {
            name: name.to_string(),
            definitions,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolSource for TrackingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), McpError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_functions(&self) -> Result<Vec<Tool>, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected {
                name: self.name.clone(),
            });
        }
        Ok(self
            .definitions
            .iter()
            .cloned()
            .map(|def| Tool::new(self.name.clone(), def, Arc::new(EchoInvoker)))
            .collect())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Chat ────────────────────────────────────────────────────────────────────

/// Chat capability that replays queued completions and records requests.
/// An empty queue answers with `MalformedResponse`.
#[derive(Default)]
pub struct ScriptedChat {
    script: Mutex<VecDeque<ChatCompletion>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, Option<Vec<ToolDefinition>>)>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(texts: &[&str]) -> Self {
        let chat = Self::new();
        for text in texts {
            chat.push_text(text);
        }
        chat
    }

    pub fn push(&self, completion: ChatCompletion) {
        self.script.lock().unwrap().push_back(completion);
    }

    pub fn push_text(&self, text: &str) {
        self.push(ChatCompletion {
            content: Some(text.to_string()),
            tool_calls: vec![],
            finish_reason: Some("stop".into()),
        });
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Messages of every request so far.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    /// Tool lists of every request so far.
    pub fn tools_seen(&self) -> Vec<Option<Vec<ToolDefinition>>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl ChatCapability for ScriptedChat {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        _sampling: Option<SamplingOverrides>,
    ) -> Result<ChatCompletion, InferenceError> {
        self.requests.lock().unwrap().push((messages, tools));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| InferenceError::MalformedResponse {
                reason: "script exhausted".into(),
            })
    }
}

// ─── Execution ───────────────────────────────────────────────────────────────

/// One recorded execution call.
#[derive(Debug, Clone)]
pub struct Run {
    pub query: String,
    /// Tool or agent names, in the order they were passed.
    pub items: Vec<String>,
    /// Per agent, the names of its tools. Empty for tool runs.
    pub agent_tools: Vec<Vec<String>>,
    pub thread: Option<Thread>,
}

/// Execution capability that records its inputs. Run `n` (1-based) answers
/// `"answer n"` with thread `{"turn": n}`.
#[derive(Default)]
pub struct RecordingExecutor {
    runs: Mutex<Vec<Run>>,
    failure: Mutex<Option<ExecutionError>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, class: &str, message: &str) {
        *self.failure.lock().unwrap() = Some(ExecutionError::new(class, message));
    }

    pub fn runs(&self) -> Vec<Run> {
        self.runs.lock().unwrap().clone()
    }

    fn record(&self, run: Run) -> Result<ExecutionOutput, ExecutionError> {
        let turn = {
            let mut runs = self.runs.lock().unwrap();
            runs.push(run);
            runs.len()
        };
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(ExecutionOutput {
            response: ExecutionResponse::Message {
                text: format!("answer {turn}"),
                tool_calls: vec![],
            },
            thread: Thread::new(json!({ "turn": turn })),
        })
    }
}

#[async_trait]
impl ExecutionCapability<Tool> for RecordingExecutor {
    async fn run(
        &self,
        query: &str,
        tools: &[Tool],
        thread: Option<Thread>,
    ) -> Result<ExecutionOutput, ExecutionError> {
        self.record(Run {
            query: query.to_string(),
            items: tools.iter().map(|t| t.name.clone()).collect(),
            agent_tools: vec![],
            thread,
        })
    }
}

#[async_trait]
impl ExecutionCapability<AgentInstance> for RecordingExecutor {
    async fn run(
        &self,
        query: &str,
        agents: &[AgentInstance],
        thread: Option<Thread>,
    ) -> Result<ExecutionOutput, ExecutionError> {
        self.record(Run {
            query: query.to_string(),
            items: agents.iter().map(|a| a.name.clone()).collect(),
            agent_tools: agents
                .iter()
                .map(|a| a.tools.iter().map(|t| t.name.clone()).collect())
                .collect(),
            thread,
        })
    }
}
