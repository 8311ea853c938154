//! Execution capabilities.
//!
//! - [`ChatExecutor`]: one chat agent with the aggregated tools, looping over
//!   model ↔ tool round trips until the model answers
//! - [`SequentialAgentExecutor`]: runs the selected agents one after another,
//!   each seeing what the previous ones produced
//!
//! Both keep the conversation as `{"messages": [...]}` in the [`Thread`]
//! they hand back. The system prompt is never stored in the thread.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::agents::AgentInstance;
use super::errors::ExecutionError;
use super::types::{AgentContribution, ExecutionOutput, ExecutionResponse, Thread, ToolInvocation};
use crate::inference::{ChatCapability, ChatMessage, ToolCall, ToolDefinition};
use crate::mcp_client::types::CallToolResult;
use crate::mcp_client::{validate_arguments, Tool};

/// Runs a query against a set of tools or agents.
///
/// `thread` is `None` for a fresh conversation. The returned thread replaces
/// the one passed in; the input is never modified.
#[async_trait]
pub trait ExecutionCapability<I>: Send + Sync
where
    I: Send + Sync,
{
    async fn run(
        &self,
        query: &str,
        items: &[I],
        thread: Option<Thread>,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

// ─── ChatExecutor ────────────────────────────────────────────────────────────

/// Result of one agent turn.
struct Turn {
    text: String,
    tool_calls: Vec<ToolInvocation>,
    history: Vec<ChatMessage>,
}

/// Tool-calling chat agent.
pub struct ChatExecutor {
    chat: Arc<dyn ChatCapability>,
    instructions: String,
    max_rounds: u32,
}

impl ChatExecutor {
    pub fn new(chat: Arc<dyn ChatCapability>, instructions: impl Into<String>, max_rounds: u32) -> Self {
        Self {
            chat,
            instructions: instructions.into(),
            max_rounds,
        }
    }

    /// Append `prompt` to `history` and loop until the model answers
    /// without requesting tools.
    async fn converse(
        &self,
        instructions: &str,
        mut history: Vec<ChatMessage>,
        prompt: &str,
        tools: &[Tool],
    ) -> Result<Turn, ExecutionError> {
        history.push(ChatMessage::user(prompt));
        let definitions: Option<Vec<ToolDefinition>> = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(Tool::to_tool_definition).collect())
        };
        let mut invocations = Vec::new();

        for round in 0..self.max_rounds {
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(ChatMessage::system(instructions));
            messages.extend(history.iter().cloned());

            let completion = self.chat.complete(messages, definitions.clone(), None).await?;
            tracing::debug!(
                round,
                tool_calls = completion.tool_calls.len(),
                finish_reason = ?completion.finish_reason,
                "model reply"
            );

            if completion.tool_calls.is_empty() {
                let text = completion.content.unwrap_or_default();
                history.push(ChatMessage::assistant(text.clone()));
                return Ok(Turn {
                    text,
                    tool_calls: invocations,
                    history,
                });
            }

            history.push(ChatMessage::assistant_tool_calls(
                completion.content,
                &completion.tool_calls,
            ));
            for call in &completion.tool_calls {
                let (output, is_error) = dispatch(tools, call).await;
                invocations.push(ToolInvocation {
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    is_error,
                });
                history.push(ChatMessage::tool_result(call.id.clone(), output));
            }
        }

        Err(ExecutionError::new(
            "MaxRoundsExceeded",
            format!("no final answer after {} tool rounds", self.max_rounds),
        ))
    }
}

#[async_trait]
impl ExecutionCapability<Tool> for ChatExecutor {
    async fn run(
        &self,
        query: &str,
        tools: &[Tool],
        thread: Option<Thread>,
    ) -> Result<ExecutionOutput, ExecutionError> {
        tracing::info!(tool_count = tools.len(), "executing with chat agent");
        let history = thread_messages(thread)?;
        let turn = self.converse(&self.instructions, history, query, tools).await?;

        Ok(ExecutionOutput {
            thread: messages_thread(&turn.history)?,
            response: ExecutionResponse::Message {
                text: turn.text,
                tool_calls: turn.tool_calls,
            },
        })
    }
}

/// Call the tool a model asked for. Failures become the tool result text so
/// the model can react to them.
async fn dispatch(tools: &[Tool], call: &ToolCall) -> (String, bool) {
    let Some(tool) = tools
        .iter()
        .find(|t| t.function_name() == call.name)
        .or_else(|| tools.iter().find(|t| t.name == call.name))
    else {
        tracing::warn!(tool = %call.name, "model called a tool it was not given");
        return (format!("error: unknown tool '{}'", call.name), true);
    };

    if let Err(e) = validate_arguments(tool, &call.arguments) {
        return (format!("error: {e}"), true);
    }

    match tool.invoke(call.arguments.clone()).await {
        Ok(value) => {
            tracing::info!(server = %tool.server, tool = %tool.name, "tool call succeeded");
            (render_tool_output(&value), false)
        }
        Err(e) => {
            tracing::warn!(server = %tool.server, tool = %tool.name, error = %e, "tool call failed");
            (format!("error: {e}"), true)
        }
    }
}

/// Text handed back to the model for a tool result.
fn render_tool_output(value: &serde_json::Value) -> String {
    if let Some(text) = value.as_str() {
        return text.to_string();
    }
    if value.get("content").is_some() {
        if let Ok(result) = serde_json::from_value::<CallToolResult>(value.clone()) {
            let text = result.text();
            if !text.is_empty() {
                return text;
            }
        }
    }
    value.to_string()
}

fn thread_messages(thread: Option<Thread>) -> Result<Vec<ChatMessage>, ExecutionError> {
    let Some(thread) = thread else {
        return Ok(Vec::new());
    };
    let messages = thread
        .into_value()
        .get_mut("messages")
        .map(serde_json::Value::take)
        .unwrap_or_default();
    if messages.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(messages)
        .map_err(|e| ExecutionError::new("InvalidThread", format!("thread is not a message list: {e}")))
}

fn messages_thread(messages: &[ChatMessage]) -> Result<Thread, ExecutionError> {
    let messages = serde_json::to_value(messages)
        .map_err(|e| ExecutionError::new("InvalidThread", e.to_string()))?;
    Ok(Thread::new(json!({ "messages": messages })))
}

// ─── SequentialAgentExecutor ─────────────────────────────────────────────────

/// Runs each selected agent in turn with its own instructions and tools.
///
/// Later agents get the earlier agents' answers appended to the query. The
/// last agent's answer is the final text. The thread keeps only the user
/// query and the final answer of each run.
pub struct SequentialAgentExecutor {
    runner: ChatExecutor,
}

impl SequentialAgentExecutor {
    pub fn new(chat: Arc<dyn ChatCapability>, max_rounds: u32) -> Self {
        Self {
            runner: ChatExecutor::new(chat, String::new(), max_rounds),
        }
    }
}

#[async_trait]
impl ExecutionCapability<AgentInstance> for SequentialAgentExecutor {
    async fn run(
        &self,
        query: &str,
        agents: &[AgentInstance],
        thread: Option<Thread>,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let history = thread_messages(thread)?;
        let mut contributions: Vec<AgentContribution> = Vec::with_capacity(agents.len());

        for agent in agents {
            let prompt = handoff_prompt(query, &contributions);
            tracing::info!(
                agent = %agent.name,
                tool_count = agent.tools.len(),
                "agent turn"
            );
            let turn = self
                .runner
                .converse(&agent.instructions, history.clone(), &prompt, &agent.tools)
                .await
                .map_err(|e| ExecutionError::new(e.class, format!("agent '{}': {}", agent.name, e.message)))?;
            contributions.push(AgentContribution {
                agent: agent.name.clone(),
                text: turn.text,
                tool_calls: turn.tool_calls,
            });
        }

        let text = contributions.last().map(|c| c.text.clone()).unwrap_or_default();
        let mut history = history;
        history.push(ChatMessage::user(query));
        history.push(ChatMessage::assistant(text.clone()));

        Ok(ExecutionOutput {
            thread: messages_thread(&history)?,
            response: ExecutionResponse::Collaboration {
                text,
                contributions,
            },
        })
    }
}

fn handoff_prompt(query: &str, contributions: &[AgentContribution]) -> String {
    if contributions.is_empty() {
        return query.to_string();
    }
    let mut prompt = format!(
        "{query}\n\nOther agents already worked on this request. Use their results \
         instead of fetching the same data again:\n"
    );
    for c in contributions {
        prompt.push_str(&format!("\n[{}]\n{}\n", c.agent, c.text));
    }
    prompt
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ChatCompletion, Role};
    use crate::testing::{tools, ScriptedChat};

    fn tool_call(name: &str, arguments: serde_json::Value) -> ChatCompletion {
        ChatCompletion {
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("call_{name}"),
                name: name.to_string(),
                arguments,
            }],
            finish_reason: Some("tool_calls".into()),
        }
    }

    fn answer(text: &str) -> ChatCompletion {
        ChatCompletion {
            content: Some(text.to_string()),
            tool_calls: vec![],
            finish_reason: Some("stop".into()),
        }
    }

    #[tokio::test]
    async fn test_tool_loop_dispatches_and_answers() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push(tool_call("mail__send_email", json!({"to": "ops"})));
        chat.push(answer("sent"));
        let executor = ChatExecutor::new(chat.clone(), "be brief", 4);
        let mail = tools("mail", &[("send_email", "Send an email")]);

        let out = executor.run("email ops", &mail, None).await.unwrap();

        match &out.response {
            ExecutionResponse::Message { text, tool_calls } => {
                assert_eq!(text, "sent");
                assert_eq!(tool_calls.len(), 1);
                assert!(!tool_calls[0].is_error);
            }
            other => panic!("unexpected response {other:?}"),
        }

        // Second request carries the tool result back to the model.
        let second = &chat.requests()[1];
        assert_eq!(second[0].role, Role::System);
        let result = second.last().unwrap();
        assert_eq!(result.role, Role::Tool);
        assert!(result.content.as_deref().unwrap().contains("send_email"));

        let tools_seen = chat.tools_seen();
        assert_eq!(tools_seen[0].as_ref().unwrap()[0].function.name, "mail__send_email");
    }

    #[tokio::test]
    async fn test_thread_continues_and_excludes_system_prompt() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push(answer("first"));
        chat.push(answer("second"));
        let executor = ChatExecutor::new(chat.clone(), "sys", 4);

        let first = executor.run("one", &[], None).await.unwrap();
        let messages = first.thread.as_value()["messages"].as_array().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");

        let before = first.thread.clone();
        let second = executor.run("two", &[], Some(first.thread)).await.unwrap();
        assert_eq!(second.thread.as_value()["messages"].as_array().unwrap().len(), 4);
        assert_eq!(before.as_value()["messages"].as_array().unwrap().len(), 2);

        // System + two prior turns + new user message.
        assert_eq!(chat.requests()[1].len(), 4);
        assert!(chat.tools_seen()[1].is_none());
    }

    #[tokio::test]
    async fn test_tool_errors_are_reported_to_model() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push(tool_call("mail__nope", json!({})));
        chat.push(answer("could not"));
        let executor = ChatExecutor::new(chat.clone(), "sys", 4);

        let out = executor
            .run("q", &tools("mail", &[("send_email", "Send")]), None)
            .await
            .unwrap();
        let ExecutionResponse::Message { tool_calls, .. } = out.response else {
            panic!("expected message");
        };
        assert!(tool_calls[0].is_error);
        let last = chat.requests()[1].last().cloned().unwrap();
        assert!(last.content.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_max_rounds_exceeded() {
        let chat = Arc::new(ScriptedChat::new());
        for _ in 0..2 {
            chat.push(tool_call("mail__send_email", json!({})));
        }
        let executor = ChatExecutor::new(chat, "sys", 2);
        let err = executor
            .run("q", &tools("mail", &[("send_email", "Send")]), None)
            .await
            .unwrap_err();
        assert_eq!(err.class, "MaxRoundsExceeded");
    }

    #[tokio::test]
    async fn test_inference_failure_keeps_class_name() {
        let executor = ChatExecutor::new(Arc::new(ScriptedChat::new()), "sys", 2);
        let err = executor.run("q", &[], None).await.unwrap_err();
        assert_eq!(err.class, "MalformedResponse");
    }

    #[tokio::test]
    async fn test_invalid_thread_rejected() {
        let executor = ChatExecutor::new(Arc::new(ScriptedChat::new()), "sys", 2);
        let err = executor
            .run("q", &[], Some(Thread::new(json!({"messages": 3}))))
            .await
            .unwrap_err();
        assert_eq!(err.class, "InvalidThread");
    }

    #[tokio::test]
    async fn test_agents_run_in_order_and_hand_off() {
        let chat = Arc::new(ScriptedChat::new());
        chat.push(answer("contacts: ann, bob"));
        chat.push(answer("posted"));
        let executor = SequentialAgentExecutor::new(chat.clone(), 4);
        let agents = vec![
            AgentInstance {
                name: "crm".into(),
                description: "CRM".into(),
                instructions: "fetch contacts".into(),
                tools: vec![],
            },
            AgentInstance {
                name: "chat".into(),
                description: "Chat".into(),
                instructions: "post messages".into(),
                tools: vec![],
            },
        ];

        let out = executor.run("share contacts", &agents, None).await.unwrap();
        let ExecutionResponse::Collaboration { text, contributions } = &out.response else {
            panic!("expected collaboration");
        };
        assert_eq!(text, "posted");
        assert_eq!(contributions.len(), 2);
        assert_eq!(contributions[0].agent, "crm");

        let requests = chat.requests();
        assert_eq!(requests[0][0].content.as_deref(), Some("fetch contacts"));
        let handoff = requests[1][1].content.clone().unwrap();
        assert!(handoff.contains("[crm]"));
        assert!(handoff.contains("contacts: ann, bob"));

        assert_eq!(out.thread.as_value()["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_render_tool_output() {
        assert_eq!(render_tool_output(&json!("plain")), "plain");
        let mcp = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(render_tool_output(&mcp), "hello");
        assert_eq!(render_tool_output(&json!({"n": 1})), r#"{"n":1}"#);
    }
}
