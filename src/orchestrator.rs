//! Turns one customer message plus bounded history into an assistant reply.
//!
//! A round is at most two model calls: the first declares the registered
//! tools with automatic selection; if the model asks for tools they run
//! concurrently and a follow-up call (without tools) produces the answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::{future::join_all, StreamExt};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{ModelError, ToolError};
use crate::llm::{ChatChunk, ChatModel, ChatRequest, WireMessage, WireToolCall};
use crate::tools::{to_openai_tool, ToolContext, ToolRegistry};
use crate::types::{now_millis, Message, Role, ToolCall, HISTORY_LIMIT};

/// Reply when the first completion carries no message at all.
pub const DEGRADED_REPLY: &str = "I apologize, but I encountered an issue processing your request.";
/// Reply when the completion message has no text and no tool calls.
pub const EMPTY_REPLY: &str = "I apologize, but I encountered an issue.";
/// Reply when the follow-up completion after tool execution has no text.
pub const TOOL_FALLBACK_REPLY: &str = "Tool results processed successfully.";

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub user_message: Message,
    pub assistant_message: Message,
}

struct Reply {
    content: String,
    tool_calls: Option<Vec<ToolCall>>,
}

impl Reply {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: None,
        }
    }
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    tool_context: ToolContext,
    model_name: String,
    system_prompt: String,
}

impl ChatOrchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        tool_context: ToolContext,
        model_name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model,
            tools,
            tool_context,
            model_name: model_name.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Run one chat round. With `on_chunk` the first completion is streamed
    /// and every text fragment is forwarded as it arrives. Nothing is
    /// persisted here.
    pub async fn process_message(
        &self,
        user_text: &str,
        history: &[Message],
        on_chunk: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<ChatOutcome, ModelError> {
        let user_message = Message::user(user_text);
        let conversation = self.build_conversation(user_text, history);
        let request = ChatRequest {
            model: self.model_name.clone(),
            messages: conversation,
            tools: self
                .tools
                .definitions()
                .iter()
                .map(to_openai_tool)
                .collect(),
            tool_choice: Some("auto"),
            stream: on_chunk.is_some(),
        };

        let reply = match on_chunk {
            Some(sink) => self.run_streaming(request, sink).await?,
            None => self.run_batch(request).await?,
        };

        let mut assistant_message = Message::new(Role::Assistant, reply.content.clone());
        assistant_message.timestamp = assistant_message.timestamp.max(user_message.timestamp);
        assistant_message.tool_calls = reply.tool_calls.clone();

        Ok(ChatOutcome {
            content: reply.content,
            tool_calls: reply.tool_calls,
            user_message,
            assistant_message,
        })
    }

    /// System prompt, then the user/assistant part of the history window,
    /// then the new message.
    fn build_conversation(&self, user_text: &str, history: &[Message]) -> Vec<WireMessage> {
        let start = history.len().saturating_sub(HISTORY_LIMIT);
        let mut messages = Vec::with_capacity(history.len() - start + 2);
        messages.push(WireMessage::text("system", self.system_prompt.clone()));
        messages.extend(
            history[start..]
                .iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .filter_map(|m| {
                    m.content
                        .as_ref()
                        .map(|content| WireMessage::text(m.role.as_str(), content.clone()))
                }),
        );
        messages.push(WireMessage::text("user", user_text));
        messages
    }

    async fn run_batch(&self, request: ChatRequest) -> Result<Reply, ModelError> {
        let completion = self.model.complete(&request).await?;
        let Some(message) = completion.message() else {
            warn!(model = %self.model_name, "completion carried no message");
            return Ok(Reply::text(DEGRADED_REPLY));
        };

        match message.tool_calls.clone().filter(|calls| !calls.is_empty()) {
            Some(calls) => self.answer_with_tools(request.messages, calls).await,
            None => Ok(Reply::text(
                message
                    .content
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| EMPTY_REPLY.to_string()),
            )),
        }
    }

    async fn run_streaming(
        &self,
        request: ChatRequest,
        sink: &mut (dyn FnMut(&str) + Send),
    ) -> Result<Reply, ModelError> {
        let mut stream = self.model.complete_stream(&request).await?;
        let mut accumulator = StreamAccumulator::default();
        while let Some(chunk) = stream.next().await {
            if let Some(fragment) = accumulator.apply(&chunk?) {
                sink(&fragment);
            }
        }

        let (streamed, calls) = accumulator.finish();
        let Some(calls) = calls else {
            return Ok(Reply::text(streamed));
        };

        let mut reply = self.answer_with_tools(request.messages, calls).await?;
        // The client keeps whatever was streamed, so the stored answer is
        // the streamed preamble plus the rest, unless the answer repeats it.
        match reply.content.strip_prefix(streamed.as_str()).map(str::to_string) {
            Some(rest) => {
                if !rest.is_empty() {
                    sink(&rest);
                }
            }
            None => {
                sink(&reply.content);
                reply.content = format!("{streamed}{}", reply.content);
            }
        }
        Ok(reply)
    }

    async fn answer_with_tools(
        &self,
        mut messages: Vec<WireMessage>,
        calls: Vec<WireToolCall>,
    ) -> Result<Reply, ModelError> {
        debug!(count = calls.len(), "model requested tool calls");
        let executed = execute_tool_calls(&self.tools, &self.tool_context, &calls).await;

        messages.push(WireMessage::assistant_tool_calls(calls));
        messages.extend(
            executed
                .iter()
                .map(|call| WireMessage::tool_result(&call.id, call.result.to_string())),
        );

        let followup = ChatRequest {
            model: self.model_name.clone(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
        };
        let completion = self.model.complete(&followup).await?;
        let content = completion
            .message()
            .and_then(|m| m.content.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| {
                warn!(
                    model = %self.model_name,
                    "follow-up completion after tool calls had no content, using fallback"
                );
                TOOL_FALLBACK_REPLY.to_string()
            });

        Ok(Reply {
            content,
            tool_calls: Some(executed),
        })
    }
}

/// Run all requested tool calls concurrently. Results come back in request
/// order; a failing call yields an error payload instead of failing the set.
pub async fn execute_tool_calls(
    registry: &ToolRegistry,
    ctx: &ToolContext,
    calls: &[WireToolCall],
) -> Vec<ToolCall> {
    join_all(calls.iter().map(|call| execute_tool_call(registry, ctx, call))).await
}

async fn execute_tool_call(registry: &ToolRegistry, ctx: &ToolContext, call: &WireToolCall) -> ToolCall {
    let name = call.function.name.as_str();
    let outcome = async {
        let arguments = parse_arguments(&call.function.arguments)?;
        let result = registry.execute(name, &arguments, ctx).await?;
        Ok::<_, ToolError>((arguments, result))
    }
    .await;

    match outcome {
        Ok((arguments, result)) => ToolCall {
            id: call.id.clone(),
            name: name.to_string(),
            arguments,
            result,
        },
        Err(err) => {
            warn!(tool = name, call_id = %call.id, error = %err, "tool call failed");
            ToolCall {
                id: call.id.clone(),
                name: name.to_string(),
                arguments: Map::new(),
                result: json!({ "error": format!("Failed to execute {name}: {err}") }),
            }
        }
    }
}

/// Empty argument text means no arguments; anything else must be a JSON object.
fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(err) => Err(ToolError::InvalidArguments(err.to_string())),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum StreamPhase {
    #[default]
    CollectingText,
    CollectingToolCalls,
}

/// Folds streamed chunks into the answer text and the tool calls, keyed by
/// the delta index.
#[derive(Debug, Default)]
struct StreamAccumulator {
    phase: StreamPhase,
    text: String,
    tool_calls: BTreeMap<usize, WireToolCall>,
}

impl StreamAccumulator {
    /// Returns the text fragment to forward, if the chunk carried one.
    fn apply(&mut self, chunk: &ChatChunk) -> Option<String> {
        let delta = chunk.delta()?;

        for (position, fragment) in delta.tool_calls.iter().flatten().enumerate() {
            self.phase = StreamPhase::CollectingToolCalls;
            let index = fragment.index.unwrap_or(position);
            let name = fragment.function.as_ref().and_then(|f| f.name.as_deref());
            let arguments = fragment.function.as_ref().and_then(|f| f.arguments.as_deref());

            match self.tool_calls.get_mut(&index) {
                None => {
                    let id = fragment
                        .id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("tool_{}_{}", now_millis(), index));
                    self.tool_calls.insert(
                        index,
                        WireToolCall::function(id, name.unwrap_or(""), arguments.unwrap_or("")),
                    );
                }
                Some(call) => {
                    if let Some(name) = name.filter(|n| !n.is_empty()) {
                        call.function.name = name.to_string();
                    }
                    if let Some(arguments) = arguments {
                        call.function.arguments.push_str(arguments);
                    }
                }
            }
        }

        let text = delta.content.as_deref().filter(|t| !t.is_empty())?;
        self.text.push_str(text);
        Some(text.to_string())
    }

    fn finish(self) -> (String, Option<Vec<WireToolCall>>) {
        match self.phase {
            StreamPhase::CollectingText => (self.text, None),
            StreamPhase::CollectingToolCalls => {
                (self.text, Some(self.tool_calls.into_values().collect()))
            }
        }
    }
}
