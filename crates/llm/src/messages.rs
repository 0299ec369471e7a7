//! Canonical conversation types.
//!
//! This is the internal interchange format: every provider adapter maps its
//! native wire shape onto these types, and the tool-calling loop only ever
//! sees them. Messages are immutable once appended to a conversation.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output, either text or a batch of tool-call requests.
    Assistant,
    /// Result of one tool call, referencing the request by id.
    Tool,
}

/// One function-call request emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within a conversation.
    pub id: String,

    /// Name of the tool to invoke.
    pub function_name: String,

    /// JSON-encoded argument object. Adapters parse and re-encode at the
    /// wire boundary as their provider requires.
    pub arguments: String,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author role.
    pub role: Role,

    /// Text content. Absent only on assistant messages that consist solely
    /// of tool-call requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool-call requests; only on assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Id of the originating [`ToolCall`]; only on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// A system-instruction turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A plain-text assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant turn carrying tool-call requests, with optional
    /// accompanying text.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// The result of one tool call.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Check the structural invariants of a conversation:
///
/// - only assistant messages carry `tool_calls`, only tool messages carry
///   `tool_call_id`;
/// - every assistant tool-call batch is followed by exactly one tool message
///   per [`ToolCall`] id, before the next non-tool message;
/// - tool-call ids are unique across the conversation.
pub fn validate_conversation(messages: &[Message]) -> Result<(), String> {
    let mut pending: Vec<&str> = Vec::new();
    let mut seen_ids: Vec<&str> = Vec::new();

    for (index, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant && message.tool_calls.is_some() {
            return Err(format!(
                "message {index}: only assistant messages may carry tool_calls"
            ));
        }

        if message.role != Role::Tool && message.tool_call_id.is_some() {
            return Err(format!(
                "message {index}: only tool messages may carry tool_call_id"
            ));
        }

        if message.role == Role::Tool {
            let Some(id) = message.tool_call_id.as_deref() else {
                return Err(format!("message {index}: tool message without tool_call_id"));
            };

            let Some(position) = pending.iter().position(|pending_id| *pending_id == id) else {
                return Err(format!(
                    "message {index}: tool_call_id '{id}' does not match the preceding assistant batch"
                ));
            };

            pending.remove(position);
            continue;
        }

        if !pending.is_empty() {
            return Err(format!(
                "message {index}: tool results missing for {} call(s) of the preceding batch",
                pending.len()
            ));
        }

        if message.role == Role::Assistant {
            if let Some(calls) = &message.tool_calls {
                if calls.is_empty() {
                    return Err(format!("message {index}: empty tool_calls batch"));
                }

                for call in calls {
                    if seen_ids.contains(&call.id.as_str()) {
                        return Err(format!(
                            "message {index}: duplicate tool call id '{}'",
                            call.id
                        ));
                    }

                    seen_ids.push(&call.id);
                    pending.push(&call.id);
                }
            } else if message.content.is_none() {
                return Err(format!(
                    "message {index}: assistant message with neither content nor tool_calls"
                ));
            }
        } else if message.content.is_none() {
            return Err(format!(
                "message {index}: {:?} message without content",
                message.role
            ));
        }
    }

    if !pending.is_empty() {
        return Err(format!(
            "conversation ends with {} unanswered tool call(s)",
            pending.len()
        ));
    }

    Ok(())
}

/// Token accounting for one turn or a whole conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens generated by the model.
    pub completion_tokens: u64,
    /// `prompt_tokens + completion_tokens` after normalization.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build a usage record with the total derived from its parts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Fold another turn's usage into this accumulator.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }

    /// Re-derive the total from the parts.
    pub fn normalized(mut self) -> Self {
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
        self
    }
}

/// Nanosecond timings of model-processing phases.
///
/// Accumulated as sum of work: values from sequential turns add up,
/// answering how much machine time the conversation consumed rather than how
/// long it took on the wall clock. Providers that do not report a component
/// leave it at 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationUsage {
    /// End-to-end time of the invocation.
    pub total_duration: u64,
    /// Model load time.
    pub load_duration: u64,
    /// Prompt evaluation time.
    pub prompt_eval_duration: u64,
    /// Generation time.
    pub eval_duration: u64,
}

impl DurationUsage {
    /// Fold another turn's timings into this accumulator.
    pub fn add(&mut self, other: &DurationUsage) {
        self.total_duration += other.total_duration;
        self.load_duration += other.load_duration;
        self.prompt_eval_duration += other.prompt_eval_duration;
        self.eval_duration += other.eval_duration;
    }
}
