//! Reply parsing for OpenAI-compatible `chat/completions` endpoints.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    messages::{TokenUsage, ToolCall},
    provider::{ProviderResponse, synthetic_call_id},
};

#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,

    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResponseToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResponseFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(super) struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl OpenAiUsage {
    pub fn to_usage(self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}

impl ChatCompletionResponse {
    pub fn into_provider_response(mut self) -> ProviderResponse {
        let usage = self.usage.map(OpenAiUsage::to_usage);

        let Some(choice) = self.choices.drain(..).next() else {
            return ProviderResponse {
                usage,
                ..Default::default()
            };
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, call)| ToolCall {
                id: call.id.unwrap_or_else(|| synthetic_call_id(index)),
                function_name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        ProviderResponse {
            content: choice.message.content.filter(|content| !content.is_empty()),
            tool_calls,
            usage,
            // OpenAI-compatible endpoints report no phase timings.
            duration: None,
        }
    }
}

/// One SSE chunk of a streaming completion.
#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,

    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StreamingToolCall {
    #[serde(default)]
    pub index: usize,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub function: Option<StreamingFunction>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StreamingFunction {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: Option<String>,
}

impl ChatCompletionChunk {
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }

    pub fn has_tool_call_delta(&self) -> bool {
        self.choices
            .first()
            .and_then(|choice| choice.delta.tool_calls.as_ref())
            .is_some_and(|calls| !calls.is_empty())
    }
}

/// Assembles complete tool calls from streamed fragments: the first fragment
/// of a call carries its id and name, later fragments append argument text.
#[derive(Debug, Default)]
pub(super) struct ToolCallAssembler {
    building: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn absorb(&mut self, chunk: &ChatCompletionChunk) {
        let Some(calls) = chunk
            .choices
            .first()
            .and_then(|choice| choice.delta.tool_calls.as_ref())
        else {
            return;
        };

        for fragment in calls {
            let partial = self.building.entry(fragment.index).or_default();

            if let Some(id) = &fragment.id {
                partial.id = Some(id.clone());
            }

            if let Some(function) = &fragment.function {
                if let Some(name) = &function.name {
                    partial.name.push_str(name);
                }

                if let Some(arguments) = &function.arguments {
                    partial.arguments.push_str(arguments);
                }
            }
        }
    }

    pub fn finish(self) -> Vec<ToolCall> {
        self.building
            .into_values()
            .enumerate()
            .map(|(index, partial)| ToolCall {
                id: partial.id.unwrap_or_else(|| synthetic_call_id(index)),
                function_name: partial.name,
                arguments: if partial.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    partial.arguments
                },
            })
            .collect()
    }
}
