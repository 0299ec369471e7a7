//! Reply parsing for the Ollama `/api/chat` API.
//!
//! Ollama answers one JSON object when `stream` is false, and newline-
//! delimited JSON objects of the same shape when streaming; the final object
//! has `done: true` and carries the token counts and nanosecond timings.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    messages::{DurationUsage, TokenUsage, ToolCall},
    provider::{ProviderResponse, synthetic_call_id},
};

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChatResponse {
    #[serde(default)]
    pub message: OllamaResponseMessage,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub eval_count: u64,

    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub load_duration: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_duration: u64,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OllamaResponseMessage {
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub tool_calls: Vec<OllamaResponseToolCall>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OllamaResponseToolCall {
    pub function: OllamaResponseFunction,
}

#[derive(Debug, Deserialize)]
pub(super) struct OllamaResponseFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ChatResponse {
    /// Tool calls with synthetic ids, arguments re-encoded as JSON strings.
    pub fn tool_calls(&self, id_offset: usize) -> Vec<ToolCall> {
        self.message
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| ToolCall {
                id: synthetic_call_id(id_offset + index),
                function_name: call.function.name.clone(),
                arguments: call.function.arguments.to_string(),
            })
            .collect()
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_eval_count, self.eval_count)
    }

    pub fn duration(&self) -> DurationUsage {
        DurationUsage {
            total_duration: self.total_duration,
            load_duration: self.load_duration,
            prompt_eval_duration: self.prompt_eval_duration,
            eval_duration: self.eval_duration,
        }
    }

    pub fn into_provider_response(self) -> ProviderResponse {
        let tool_calls = self.tool_calls(0);
        let usage = self.usage();
        let duration = self.duration();

        ProviderResponse {
            content: (!self.message.content.is_empty()).then_some(self.message.content),
            tool_calls,
            usage: Some(usage),
            duration: Some(duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_answer_with_counts_and_timings() {
        let body = serde_json::json!({
            "model": "qwen3:0.6b",
            "message": { "role": "assistant", "content": "hello" },
            "done": true,
            "prompt_eval_count": 10,
            "eval_count": 4,
            "total_duration": 5_000_000_000u64,
            "load_duration": 1_000_000_000u64,
            "prompt_eval_duration": 500_000_000u64,
            "eval_duration": 3_000_000_000u64
        });

        let response: ChatResponse = serde_json::from_value(body).unwrap();
        let response = response.into_provider_response();

        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.usage.unwrap(), TokenUsage::new(10, 4));
        assert_eq!(response.duration.unwrap().total_duration, 5_000_000_000);
    }

    #[test]
    fn parses_tool_calls_with_object_arguments() {
        let body = serde_json::json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    { "function": { "name": "get_current_time", "arguments": {} } },
                    { "function": { "name": "query_orders", "arguments": { "guest": "li" } } }
                ]
            },
            "done": true
        });

        let response: ChatResponse = serde_json::from_value(body).unwrap();
        let calls = response.tool_calls(0);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[1].function_name, "query_orders");
        assert_eq!(calls[1].arguments, r#"{"guest":"li"}"#);
    }

    #[test]
    fn streaming_delta_chunk_has_no_counts() {
        let body = serde_json::json!({
            "message": { "role": "assistant", "content": "he" },
            "done": false
        });

        let response: ChatResponse = serde_json::from_value(body).unwrap();

        assert!(!response.done);
        assert_eq!(response.message.content, "he");
        assert_eq!(response.usage(), TokenUsage::new(0, 0));
    }
}
