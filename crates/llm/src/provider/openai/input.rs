//! Request conversion for OpenAI-compatible `chat/completions` endpoints.

use config::GenerationConfig;
use mcp::ToolSchema;
use serde::Serialize;
use serde_json::Value;

use crate::messages::{Message, Role};

#[derive(Debug, Serialize)]
pub(super) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,

    /// Asks the endpoint to append a final chunk carrying usage when
    /// streaming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
pub(super) struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct OpenAiMessage {
    pub role: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct OpenAiToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: OpenAiFunctionCall,
}

/// OpenAI keeps call arguments as JSON strings, matching the canonical form.
#[derive(Debug, Serialize)]
pub(super) struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(super) struct OpenAiTool {
    pub r#type: &'static str,
    pub function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
pub(super) struct OpenAiToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Identity mapping: roles, contents, and tool plumbing carry over as-is;
/// the configured system prompt is prepended as a `system` message.
pub(super) fn build_request(
    model: &str,
    messages: &[Message],
    tools: &[ToolSchema],
    options: &GenerationConfig,
    stream: bool,
) -> ChatCompletionRequest {
    let mut out = Vec::with_capacity(messages.len() + 1);

    if let Some(prompt) = options.system_prompt.as_deref() {
        out.push(OpenAiMessage {
            role: "system",
            content: Some(prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    out.extend(messages.iter().map(convert_message));

    let tools = if tools.is_empty() {
        None
    } else {
        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function",
                    function: OpenAiToolFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone().unwrap_or_default(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    };

    ChatCompletionRequest {
        model: model.to_string(),
        messages: out,
        stream,
        max_tokens: options.max_output_tokens,
        temperature: options.temperature,
        top_p: options.top_p,
        presence_penalty: options.presence_penalty,
        frequency_penalty: options.frequency_penalty,
        tools,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
    }
}

fn convert_message(message: &Message) -> OpenAiMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let tool_calls = message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|call| OpenAiToolCall {
                id: call.id.clone(),
                r#type: "function",
                function: OpenAiFunctionCall {
                    name: call.function_name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect()
    });

    OpenAiMessage {
        role,
        content: message.content.clone(),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ToolCall;

    #[test]
    fn mapping_is_identity_with_string_arguments() {
        let messages = vec![
            Message::user("time?"),
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall {
                    id: "t1".to_string(),
                    function_name: "now".to_string(),
                    arguments: r#"{"tz":"UTC"}"#.to_string(),
                }],
            ),
            Message::tool("t1", "12:00"),
        ];

        let request = build_request("gpt-4o", &messages, &[], &GenerationConfig::default(), false);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["messages"][1]["tool_calls"][0]["id"], "t1");
        assert_eq!(
            json["messages"][1]["tool_calls"][0]["function"]["arguments"],
            r#"{"tz":"UTC"}"#
        );
        assert_eq!(json["messages"][2]["role"], "tool");
        assert_eq!(json["messages"][2]["tool_call_id"], "t1");
    }

    #[test]
    fn system_prompt_is_prepended() {
        let mut options = GenerationConfig::default();
        options.system_prompt = Some("be brief".to_string());

        let request = build_request("m", &[Message::user("hi")], &[], &options, false);

        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[0].content.as_deref(), Some("be brief"));
    }

    #[test]
    fn penalties_are_forwarded() {
        let mut options = GenerationConfig::default();
        options.presence_penalty = 0.5;
        options.frequency_penalty = -0.5;

        let request = build_request("m", &[Message::user("hi")], &[], &options, false);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["presence_penalty"], 0.5);
        assert_eq!(json["frequency_penalty"], -0.5);
    }

    #[test]
    fn streaming_requests_ask_for_usage() {
        let request = build_request("m", &[Message::user("hi")], &[], &GenerationConfig::default(), true);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);

        let request = build_request("m", &[Message::user("hi")], &[], &GenerationConfig::default(), false);
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("stream_options").is_none());
    }
}
