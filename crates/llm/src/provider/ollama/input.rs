//! Request conversion for the Ollama `/api/chat` API.

use config::GenerationConfig;
use mcp::ToolSchema;
use serde::Serialize;
use serde_json::Value;

use crate::messages::{Message, Role};

#[derive(Debug, Serialize)]
pub(super) struct ChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    pub options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OllamaTool>>,
}

#[derive(Debug, Serialize)]
pub(super) struct OllamaMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Serialize)]
pub(super) struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

/// Ollama represents call arguments as native objects, not JSON strings.
#[derive(Debug, Serialize)]
pub(super) struct OllamaFunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// Ollama's names for the generation knobs. `presence_penalty` and
/// `frequency_penalty` have no counterpart and are dropped.
#[derive(Debug, Serialize)]
pub(super) struct OllamaOptions {
    pub num_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Serialize)]
pub(super) struct OllamaTool {
    pub r#type: &'static str,
    pub function: OllamaToolFunction,
}

#[derive(Debug, Serialize)]
pub(super) struct OllamaToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub(super) fn build_request(
    model: &str,
    messages: &[Message],
    tools: &[ToolSchema],
    options: &GenerationConfig,
    stream: bool,
) -> ChatRequest {
    let mut out: Vec<OllamaMessage> = messages.iter().map(convert_message).collect();

    // The configured system prompt becomes (or replaces) the leading system
    // message.
    if let Some(prompt) = options.system_prompt.as_deref() {
        match out.first_mut() {
            Some(first) if first.role == "system" => first.content = prompt.to_string(),
            _ => out.insert(
                0,
                OllamaMessage {
                    role: "system",
                    content: prompt.to_string(),
                    tool_calls: None,
                },
            ),
        }
    }

    let tools = if tools.is_empty() {
        None
    } else {
        Some(
            tools
                .iter()
                .map(|tool| OllamaTool {
                    r#type: "function",
                    function: OllamaToolFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone().unwrap_or_default(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    };

    ChatRequest {
        model: model.to_string(),
        messages: out,
        stream,
        options: OllamaOptions {
            num_predict: options.max_output_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
        },
        tools,
    }
}

fn convert_message(message: &Message) -> OllamaMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let tool_calls = message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|call| OllamaToolCall {
                function: OllamaFunctionCall {
                    name: call.function_name.clone(),
                    arguments: serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::json!({})),
                },
            })
            .collect()
    });

    OllamaMessage {
        role,
        content: message.content.clone().unwrap_or_default(),
        tool_calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ToolCall;

    #[test]
    fn roles_pass_through_unchanged() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall {
                    id: "t1".to_string(),
                    function_name: "now".to_string(),
                    arguments: "{}".to_string(),
                }],
            ),
            Message::tool("t1", "12:00"),
        ];

        let request = build_request("qwen3:0.6b", &messages, &[], &GenerationConfig::default(), true);
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role).collect();

        assert_eq!(roles, vec!["system", "user", "assistant", "assistant", "tool"]);
    }

    #[test]
    fn parameter_names_are_remapped_and_penalties_dropped() {
        let mut options = GenerationConfig::default();
        options.max_output_tokens = 512;
        options.temperature = 0.5;
        options.presence_penalty = 1.0;

        let request = build_request("m", &[Message::user("hi")], &[], &options, false);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["options"]["num_predict"], 512);
        assert_eq!(json["options"]["temperature"], 0.5);
        assert!(json["options"].get("presence_penalty").is_none());
    }

    #[test]
    fn system_prompt_replaces_an_existing_leading_system_message() {
        let mut options = GenerationConfig::default();
        options.system_prompt = Some("configured".to_string());

        let messages = vec![Message::system("original"), Message::user("hi")];
        let request = build_request("m", &messages, &[], &options, true);

        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[0].content, "configured");
        assert_eq!(request.messages.len(), 2);
    }

    #[test]
    fn system_prompt_is_inserted_when_no_system_message_exists() {
        let mut options = GenerationConfig::default();
        options.system_prompt = Some("configured".to_string());

        let request = build_request("m", &[Message::user("hi")], &[], &options, true);

        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
    }

    #[test]
    fn tool_call_arguments_become_native_objects() {
        let messages = vec![Message::assistant_with_tool_calls(
            None,
            vec![ToolCall {
                id: "t1".to_string(),
                function_name: "query_orders".to_string(),
                arguments: r#"{"guest":"li"}"#.to_string(),
            }],
        )];

        let request = build_request("m", &messages, &[], &GenerationConfig::default(), true);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json["messages"][0]["tool_calls"][0]["function"]["arguments"]["guest"],
            "li"
        );
    }
}
