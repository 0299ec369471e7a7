//! Request conversion for the Gemini `generateContent` API.

use std::collections::HashMap;

use config::GenerationConfig;
use mcp::ToolSchema;
use serde::Serialize;
use serde_json::Value;

use crate::messages::{Message, Role};

use super::output::{GeminiContent, GeminiFunctionCall, GeminiFunctionResponse, GeminiPart};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateRequest {
    pub contents: Vec<GeminiContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,

    /// System text lifted out of the message list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiGenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiTool {
    pub function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub(super) struct GeminiFunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

/// Map the canonical conversation onto a Gemini request.
///
/// Role remapping: `assistant` becomes `model`, tool results become `function`
/// turns with a `functionResponse` part, and all system text (the configured
/// system prompt first, then in-conversation system messages) is lifted into
/// `systemInstruction`. `presence_penalty`/`frequency_penalty` have no Gemini
/// counterpart and are dropped.
pub(super) fn build_request(
    messages: &[Message],
    tools: &[ToolSchema],
    options: &GenerationConfig,
) -> GenerateRequest {
    // functionResponse parts are keyed by tool name, so recover the name
    // each tool_call_id refers to from the preceding assistant batches.
    let mut call_names: HashMap<&str, &str> = HashMap::new();

    for message in messages {
        for call in message.tool_calls.as_deref().unwrap_or_default() {
            call_names.insert(&call.id, &call.function_name);
        }
    }

    let mut system_texts: Vec<&str> = Vec::new();

    if let Some(prompt) = options.system_prompt.as_deref() {
        system_texts.push(prompt);
    }

    let mut contents = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                if let Some(text) = message.content.as_deref() {
                    system_texts.push(text);
                }
            }
            Role::User => {
                contents.push(GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart::text(message.content.clone().unwrap_or_default())],
                });
            }
            Role::Assistant => {
                let mut parts = Vec::new();

                if let Some(text) = &message.content {
                    if !text.is_empty() {
                        parts.push(GeminiPart::text(text.clone()));
                    }
                }

                for call in message.tool_calls.as_deref().unwrap_or_default() {
                    parts.push(GeminiPart::function_call(GeminiFunctionCall {
                        name: call.function_name.clone(),
                        args: parse_arguments(&call.arguments),
                    }));
                }

                contents.push(GeminiContent {
                    role: "model".to_string(),
                    parts,
                });
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                let name = call_names.get(id).copied().unwrap_or(id);

                contents.push(GeminiContent {
                    role: "function".to_string(),
                    parts: vec![GeminiPart::function_response(GeminiFunctionResponse {
                        name: name.to_string(),
                        response: serde_json::json!({
                            "result": message.content.clone().unwrap_or_default(),
                        }),
                    })],
                });
            }
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart::text(system_texts.join("\n\n"))],
        })
    };

    let tools = if tools.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                })
                .collect(),
        }])
    };

    GenerateRequest {
        contents,
        generation_config: Some(GeminiGenerationConfig {
            max_output_tokens: options.max_output_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
        }),
        tools,
        system_instruction,
    }
}

/// Arguments travel as JSON strings in the canonical form; Gemini wants the
/// object itself.
fn parse_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Message, ToolCall};

    fn options() -> GenerationConfig {
        GenerationConfig::default()
    }

    #[test]
    fn roles_are_remapped_and_system_is_lifted() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];

        let request = build_request(&messages, &[], &options());

        assert_eq!(request.contents.len(), 2);
        assert_eq!(request.contents[0].role, "user");
        assert_eq!(request.contents[1].role, "model");

        let instruction = request.system_instruction.unwrap();
        assert_eq!(instruction.parts[0].text.as_deref(), Some("be brief"));
    }

    #[test]
    fn system_prompt_option_precedes_conversation_system_text() {
        let messages = vec![Message::system("from conversation"), Message::user("hi")];

        let mut options = options();
        options.system_prompt = Some("from options".to_string());

        let request = build_request(&messages, &[], &options);
        let text = request.system_instruction.unwrap().parts[0]
            .text
            .clone()
            .unwrap();

        assert_eq!(text, "from options\n\nfrom conversation");
    }

    #[test]
    fn tool_results_become_function_responses_by_name() {
        let messages = vec![
            Message::user("time?"),
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall {
                    id: "t1".to_string(),
                    function_name: "get_current_time".to_string(),
                    arguments: "{}".to_string(),
                }],
            ),
            Message::tool("t1", "2025-01-01T00:00:00Z"),
        ];

        let request = build_request(&messages, &[], &options());

        let call_turn = &request.contents[1];
        assert_eq!(call_turn.role, "model");
        let call = call_turn.parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_current_time");

        let result_turn = &request.contents[2];
        assert_eq!(result_turn.role, "function");
        let response = result_turn.parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "get_current_time");
        assert_eq!(response.response["result"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn penalties_are_dropped_from_the_wire_format() {
        let mut options = options();
        options.presence_penalty = 1.5;
        options.frequency_penalty = -1.0;

        let request = build_request(&[Message::user("hi")], &[], &options);
        let json = serde_json::to_value(&request).unwrap();

        assert!(json["generationConfig"].get("presencePenalty").is_none());
        assert!(json["generationConfig"].get("frequencyPenalty").is_none());
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn tool_schemas_become_function_declarations() {
        let tools = vec![ToolSchema {
            name: "query_orders".to_string(),
            description: Some("Query orders".to_string()),
            parameters: serde_json::json!({ "type": "object" }),
        }];

        let request = build_request(&[Message::user("hi")], &tools, &options());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json["tools"][0]["functionDeclarations"][0]["name"],
            "query_orders"
        );
    }
}
