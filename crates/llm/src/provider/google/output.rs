//! Reply parsing for the Gemini `generateContent` API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    messages::{TokenUsage, ToolCall},
    provider::{ProviderResponse, synthetic_call_id},
};

/// One conversation turn in Gemini wire form, shared between request
/// serialization and reply parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct GeminiContent {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A part is one of text / functionCall / functionResponse; unknown part
/// shapes deserialize to an empty part and are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(
        default,
        rename = "functionCall",
        skip_serializing_if = "Option::is_none"
    )]
    pub function_call: Option<GeminiFunctionCall>,

    #[serde(
        default,
        rename = "functionResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub function_response: Option<GeminiFunctionResponse>,
}

impl GeminiPart {
    pub fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }

    pub fn function_call(call: GeminiFunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Default::default()
        }
    }

    pub fn function_response(response: GeminiFunctionResponse) -> Self {
        Self {
            function_response: Some(response),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct GeminiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct GeminiFunctionResponse {
    pub name: String,
    pub response: Value,
}

/// Reply body of `generateContent`, and the shape of each streaming chunk of
/// `streamGenerateContent`.
#[derive(Debug, Deserialize)]
pub(super) struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,

    #[serde(default, rename = "usageMetadata")]
    pub usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(super) struct GeminiUsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    pub prompt_token_count: u64,

    #[serde(default, rename = "candidatesTokenCount")]
    pub candidates_token_count: u64,
}

impl GeminiUsageMetadata {
    pub fn to_usage(self) -> TokenUsage {
        TokenUsage::new(self.prompt_token_count, self.candidates_token_count)
    }
}

impl GenerateResponse {
    /// Text carried by the first candidate, concatenated across parts.
    pub fn text(&self) -> String {
        let Some(candidate) = self.candidates.first() else {
            return String::new();
        };

        let Some(content) = &candidate.content else {
            return String::new();
        };

        content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect()
    }

    /// Function calls of the first candidate. Gemini carries no call ids;
    /// synthetic ones are assigned in declaration order, offset by
    /// `id_offset` when accumulating across chunks.
    pub fn tool_calls(&self, id_offset: usize) -> Vec<ToolCall> {
        let Some(content) = self.candidates.first().and_then(|c| c.content.as_ref()) else {
            return Vec::new();
        };

        content
            .parts
            .iter()
            .filter_map(|part| part.function_call.as_ref())
            .enumerate()
            .map(|(index, call)| ToolCall {
                id: synthetic_call_id(id_offset + index),
                function_name: call.name.clone(),
                arguments: call.args.to_string(),
            })
            .collect()
    }

    pub fn into_provider_response(self) -> ProviderResponse {
        let text = self.text();
        let tool_calls = self.tool_calls(0);

        ProviderResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            usage: self.usage_metadata.map(GeminiUsageMetadata::to_usage),
            // Gemini reports no phase timings.
            duration: None,
        }
    }
}
