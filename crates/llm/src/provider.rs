//! Provider adapters.
//!
//! Each upstream family translates the canonical message list into its
//! native request and its native reply back into a [`ProviderResponse`] or a
//! [`StreamingHandle`]. The chat loop never sees provider-native shapes.
//!
//! Adapters are per-request values: they hold the resolved endpoint, key,
//! and model, and no mutable state across requests.

pub(crate) mod google;
mod http_client;
pub(crate) mod ollama;
pub(crate) mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use config::{GenerationConfig, ProviderConfig, ProviderFamily};
use futures::{Stream, channel::oneshot};
use mcp::ToolSchema;

use crate::{
    error::LlmError,
    messages::{DurationUsage, Message, TokenUsage, ToolCall},
};

/// Finite, non-restartable sequence of text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = crate::Result<String>> + Send>>;

/// A completed (non-streaming, or pre-terminal) model turn.
#[derive(Debug, Default)]
pub struct ProviderResponse {
    /// Text content, absent when the turn is only tool calls or the stream
    /// was empty.
    pub content: Option<String>,
    /// Tool-call requests. Non-empty means a tool-dispatch turn.
    pub tool_calls: Vec<ToolCall>,
    /// Token accounting for this turn, when the provider reported it.
    pub usage: Option<TokenUsage>,
    /// Phase timings for this turn, when the provider reported them.
    pub duration: Option<DurationUsage>,
}

/// The terminal streaming turn: live text plus metadata that becomes
/// resolvable only after the text is fully drained.
///
/// The senders are dropped if the stream dies early, so a receiver error
/// means "no trailer", never "wait longer".
pub struct StreamingHandle {
    /// Text chunks as the model emits them.
    pub text: TextStream,
    /// Usage from the terminal chunk.
    pub usage: oneshot::Receiver<TokenUsage>,
    /// Timings from the terminal chunk.
    pub duration: oneshot::Receiver<DurationUsage>,
}

/// What a streaming invocation turned out to be, decided by inspecting the
/// first non-empty chunk.
pub enum ProviderTurn {
    /// The model answered with a tool-call batch (or nothing at all); the
    /// remainder of the stream was drained for token accounting.
    Batch(ProviderResponse),
    /// The model began its terminal textual answer.
    Stream(StreamingHandle),
}

/// One upstream provider family, bound to a model and credentials.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// One non-streaming model invocation.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
    ) -> crate::Result<ProviderResponse>;

    /// One streaming model invocation, discriminated on the first chunk.
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
    ) -> crate::Result<ProviderTurn>;
}

/// Build the adapter for one request.
pub fn for_request(config: &ProviderConfig, model: &str) -> crate::Result<Box<dyn Provider>> {
    let provider: Box<dyn Provider> = match config.family {
        ProviderFamily::Gemini => Box::new(google::GoogleProvider::new(config, model)?),
        ProviderFamily::Ollama => Box::new(ollama::OllamaProvider::new(config, model)?),
        ProviderFamily::OpenAiCompatible => Box::new(openai::OpenAiProvider::new(config, model)?),
    };

    Ok(provider)
}

/// Map a non-2xx provider reply onto the error taxonomy.
pub(crate) async fn error_for_status(provider: &str, response: reqwest::Response) -> LlmError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<empty response>".to_string());

    log::error!("{provider} API error ({status}): {body}");

    match status.as_u16() {
        401 | 403 => LlmError::Auth(body),
        _ => LlmError::Protocol(format!("{provider} answered {status}: {body}")),
    }
}

/// Generated id for providers whose wire format carries none.
pub(crate) fn synthetic_call_id(index: usize) -> String {
    format!("call_{index}")
}
