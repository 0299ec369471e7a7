mod input;
mod output;

use async_trait::async_trait;
use config::{GenerationConfig, ProviderConfig};
use eventsource_stream::Eventsource;
use futures::{
    SinkExt, StreamExt,
    channel::{mpsc, oneshot},
};
use mcp::ToolSchema;
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use secrecy::{ExposeSecret, SecretString};

use self::output::{ChatCompletionChunk, ChatCompletionResponse, ToolCallAssembler};
use crate::{
    error::LlmError,
    messages::{Message, TokenUsage},
    provider::{Provider, ProviderResponse, ProviderTurn, StreamingHandle, error_for_status, http_client::http_client},
};

/// Adapter for any OpenAI-compatible `chat/completions` endpoint.
pub(crate) struct OpenAiProvider {
    client: Client,
    base_url: String,
    name: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, model: &str) -> crate::Result<Self> {
        Ok(Self {
            client: http_client(config.proxy_url.as_deref())?,
            base_url: config.base_url.clone(),
            name: config.name.clone(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
        })
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
        stream: bool,
    ) -> crate::Result<reqwest::Response> {
        let request = input::build_request(&self.model, messages, tools, options, stream);

        let body = sonic_rs::to_vec(&request).map_err(|e| {
            log::error!("failed to serialize request for {}: {e}", self.name);
            LlmError::Internal(None)
        })?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to reach {}: {e}", self.name)))?;

        if !response.status().is_success() {
            return Err(error_for_status(&self.name, response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
    ) -> crate::Result<ProviderResponse> {
        let response = self.send(messages, tools, options, false).await?;

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to read {} response: {e}", self.name)))?;

        let parsed: ChatCompletionResponse = sonic_rs::from_str(&body).map_err(|e| {
            log::error!("failed to parse {} response: {e}", self.name);
            LlmError::InvalidResponse(format!("unparseable {} reply: {e}", self.name))
        })?;

        Ok(parsed.into_provider_response())
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
    ) -> crate::Result<ProviderTurn> {
        let response = self.send(messages, tools, options, true).await?;
        let provider = self.name.clone();

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let mut last_usage: Option<TokenUsage> = None;

        // Inspect chunks until one carries a text or tool-call delta.
        let first_text = loop {
            match events.next().await {
                None => break None,
                Some(Err(e)) => {
                    return Err(LlmError::Transport(format!("{provider} stream failed: {e}")));
                }
                Some(Ok(event)) => {
                    if event.data == "[DONE]" {
                        break None;
                    }

                    let chunk: ChatCompletionChunk = sonic_rs::from_str(&event.data)
                        .map_err(|e| LlmError::InvalidResponse(format!("bad {provider} chunk: {e}")))?;

                    if let Some(usage) = chunk.usage {
                        last_usage = Some(usage.to_usage());
                    }

                    if chunk.has_tool_call_delta() {
                        let mut assembler = ToolCallAssembler::default();
                        assembler.absorb(&chunk);

                        return Ok(ProviderTurn::Batch(
                            drain_tool_turn(events, assembler, last_usage, &provider).await,
                        ));
                    }

                    if let Some(text) = chunk.delta_text() {
                        break Some(text.to_string());
                    }
                }
            }
        };

        let Some(first_text) = first_text else {
            // Empty stream: a terminal empty answer.
            return Ok(ProviderTurn::Batch(ProviderResponse {
                content: None,
                tool_calls: Vec::new(),
                usage: Some(last_usage.unwrap_or_default()),
                duration: None,
            }));
        };

        let (mut tx, rx) = mpsc::channel::<crate::Result<String>>(16);
        let (usage_tx, usage_rx) = oneshot::channel();
        let (duration_tx, duration_rx) = oneshot::channel();

        // No phase timings on this wire; the duration trailer stays absent.
        drop(duration_tx);

        tokio::spawn(async move {
            if tx.send(Ok(first_text)).await.is_err() {
                return;
            }

            while let Some(event) = events.next().await {
                match event {
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::Transport(format!(
                                "{provider} stream failed: {e}"
                            ))))
                            .await;
                        return;
                    }
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            break;
                        }

                        match sonic_rs::from_str::<ChatCompletionChunk>(&event.data) {
                            Ok(chunk) => {
                                if let Some(usage) = chunk.usage {
                                    last_usage = Some(usage.to_usage());
                                }

                                if let Some(text) = chunk.delta_text()
                                    && tx.send(Ok(text.to_string())).await.is_err()
                                {
                                    // Receiver is gone; stop reading upstream.
                                    return;
                                }
                            }
                            Err(e) => log::warn!("skipping unparseable {provider} chunk: {e}"),
                        }
                    }
                }
            }

            if let Some(usage) = last_usage {
                let _ = usage_tx.send(usage);
            }
        });

        Ok(ProviderTurn::Stream(StreamingHandle {
            text: Box::pin(rx),
            usage: usage_rx,
            duration: duration_rx,
        }))
    }
}

/// The first chunk carried a tool-call delta: absorb the remaining fragments
/// and the trailing usage chunk into one batch response.
async fn drain_tool_turn(
    mut events: impl futures::Stream<
        Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>,
    > + Unpin,
    mut assembler: ToolCallAssembler,
    mut last_usage: Option<TokenUsage>,
    provider: &str,
) -> ProviderResponse {
    let mut content = String::new();

    while let Some(event) = events.next().await {
        let Ok(event) = event else {
            log::warn!("{provider} stream ended abnormally while draining a tool turn");
            break;
        };

        if event.data == "[DONE]" {
            break;
        }

        let Ok(chunk) = sonic_rs::from_str::<ChatCompletionChunk>(&event.data) else {
            continue;
        };

        if let Some(usage) = chunk.usage {
            last_usage = Some(usage.to_usage());
        }

        if let Some(text) = chunk.delta_text() {
            content.push_str(text);
        }

        assembler.absorb(&chunk);
    }

    ProviderResponse {
        content: (!content.is_empty()).then_some(content),
        tool_calls: assembler.finish(),
        usage: last_usage,
        duration: None,
    }
}
