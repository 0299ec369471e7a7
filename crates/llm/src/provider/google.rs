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
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use self::output::GenerateResponse;
use crate::{
    error::LlmError,
    messages::{Message, TokenUsage},
    provider::{Provider, ProviderResponse, ProviderTurn, StreamingHandle, error_for_status, http_client::http_client},
};

pub(crate) struct GoogleProvider {
    client: Client,
    base_url: String,
    name: String,
    api_key: SecretString,
    model: String,
}

impl GoogleProvider {
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
        endpoint: &str,
        query: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
    ) -> crate::Result<reqwest::Response> {
        let url = format!(
            "{}/models/{}:{endpoint}?{query}key={}",
            self.base_url,
            self.model,
            self.api_key.expose_secret()
        );

        let request = input::build_request(messages, tools, options);

        let body = sonic_rs::to_vec(&request).map_err(|e| {
            log::error!("failed to serialize Gemini request: {e}");
            LlmError::Internal(None)
        })?;

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to reach Gemini: {e}")))?;

        if !response.status().is_success() {
            return Err(error_for_status("Gemini", response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
    ) -> crate::Result<ProviderResponse> {
        let response = self
            .send("generateContent", "", messages, tools, options)
            .await?;

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to read Gemini response: {e}")))?;

        let parsed: GenerateResponse = sonic_rs::from_str(&body).map_err(|e| {
            log::error!("failed to parse Gemini response: {e}");
            LlmError::InvalidResponse(format!("unparseable Gemini reply: {e}"))
        })?;

        Ok(parsed.into_provider_response())
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationConfig,
    ) -> crate::Result<ProviderTurn> {
        let response = self
            .send("streamGenerateContent", "alt=sse&", messages, tools, options)
            .await?;

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let mut last_usage: Option<TokenUsage> = None;

        // Inspect chunks until one carries text or tool calls.
        let first_text = loop {
            match events.next().await {
                None => break None,
                Some(Err(e)) => {
                    return Err(LlmError::Transport(format!("Gemini stream failed: {e}")));
                }
                Some(Ok(event)) => {
                    let chunk: GenerateResponse = sonic_rs::from_str(&event.data)
                        .map_err(|e| LlmError::InvalidResponse(format!("bad Gemini chunk: {e}")))?;

                    if let Some(meta) = chunk.usage_metadata {
                        last_usage = Some(meta.to_usage());
                    }

                    let tool_calls = chunk.tool_calls(0);

                    if !tool_calls.is_empty() {
                        return Ok(ProviderTurn::Batch(
                            drain_tool_turn(events, chunk, tool_calls, last_usage).await,
                        ));
                    }

                    let text = chunk.text();
                    if !text.is_empty() {
                        break Some(text);
                    }
                }
            }
        };

        let Some(first_text) = first_text else {
            // Empty stream: a terminal empty answer, not an error.
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

        // Gemini reports no phase timings; dropping the sender makes the
        // duration trailer resolve as absent.
        drop(duration_tx);

        tokio::spawn(async move {
            if tx.send(Ok(first_text)).await.is_err() {
                return;
            }

            while let Some(event) = events.next().await {
                match event {
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::Transport(format!("Gemini stream failed: {e}"))))
                            .await;
                        return;
                    }
                    Ok(event) => match sonic_rs::from_str::<GenerateResponse>(&event.data) {
                        Ok(chunk) => {
                            if let Some(meta) = chunk.usage_metadata {
                                last_usage = Some(meta.to_usage());
                            }

                            let text = chunk.text();
                            if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                // Receiver is gone; stop reading upstream.
                                return;
                            }
                        }
                        Err(e) => log::warn!("skipping unparseable Gemini chunk: {e}"),
                    },
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

/// The first chunk carried tool calls: consume the rest of the stream for
/// accounting and fold everything into one batch response.
async fn drain_tool_turn(
    mut events: impl futures::Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>>
    + Unpin,
    first_chunk: GenerateResponse,
    mut tool_calls: Vec<crate::messages::ToolCall>,
    mut last_usage: Option<TokenUsage>,
) -> ProviderResponse {
    let mut content = first_chunk.text();

    while let Some(event) = events.next().await {
        let Ok(event) = event else {
            log::warn!("Gemini stream ended abnormally while draining a tool turn");
            break;
        };

        let Ok(chunk) = sonic_rs::from_str::<GenerateResponse>(&event.data) else {
            continue;
        };

        if let Some(meta) = chunk.usage_metadata {
            last_usage = Some(meta.to_usage());
        }

        content.push_str(&chunk.text());
        tool_calls.extend(chunk.tool_calls(tool_calls.len()));
    }

    ProviderResponse {
        content: (!content.is_empty()).then_some(content),
        tool_calls,
        usage: last_usage,
        duration: None,
    }
}
