mod input;
mod output;

use async_trait::async_trait;
use config::{GenerationConfig, ProviderConfig};
use futures::{
    SinkExt, Stream, StreamExt,
    channel::{mpsc, oneshot},
};
use mcp::ToolSchema;
use reqwest::{Client, header::CONTENT_TYPE};

use self::output::ChatResponse;
use crate::{
    error::LlmError,
    messages::{DurationUsage, Message, TokenUsage},
    provider::{Provider, ProviderResponse, ProviderTurn, StreamingHandle, error_for_status, http_client::http_client},
};

pub(crate) struct OllamaProvider {
    client: Client,
    base_url: String,
    name: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig, model: &str) -> crate::Result<Self> {
        Ok(Self {
            client: http_client(config.proxy_url.as_deref())?,
            base_url: config.base_url.clone(),
            name: config.name.clone(),
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
            log::error!("failed to serialize Ollama request: {e}");
            LlmError::Internal(None)
        })?;

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to reach Ollama: {e}")))?;

        if !response.status().is_success() {
            return Err(error_for_status("Ollama", response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
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
            .map_err(|e| LlmError::Transport(format!("failed to read Ollama response: {e}")))?;

        let parsed: ChatResponse = sonic_rs::from_str(&body).map_err(|e| {
            log::error!("failed to parse Ollama response: {e}");
            LlmError::InvalidResponse(format!("unparseable Ollama reply: {e}"))
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
        let mut lines = LineReader::new(Box::pin(response.bytes_stream()));

        // Inspect chunks until one carries text or tool calls; the terminal
        // `done` object may arrive first when the answer is empty.
        let (first_text, terminal) = loop {
            match lines.next_line().await? {
                None => break (None, None),
                Some(line) => {
                    let chunk: ChatResponse = sonic_rs::from_str(&line)
                        .map_err(|e| LlmError::InvalidResponse(format!("bad Ollama chunk: {e}")))?;

                    let tool_calls = chunk.tool_calls(0);

                    if !tool_calls.is_empty() {
                        return Ok(ProviderTurn::Batch(
                            drain_tool_turn(lines, chunk, tool_calls).await?,
                        ));
                    }

                    if !chunk.message.content.is_empty() {
                        let terminal = chunk.done.then(|| (chunk.usage(), chunk.duration()));
                        break (Some(chunk.message.content), terminal);
                    }

                    if chunk.done {
                        break (None, Some((chunk.usage(), chunk.duration())));
                    }
                }
            }
        };

        let Some(first_text) = first_text else {
            // Empty stream: a terminal empty answer.
            let (usage, duration) = terminal.unwrap_or_default();
            return Ok(ProviderTurn::Batch(ProviderResponse {
                content: None,
                tool_calls: Vec::new(),
                usage: Some(usage),
                duration: Some(duration),
            }));
        };

        let (mut tx, rx) = mpsc::channel::<crate::Result<String>>(16);
        let (usage_tx, usage_rx) = oneshot::channel();
        let (duration_tx, duration_rx) = oneshot::channel();

        tokio::spawn(async move {
            if tx.send(Ok(first_text)).await.is_err() {
                return;
            }

            let mut terminal: Option<(TokenUsage, DurationUsage)> = terminal;

            while terminal.is_none() {
                match lines.next_line().await {
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    Ok(None) => break,
                    Ok(Some(line)) => match sonic_rs::from_str::<ChatResponse>(&line) {
                        Ok(chunk) => {
                            if !chunk.message.content.is_empty()
                                && tx.send(Ok(chunk.message.content.clone())).await.is_err()
                            {
                                // Receiver is gone; stop reading upstream.
                                return;
                            }

                            if chunk.done {
                                terminal = Some((chunk.usage(), chunk.duration()));
                            }
                        }
                        Err(e) => log::warn!("skipping unparseable Ollama chunk: {e}"),
                    },
                }
            }

            if let Some((usage, duration)) = terminal {
                let _ = usage_tx.send(usage);
                let _ = duration_tx.send(duration);
            }
        });

        Ok(ProviderTurn::Stream(StreamingHandle {
            text: Box::pin(rx),
            usage: usage_rx,
            duration: duration_rx,
        }))
    }
}

/// The first chunk carried tool calls: consume the stream to its `done`
/// object for accounting.
async fn drain_tool_turn<S, B>(
    mut lines: LineReader<S>,
    first_chunk: ChatResponse,
    mut tool_calls: Vec<crate::messages::ToolCall>,
) -> crate::Result<ProviderResponse>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut content = first_chunk.message.content.clone();
    let mut usage = first_chunk.done.then(|| first_chunk.usage());
    let mut duration = first_chunk.done.then(|| first_chunk.duration());

    while let Some(line) = lines.next_line().await? {
        let Ok(chunk) = sonic_rs::from_str::<ChatResponse>(&line) else {
            continue;
        };

        content.push_str(&chunk.message.content);
        tool_calls.extend(chunk.tool_calls(tool_calls.len()));

        if chunk.done {
            usage = Some(chunk.usage());
            duration = Some(chunk.duration());
        }
    }

    Ok(ProviderResponse {
        content: (!content.is_empty()).then_some(content),
        tool_calls,
        usage,
        duration,
    })
}

/// Newline-delimited JSON reader over a byte stream.
struct LineReader<S> {
    stream: S,
    buffer: String,
}

impl<S, B> LineReader<S>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: String::new(),
        }
    }

    async fn next_line(&mut self) -> crate::Result<Option<String>> {
        loop {
            if let Some(position) = self.buffer.find('\n') {
                let line = self.buffer[..position].trim().to_string();
                self.buffer.drain(..=position);

                if line.is_empty() {
                    continue;
                }

                return Ok(Some(line));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self
                    .buffer
                    .push_str(&String::from_utf8_lossy(chunk.as_ref())),
                Some(Err(e)) => {
                    return Err(LlmError::Transport(format!("Ollama stream failed: {e}")));
                }
                None => {
                    let rest = self.buffer.trim().to_string();
                    self.buffer.clear();

                    return Ok((!rest.is_empty()).then_some(rest));
                }
            }
        }
    }
}
