//! The tool-calling loop.
//!
//! Drives the model↔tools iteration: invoke the provider, branch on "final
//! answer" vs "tool-call batch", fan the batch out concurrently, fold the
//! results back into the conversation in declaration order, and repeat until
//! the model answers in text or the iteration cap fires. Usage and duration
//! are accumulated across every turn, including tool-call turns.

use std::time::Duration;

use async_trait::async_trait;
use config::GenerationConfig;
use futures::{FutureExt, future::BoxFuture};
use mcp::{ToolError, ToolSchema};
use serde_json::Value;

use crate::{
    deadline::with_deadline,
    error::LlmError,
    messages::{DurationUsage, Message, TokenUsage, ToolCall},
    provider::{Provider, ProviderTurn, StreamingHandle, TextStream},
};

/// Seam between the loop and the tool-server client, so the loop can be
/// exercised without a network.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// The tools to offer the model.
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, ToolError>;

    /// Invoke one tool; the result is the text fed back to the model.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError>;
}

/// Production dispatcher backed by the shared per-URL tool-server client.
pub struct McpDispatcher {
    server: std::sync::Arc<mcp::ToolServer>,
}

impl McpDispatcher {
    /// Connect to (or reuse the cached client for) `url`.
    pub async fn connect(url: &str) -> Result<Self, ToolError> {
        Ok(Self {
            server: mcp::tool_server(url).await?,
        })
    }
}

#[async_trait]
impl ToolDispatcher for McpDispatcher {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, ToolError> {
        Ok(self.server.list_tools().await?.to_vec())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        self.server.call_tool(name, arguments).await
    }
}

/// How a chat request concluded.
#[derive(Debug)]
pub enum ChatOutcome {
    /// Non-streaming mode, or a streaming request whose terminal turn was
    /// empty: the completed answer with grand totals.
    Complete {
        /// Final text, empty when the model produced none.
        content: String,
        /// Cumulative usage over all turns.
        usage: TokenUsage,
        /// Cumulative timings over all turns.
        duration: DurationUsage,
    },

    /// The terminal turn is streaming; hand off to the multiplexer.
    Streaming(ChatStream),
}

/// The loop's streaming result: live text plus grand-total trailers that
/// resolve after the text is drained. A `None` trailer means the underlying
/// provider never reported the value and the frame must be omitted.
impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

pub struct ChatStream {
    /// Text chunks of the terminal turn.
    pub text: TextStream,
    /// Cumulative usage, resolving after the terminal chunk.
    pub usage: BoxFuture<'static, Option<TokenUsage>>,
    /// Cumulative timings, resolving after the terminal chunk.
    pub duration: BoxFuture<'static, Option<DurationUsage>>,
    /// Bound on each stream read, carried from the request's `timeout_ms`.
    pub read_timeout: Duration,
}

/// Run the tool-calling loop to completion.
///
/// Tool discovery failure is not fatal: the conversation proceeds as if no
/// tools were configured. A failed individual tool call is folded into the
/// conversation as an `Error: …` tool message for the model to recover from.
pub async fn run_chat(
    provider: &dyn Provider,
    dispatcher: Option<&dyn ToolDispatcher>,
    mut messages: Vec<Message>,
    options: &GenerationConfig,
) -> crate::Result<ChatOutcome> {
    let tools = match dispatcher {
        Some(dispatcher) => match dispatcher.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                log::warn!("tool discovery failed, continuing without tools: {e}");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let mut usage_acc = TokenUsage::default();
    let mut duration_acc = DurationUsage::default();
    let mut iterations: u32 = 0;

    loop {
        let turn = if options.stream {
            with_deadline(
                options.timeout(),
                provider.complete_stream(&messages, &tools, options),
            )
            .await?
        } else {
            ProviderTurn::Batch(
                with_deadline(options.timeout(), provider.complete(&messages, &tools, options))
                    .await?,
            )
        };

        let response = match turn {
            ProviderTurn::Stream(handle) => {
                return Ok(ChatOutcome::Streaming(finish_streaming(
                    handle,
                    usage_acc,
                    duration_acc,
                    options.timeout(),
                )));
            }
            ProviderTurn::Batch(response) => response,
        };

        if let Some(usage) = &response.usage {
            usage_acc.add(usage);
        }

        if let Some(duration) = &response.duration {
            duration_acc.add(duration);
        }

        if response.tool_calls.is_empty() {
            return Ok(ChatOutcome::Complete {
                content: response.content.unwrap_or_default(),
                usage: usage_acc.normalized(),
                duration: duration_acc,
            });
        }

        if iterations == options.max_tool_calls {
            log::warn!(
                "model requested tools after {} iteration(s), aborting",
                iterations
            );
            return Err(LlmError::MaxIterationsExceeded {
                limit: options.max_tool_calls,
            });
        }

        let calls = response.tool_calls;
        log::debug!(
            "iteration {}: dispatching {} tool call(s)",
            iterations + 1,
            calls.len()
        );

        messages.push(Message::assistant_with_tool_calls(
            response.content,
            calls.clone(),
        ));

        // Fan out concurrently; join_all yields results in input order, so
        // completion order cannot reorder the conversation.
        let results = dispatch_batch(dispatcher, &calls).await;

        for (call, result) in calls.iter().zip(results) {
            messages.push(Message::tool(call.id.clone(), result));
        }

        iterations += 1;
    }
}

async fn dispatch_batch(dispatcher: Option<&dyn ToolDispatcher>, calls: &[ToolCall]) -> Vec<String> {
    let futures = calls.iter().map(|call| async move {
        let Some(dispatcher) = dispatcher else {
            return format!(
                "Error: no tool server is configured, cannot call '{}'",
                call.function_name
            );
        };

        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => return format!("Error: invalid tool arguments: {e}"),
        };

        match dispatcher.call_tool(&call.function_name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("tool call '{}' failed: {e}", call.function_name);
                format!("Error: {e}")
            }
        }
    });

    futures::future::join_all(futures).await
}

/// Close the accumulators over the terminal turn's deferred metadata: when
/// the provider's promise resolves, the terminal values are added to the
/// running totals and the grand totals come out.
fn finish_streaming(
    handle: StreamingHandle,
    mut usage_acc: TokenUsage,
    mut duration_acc: DurationUsage,
    read_timeout: Duration,
) -> ChatStream {
    let StreamingHandle {
        text,
        usage,
        duration,
    } = handle;

    let usage = async move {
        match usage.await {
            Ok(terminal) => {
                usage_acc.add(&terminal);
                Some(usage_acc.normalized())
            }
            // Sender dropped: the stream died before its metadata.
            Err(_) => None,
        }
    }
    .boxed();

    let duration = async move {
        match duration.await {
            Ok(terminal) => {
                duration_acc.add(&terminal);
                Some(duration_acc)
            }
            Err(_) => None,
        }
    }
    .boxed();

    ChatStream {
        text,
        usage,
        duration,
        read_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderResponse;
    use futures::{StreamExt, channel::oneshot};
    use std::sync::Mutex;

    /// Scripted provider: pops one response per invocation.
    struct MockProvider {
        turns: Mutex<Vec<ProviderTurn>>,
    }

    impl MockProvider {
        fn new(turns: Vec<ProviderTurn>) -> Self {
            Self {
                turns: Mutex::new(turns),
            }
        }

        fn batch(response: ProviderResponse) -> ProviderTurn {
            ProviderTurn::Batch(response)
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _options: &GenerationConfig,
        ) -> crate::Result<ProviderResponse> {
            match self.turns.lock().unwrap().remove(0) {
                ProviderTurn::Batch(response) => Ok(response),
                ProviderTurn::Stream(_) => panic!("non-streaming test asked for a stream"),
            }
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _options: &GenerationConfig,
        ) -> crate::Result<ProviderTurn> {
            Ok(self.turns.lock().unwrap().remove(0))
        }
    }

    /// Dispatcher answering from a fixed table; unknown tools fail.
    struct MockDispatcher {
        tools: Vec<ToolSchema>,
        answers: Vec<(&'static str, &'static str)>,
        fail_listing: bool,
    }

    impl MockDispatcher {
        fn new(answers: Vec<(&'static str, &'static str)>) -> Self {
            let tools = answers
                .iter()
                .map(|(name, _)| ToolSchema {
                    name: name.to_string(),
                    description: None,
                    parameters: serde_json::json!({ "type": "object" }),
                })
                .collect();

            Self {
                tools,
                answers,
                fail_listing: false,
            }
        }
    }

    #[async_trait]
    impl ToolDispatcher for MockDispatcher {
        async fn list_tools(&self) -> Result<Vec<ToolSchema>, ToolError> {
            if self.fail_listing {
                return Err(ToolError::Discovery("listing refused".to_string()));
            }

            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<String, ToolError> {
            self.answers
                .iter()
                .find(|(answer_name, _)| *answer_name == name)
                .map(|(_, answer)| answer.to_string())
                .ok_or_else(|| ToolError::Invocation {
                    tool_name: name.to_string(),
                    message: "unknown tool".to_string(),
                })
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            function_name: name.to_string(),
            arguments: "{}".to_string(),
        }
    }

    fn non_streaming() -> GenerationConfig {
        GenerationConfig {
            stream: false,
            ..Default::default()
        }
    }

    fn text_turn(content: &str, usage: TokenUsage) -> ProviderTurn {
        MockProvider::batch(ProviderResponse {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            usage: Some(usage),
            duration: None,
        })
    }

    fn tool_turn(calls: Vec<ToolCall>, usage: TokenUsage) -> ProviderTurn {
        MockProvider::batch(ProviderResponse {
            content: None,
            tool_calls: calls,
            usage: Some(usage),
            duration: None,
        })
    }

    #[tokio::test]
    async fn one_tool_hop_accumulates_usage() {
        let provider = MockProvider::new(vec![
            tool_turn(vec![call("t1", "get_current_time")], TokenUsage::new(10, 2)),
            text_turn("It is 2025-01-01T00:00:00Z", TokenUsage::new(15, 8)),
        ]);
        let dispatcher = MockDispatcher::new(vec![("get_current_time", "2025-01-01T00:00:00Z")]);

        let outcome = run_chat(
            &provider,
            Some(&dispatcher),
            vec![Message::user("what time is it?")],
            &non_streaming(),
        )
        .await
        .unwrap();

        match outcome {
            ChatOutcome::Complete { content, usage, .. } => {
                assert_eq!(content, "It is 2025-01-01T00:00:00Z");
                assert_eq!(usage, TokenUsage::new(25, 10));
                assert_eq!(usage.total_tokens, 35);
            }
            ChatOutcome::Streaming(_) => panic!("expected a completed answer"),
        }
    }

    #[tokio::test]
    async fn failed_tool_call_is_folded_back_for_recovery() {
        let provider = MockProvider::new(vec![
            tool_turn(vec![call("t1", "unknown_tool")], TokenUsage::new(5, 1)),
            text_turn("Sorry, I can't do that.", TokenUsage::new(9, 4)),
        ]);
        let dispatcher = MockDispatcher::new(vec![("get_current_time", "noon")]);

        let outcome = run_chat(
            &provider,
            Some(&dispatcher),
            vec![Message::user("hi")],
            &non_streaming(),
        )
        .await
        .unwrap();

        match outcome {
            ChatOutcome::Complete { content, .. } => {
                assert_eq!(content, "Sorry, I can't do that.");
            }
            ChatOutcome::Streaming(_) => panic!("expected a completed answer"),
        }
    }

    #[tokio::test]
    async fn iteration_cap_fails_with_max_iterations_exceeded() {
        let mut options = non_streaming();
        options.max_tool_calls = 2;

        let provider = MockProvider::new(vec![
            tool_turn(vec![call("t1", "get_current_time")], TokenUsage::new(1, 1)),
            tool_turn(vec![call("t2", "get_current_time")], TokenUsage::new(1, 1)),
            tool_turn(vec![call("t3", "get_current_time")], TokenUsage::new(1, 1)),
        ]);
        let dispatcher = MockDispatcher::new(vec![("get_current_time", "noon")]);

        let error = run_chat(
            &provider,
            Some(&dispatcher),
            vec![Message::user("hi")],
            &options,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            error,
            LlmError::MaxIterationsExceeded { limit: 2 }
        ));
    }

    #[tokio::test]
    async fn zero_iteration_cap_still_allows_a_plain_answer() {
        let mut options = non_streaming();
        options.max_tool_calls = 0;

        let provider = MockProvider::new(vec![text_turn("hi there", TokenUsage::new(2, 2))]);

        let outcome = run_chat(&provider, None, vec![Message::user("hi")], &options)
            .await
            .unwrap();

        assert!(matches!(outcome, ChatOutcome::Complete { .. }));
    }

    #[tokio::test]
    async fn zero_iteration_cap_rejects_any_tool_request_before_dispatch() {
        let mut options = non_streaming();
        options.max_tool_calls = 0;

        let provider = MockProvider::new(vec![tool_turn(
            vec![call("t1", "get_current_time")],
            TokenUsage::new(1, 1),
        )]);
        let dispatcher = MockDispatcher::new(vec![("get_current_time", "noon")]);

        let error = run_chat(
            &provider,
            Some(&dispatcher),
            vec![Message::user("hi")],
            &options,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            error,
            LlmError::MaxIterationsExceeded { limit: 0 }
        ));
    }

    #[tokio::test]
    async fn discovery_failure_degrades_to_toolless() {
        let mut dispatcher = MockDispatcher::new(vec![("get_current_time", "noon")]);
        dispatcher.fail_listing = true;

        let provider = MockProvider::new(vec![text_turn("hello", TokenUsage::new(1, 1))]);

        let outcome = run_chat(
            &provider,
            Some(&dispatcher),
            vec![Message::user("hi")],
            &non_streaming(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, ChatOutcome::Complete { .. }));
    }

    #[tokio::test]
    async fn tool_results_keep_declaration_order() {
        // Two calls whose completion order is scrambled by a sleep: the
        // slower one is declared first and must still land first.
        struct SlowFirstDispatcher;

        #[async_trait]
        impl ToolDispatcher for SlowFirstDispatcher {
            async fn list_tools(&self) -> Result<Vec<ToolSchema>, ToolError> {
                Ok(Vec::new())
            }

            async fn call_tool(&self, name: &str, _arguments: Value) -> Result<String, ToolError> {
                if name == "slow" {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }

                Ok(format!("{name} result"))
            }
        }

        let calls = vec![call("t1", "slow"), call("t2", "fast")];
        let results = dispatch_batch(Some(&SlowFirstDispatcher), &calls).await;

        assert_eq!(results, vec!["slow result".to_string(), "fast result".to_string()]);
    }

    #[tokio::test]
    async fn streaming_terminal_turn_reports_grand_totals() {
        let (usage_tx, usage_rx) = oneshot::channel();
        let (duration_tx, duration_rx) = oneshot::channel();

        let chunks: Vec<crate::Result<String>> = vec![Ok("he".to_string()), Ok("llo".to_string())];
        let handle = StreamingHandle {
            text: Box::pin(futures::stream::iter(chunks)),
            usage: usage_rx,
            duration: duration_rx,
        };

        usage_tx.send(TokenUsage::new(15, 8)).unwrap();
        duration_tx
            .send(DurationUsage {
                total_duration: 200,
                ..Default::default()
            })
            .unwrap();

        // As if one tool turn had already consumed 10+2 tokens and 100ns.
        let mut stream = finish_streaming(
            handle,
            TokenUsage::new(10, 2),
            DurationUsage {
                total_duration: 100,
                ..Default::default()
            },
            Duration::from_secs(60),
        );

        let mut text = String::new();
        while let Some(chunk) = stream.text.next().await {
            text.push_str(&chunk.unwrap());
        }

        assert_eq!(text, "hello");
        assert_eq!(stream.usage.await.unwrap(), TokenUsage::new(25, 10));
        assert_eq!(stream.duration.await.unwrap().total_duration, 300);
    }

    #[tokio::test]
    async fn dead_metadata_senders_omit_trailers() {
        let (usage_tx, usage_rx) = oneshot::channel::<TokenUsage>();
        let (duration_tx, duration_rx) = oneshot::channel::<DurationUsage>();
        drop(usage_tx);
        drop(duration_tx);

        let handle = StreamingHandle {
            text: Box::pin(futures::stream::empty::<crate::Result<String>>()),
            usage: usage_rx,
            duration: duration_rx,
        };

        let stream = finish_streaming(
            handle,
            TokenUsage::default(),
            DurationUsage::default(),
            Duration::from_secs(60),
        );

        assert!(stream.usage.await.is_none());
        assert!(stream.duration.await.is_none());
    }
}
