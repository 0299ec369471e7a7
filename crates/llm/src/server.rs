//! HTTP routes of the orchestration core: chat, model discovery, and the
//! tool-server probe.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
};
use config::{GenerationConfig, ModelOption, ProviderRegistry};
use serde::{Deserialize, Serialize};

use futures::FutureExt;

use crate::{
    chat::{ChatOutcome, ChatStream, McpDispatcher, ToolDispatcher, run_chat},
    error::LlmError,
    messages::{DurationUsage, Message, TokenUsage, validate_conversation},
    provider, stream,
};

struct AppState {
    registry: ProviderRegistry,
}

/// Build the router over a resolved provider registry.
pub fn router(registry: ProviderRegistry) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/model-list", get(model_list))
        .route("/mcp-test", post(mcp_test))
        .with_state(Arc::new(AppState { registry }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(rename = "selectedModel")]
    selected_model: String,

    messages: Vec<Message>,

    #[serde(default)]
    options: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    content: String,
    usage: TokenUsage,
    duration: DurationUsage,
}

/// Handle a chat request in either delivery mode.
///
/// Streaming responses are `text/event-stream` bodies following the
/// `text* usage? duration?` frame contract; non-streaming responses are one
/// JSON object with the completed answer and grand totals.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> crate::Result<Response> {
    let (provider_name, model) = parse_selector(&request.selected_model)?;

    if request.messages.is_empty() {
        return Err(LlmError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    validate_conversation(&request.messages).map_err(LlmError::InvalidRequest)?;
    request.options.validate().map_err(LlmError::InvalidRequest)?;

    let provider_config = state.registry.get(provider_name).ok_or_else(|| {
        LlmError::InvalidRequest(format!("unknown provider '{provider_name}'"))
    })?;

    let provider = provider::for_request(provider_config, model)?;

    log::debug!(
        "chat request: provider={provider_name} model={model} messages={} stream={}",
        request.messages.len(),
        request.options.stream
    );

    // A broken tool server must not break the conversation: degrade to a
    // toolless request and keep going.
    let dispatcher = match request.options.mcp_server_url.as_deref() {
        Some(url) => match McpDispatcher::connect(url).await {
            Ok(dispatcher) => Some(dispatcher),
            Err(e) => {
                log::warn!("tool server {url} unavailable, continuing without tools: {e}");
                None
            }
        },
        None => None,
    };

    let outcome = run_chat(
        provider.as_ref(),
        dispatcher.as_ref().map(|d| d as &dyn ToolDispatcher),
        request.messages,
        &request.options,
    )
    .await?;

    match outcome {
        ChatOutcome::Complete {
            content,
            usage,
            duration,
        } => {
            // A streaming request can still conclude with a completed value
            // (empty terminal stream); the client gets its frames regardless.
            if request.options.stream {
                let chunks: Vec<crate::Result<String>> = if content.is_empty() {
                    Vec::new()
                } else {
                    vec![Ok(content)]
                };

                let chat_stream = ChatStream {
                    text: Box::pin(futures::stream::iter(chunks)),
                    usage: futures::future::ready(Some(usage)).boxed(),
                    duration: futures::future::ready(Some(duration)).boxed(),
                    read_timeout: request.options.timeout(),
                };

                return Ok(sse_response(chat_stream));
            }

            Ok(Json(ChatResponse {
                content,
                usage,
                duration,
            })
            .into_response())
        }
        ChatOutcome::Streaming(chat_stream) => Ok(sse_response(chat_stream)),
    }
}

fn sse_response(chat_stream: ChatStream) -> Response {
    let mut response = Sse::new(stream::sse_events(chat_stream)).into_response();

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );

    response
}

/// Split a `provider:model` selector on the first colon; model names may
/// themselves contain colons (`ollama:qwen3:0.6b`).
fn parse_selector(selector: &str) -> crate::Result<(&str, &str)> {
    match selector.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(LlmError::InvalidRequest(format!(
            "invalid model selector '{selector}', expected 'provider:model'"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ModelListParams {
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

async fn model_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ModelListParams>,
) -> crate::Result<Json<Vec<ModelOption>>> {
    match params.kind.as_deref() {
        Some("options") => Ok(Json(state.registry.model_options())),
        other => Err(LlmError::InvalidRequest(format!(
            "unsupported model-list type '{}'",
            other.unwrap_or_default()
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct McpTestRequest {
    url: String,
}

/// Explicitly probe a tool server; detection failures are reported here
/// rather than swallowed.
async fn mcp_test(Json(request): Json<McpTestRequest>) -> Json<mcp::ProbeReport> {
    Json(mcp::probe(&request.url).await)
}
