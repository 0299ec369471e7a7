use std::{sync::Arc, time::Duration};

use rmcp::{
    RoleClient, ServiceExt,
    model::CallToolRequestParam,
    service::RunningService,
    transport::{
        SseClientTransport, common::client_side_sse::FixedInterval, sse_client::SseClientConfig,
    },
};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::{
    detect::{self, Detection, ServerKind},
    error::ToolError,
    schema::ToolSchema,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(15);
const CALL_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected tool server behind one of the three wire variants.
///
/// One instance exists per URL (see [`crate::tool_server`]); its tool
/// listing is fetched once and cached for the instance lifetime, tool calls
/// are never cached.
pub struct ToolServer {
    base_url: String,
    kind: ServerKind,
    transport: Transport,
    tools: OnceCell<Vec<ToolSchema>>,
}

enum Transport {
    Mcp(RunningService<RoleClient, ()>),
    Http(reqwest::Client),
}

impl ToolServer {
    /// Detect the wire variant at `base_url` and establish the transport.
    pub async fn connect(base_url: &str) -> Result<Self, ToolError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ToolError::Discovery(format!("failed to build HTTP client: {e}")))?;

        let (kind, transport) = match detect::detect(&http, &base_url).await? {
            // The successful probe is the session; no second handshake.
            Detection::StreamableHttp(service) => {
                (ServerKind::StreamableHttp, Transport::Mcp(service))
            }
            Detection::Sse => (
                ServerKind::Sse,
                Transport::Mcp(sse_service(http, &base_url).await?),
            ),
            Detection::Http => (ServerKind::Http, Transport::Http(http)),
            Detection::HttpRoot => (ServerKind::HttpRoot, Transport::Http(http)),
        };

        log::debug!("connected tool server {base_url} as {}", kind.server_type());

        Ok(Self {
            base_url,
            kind,
            transport,
            tools: OnceCell::new(),
        })
    }

    /// Label for the probe endpoint (`"FastMCP"`, `"FastAPI"`, …).
    pub fn server_type(&self) -> &'static str {
        self.kind.server_type()
    }

    /// The tools this server exposes. Fetched once, then served from cache.
    pub async fn list_tools(&self) -> Result<&[ToolSchema], ToolError> {
        let tools = self
            .tools
            .get_or_try_init(|| self.fetch_tools())
            .await?;

        Ok(tools.as_slice())
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolSchema>, ToolError> {
        match &self.transport {
            Transport::Mcp(service) => {
                let listed =
                    tokio::time::timeout(LIST_TOOLS_TIMEOUT, service.list_tools(Default::default()))
                        .await
                        .map_err(|_| ToolError::Discovery("tool listing timed out".to_string()))?
                        .map_err(|e| ToolError::Discovery(format!("MCP listTools failed: {e}")))?;

                Ok(listed.tools.into_iter().map(ToolSchema::from_mcp_tool).collect())
            }
            Transport::Http(client) => {
                // Handler-only deployments answer on the root URL but have
                // no listing to offer.
                if self.kind == ServerKind::HttpRoot {
                    return Ok(Vec::new());
                }

                let response = client
                    .get(format!("{}/tools", self.base_url))
                    .timeout(LIST_TOOLS_TIMEOUT)
                    .send()
                    .await
                    .map_err(|e| ToolError::Discovery(format!("GET /tools failed: {e}")))?;

                if !response.status().is_success() {
                    return Err(ToolError::Discovery(format!(
                        "GET /tools answered {}",
                        response.status()
                    )));
                }

                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| ToolError::Discovery(format!("GET /tools returned non-JSON: {e}")))?;

                Ok(parse_tool_listing(&body))
            }
        }
    }

    /// Invoke one tool and flatten its result to text.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        match &self.transport {
            Transport::Mcp(service) => {
                let params = CallToolRequestParam {
                    name: name.to_string().into(),
                    arguments: arguments.as_object().cloned(),
                };

                let result = tokio::time::timeout(CALL_TOOL_TIMEOUT, service.call_tool(params))
                    .await
                    .map_err(|_| ToolError::invocation(name, "tool call timed out"))?
                    .map_err(|e| ToolError::invocation(name, e.to_string()))?;

                let value = serde_json::to_value(&result)
                    .map_err(|e| ToolError::invocation(name, e.to_string()))?;

                flatten_mcp_result(name, &value)
            }
            Transport::Http(client) => {
                let response = client
                    .post(format!("{}/call", self.base_url))
                    .timeout(CALL_TOOL_TIMEOUT)
                    .json(&serde_json::json!({
                        "tool_name": name,
                        "arguments": arguments,
                    }))
                    .send()
                    .await
                    .map_err(|e| ToolError::invocation(name, e.to_string()))?;

                let status = response.status();

                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ToolError::invocation(
                        name,
                        format!("server answered {status}: {body}"),
                    ));
                }

                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| ToolError::invocation(name, format!("non-JSON reply: {e}")))?;

                // A missing `result` key means the whole body is the result.
                let result = body.get("result").cloned().unwrap_or(body);

                Ok(stringify_result(result))
            }
        }
    }
}

async fn sse_service(
    client: reqwest::Client,
    base_url: &str,
) -> Result<RunningService<RoleClient, ()>, ToolError> {
    let config = SseClientConfig {
        sse_endpoint: format!("{base_url}/sse").into(),
        retry_policy: Arc::new(FixedInterval::default()),
        use_message_endpoint: None,
    };

    let connect = async {
        let transport = SseClientTransport::start_with_client(client, config)
            .await
            .map_err(|e| ToolError::Discovery(format!("SSE transport failed: {e}")))?;

        ().serve(transport)
            .await
            .map_err(|e| ToolError::Discovery(format!("MCP handshake over SSE failed: {e}")))
    };

    tokio::time::timeout(CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| ToolError::Discovery("SSE connect timed out".to_string()))?
}

/// `GET /tools` bodies are either a bare array of schemas or `{"tools": […]}`.
fn parse_tool_listing(body: &Value) -> Vec<ToolSchema> {
    let entries = body
        .as_array()
        .or_else(|| body.get("tools").and_then(Value::as_array));

    entries
        .map(|entries| {
            entries
                .iter()
                .filter_map(ToolSchema::from_listing_value)
                .collect()
        })
        .unwrap_or_default()
}

/// Flatten an MCP `CallToolResult` to one string, one content item per line;
/// structured items are JSON-encoded. `isError` results become invocation
/// errors carrying the flattened text.
fn flatten_mcp_result(tool_name: &str, value: &Value) -> Result<String, ToolError> {
    let text = value
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item.get("text").and_then(Value::as_str) {
                    Some(text) => text.to_string(),
                    None => item.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if value
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let message = if text.is_empty() {
            "tool reported an error".to_string()
        } else {
            text
        };

        return Err(ToolError::invocation(tool_name, message));
    }

    Ok(text)
}

fn stringify_result(result: Value) -> String {
    match result {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_listing_accepts_array_and_wrapped_forms() {
        let bare = json!([{ "name": "a", "parameters": {} }]);
        let wrapped = json!({ "tools": [{ "name": "a", "parameters": {} }, { "name": "b" }] });

        assert_eq!(parse_tool_listing(&bare).len(), 1);
        assert_eq!(parse_tool_listing(&wrapped).len(), 2);
        assert!(parse_tool_listing(&json!({ "unrelated": true })).is_empty());
    }

    #[test]
    fn mcp_result_flattens_text_items() {
        let value = json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "text", "text": "line two" }
            ]
        });

        assert_eq!(
            flatten_mcp_result("t", &value).unwrap(),
            "line one\nline two"
        );
    }

    #[test]
    fn mcp_result_encodes_structured_items() {
        let value = json!({
            "content": [ { "type": "resource", "uri": "file:///x" } ]
        });

        let flat = flatten_mcp_result("t", &value).unwrap();
        assert!(flat.contains("file:///x"));
    }

    #[test]
    fn mcp_error_result_becomes_invocation_error() {
        let value = json!({
            "isError": true,
            "content": [ { "type": "text", "text": "no such tool" } ]
        });

        match flatten_mcp_result("bad", &value) {
            Err(ToolError::Invocation { tool_name, message }) => {
                assert_eq!(tool_name, "bad");
                assert_eq!(message, "no such tool");
            }
            other => panic!("expected invocation error, got {other:?}"),
        }
    }

    #[test]
    fn http_results_stringify_scalars_and_encode_objects() {
        assert_eq!(
            stringify_result(json!("2025-01-01T00:00:00Z")),
            "2025-01-01T00:00:00Z"
        );
        assert_eq!(stringify_result(json!(42)), "42");
        assert_eq!(stringify_result(json!({ "ok": true })), r#"{"ok":true}"#);
    }
}
