//! Wire-variant detection for tool servers.
//!
//! Executed at most once per URL; the outcome (and the probe connection,
//! when it is reusable) is kept by the registry for the process lifetime.

use std::time::Duration;

use reqwest::header::ACCEPT;
use rmcp::{
    RoleClient, ServiceExt,
    service::RunningService,
    transport::{
        StreamableHttpClientTransport,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};

use crate::error::ToolError;

const MCP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ROOT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// The wire variant a server was detected to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerKind {
    /// MCP over streamable HTTP at `<base>/mcp`.
    StreamableHttp,
    /// MCP over server-sent events at `<base>/sse`.
    Sse,
    /// Plain HTTP/JSON: `GET /tools`, `POST /call`.
    Http,
    /// Plain HTTP/JSON deployment answering only on its root URL; assumed
    /// to serve `POST /call` without a tool listing.
    HttpRoot,
}

impl ServerKind {
    /// Label reported by the probe endpoint.
    pub(crate) fn server_type(self) -> &'static str {
        match self {
            Self::StreamableHttp | Self::Sse => "FastMCP",
            Self::Http => "FastAPI",
            Self::HttpRoot => "FastAPI (HTTP fallback)",
        }
    }
}

/// Detection outcome. A successful streamable-HTTP probe carries its
/// established session so the handshake is not repeated.
pub(crate) enum Detection {
    StreamableHttp(RunningService<RoleClient, ()>),
    Sse,
    Http,
    HttpRoot,
}

pub(crate) async fn detect(http: &reqwest::Client, base_url: &str) -> Result<Detection, ToolError> {
    // 1. MCP streamable-http handshake against <base>/mcp.
    let config = StreamableHttpClientTransportConfig::with_uri(format!("{base_url}/mcp"));
    let transport = StreamableHttpClientTransport::with_client(http.clone(), config);

    match tokio::time::timeout(MCP_PROBE_TIMEOUT, ().serve(transport)).await {
        Ok(Ok(service)) => {
            log::debug!("{base_url}: streamable-http handshake succeeded");
            return Ok(Detection::StreamableHttp(service));
        }
        Ok(Err(e)) => log::debug!("{base_url}: streamable-http probe failed: {e}"),
        Err(_) => log::debug!("{base_url}: streamable-http probe timed out"),
    }

    // 2. SSE endpoint answering with 2xx.
    let sse_probe = http
        .get(format!("{base_url}/sse"))
        .header(ACCEPT, "text/event-stream")
        .timeout(HTTP_PROBE_TIMEOUT)
        .send();

    match sse_probe.await {
        Ok(response) if response.status().is_success() => {
            log::debug!("{base_url}: SSE endpoint answered {}", response.status());
            return Ok(Detection::Sse);
        }
        Ok(response) => log::debug!("{base_url}: SSE probe answered {}", response.status()),
        Err(e) => log::debug!("{base_url}: SSE probe failed: {e}"),
    }

    // 3. Plain-HTTP tool listing.
    let tools_probe = async {
        let response = http
            .get(format!("{base_url}/tools"))
            .timeout(HTTP_PROBE_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok::<bool, reqwest::Error>(false);
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body.is_array() || body.is_object())
    };

    match tools_probe.await {
        Ok(true) => {
            log::debug!("{base_url}: /tools answered with JSON");
            return Ok(Detection::Http);
        }
        Ok(false) => log::debug!("{base_url}: /tools probe rejected"),
        Err(e) => log::debug!("{base_url}: /tools probe failed: {e}"),
    }

    // 4. Root URL fallback for handler-only deployments.
    let root_probe = http
        .get(format!("{base_url}/"))
        .timeout(ROOT_PROBE_TIMEOUT)
        .send();

    match root_probe.await {
        Ok(response) if response.status().is_success() => {
            log::debug!("{base_url}: root URL answered, assuming handler-only deployment");
            return Ok(Detection::HttpRoot);
        }
        Ok(response) => log::debug!("{base_url}: root probe answered {}", response.status()),
        Err(e) => log::debug!("{base_url}: root probe failed: {e}"),
    }

    Err(ToolError::ProtocolUnknown {
        url: base_url.to_string(),
    })
}
