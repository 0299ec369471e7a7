//! Explicit tool-server probing, backing the `/mcp-test` endpoint.

use serde::Serialize;

use crate::{error::ToolError, registry::tool_server};

/// Probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// The server answered and its tools were listed.
    Ok,
    /// Connection or listing failed.
    Error,
}

/// Report returned to the client that asked for a probe.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    /// Overall outcome.
    pub status: ProbeStatus,
    /// Detected server flavor, `"unknown"` when detection failed.
    pub server_type: &'static str,
    /// Number of tools the server exposes.
    pub tools_count: usize,
    /// Tool names, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Human-readable summary.
    pub message: String,
    /// Short error kind, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full failure detail, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Probe `url`, connecting (or reusing the cached client) and listing tools.
///
/// Unlike the chat path, detection failures are surfaced here: the caller
/// explicitly asked whether the server is reachable.
pub async fn probe(url: &str) -> ProbeReport {
    let server = match tool_server(url).await {
        Ok(server) => server,
        Err(e) => {
            log::warn!("tool server probe failed for {url}: {e}");
            return failure_report("unknown", e);
        }
    };

    match server.list_tools().await {
        Ok(tools) => {
            let names: Vec<String> = tools.iter().map(|tool| tool.name.clone()).collect();

            ProbeReport {
                status: ProbeStatus::Ok,
                server_type: server.server_type(),
                tools_count: names.len(),
                message: format!(
                    "connected to {} server exposing {} tool(s)",
                    server.server_type(),
                    names.len()
                ),
                tools: Some(names),
                error: None,
                details: None,
            }
        }
        Err(e) => {
            log::warn!("tool listing failed during probe of {url}: {e}");

            ProbeReport {
                status: ProbeStatus::Error,
                server_type: server.server_type(),
                tools_count: 0,
                tools: None,
                message: "connected, but listing tools failed".to_string(),
                error: Some(error_kind(&e).to_string()),
                details: Some(e.to_string()),
            }
        }
    }
}

fn failure_report(server_type: &'static str, e: ToolError) -> ProbeReport {
    ProbeReport {
        status: ProbeStatus::Error,
        server_type,
        tools_count: 0,
        tools: None,
        message: "could not connect to tool server".to_string(),
        error: Some(error_kind(&e).to_string()),
        details: Some(e.to_string()),
    }
}

fn error_kind(e: &ToolError) -> &'static str {
    match e {
        ToolError::Discovery(_) => "discovery_failed",
        ToolError::Invocation { .. } => "invocation_failed",
        ToolError::ProtocolUnknown { .. } => "protocol_unknown",
    }
}
