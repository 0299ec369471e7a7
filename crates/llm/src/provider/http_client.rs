use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
    time::Duration,
};

use reqwest::{Client, header};

use crate::error::LlmError;

fn default_http_client_builder() -> reqwest::ClientBuilder {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));

    // No client-level total timeout: streaming responses outlive any fixed
    // value, and per-invocation deadlines are enforced by the caller.
    Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// Shared HTTP client, keyed by proxy so providers behind different proxies
/// do not share a dispatcher. The no-proxy client still honors the
/// process-wide `HTTP_PROXY`/`HTTPS_PROXY` variables through reqwest.
pub(crate) fn http_client(proxy_url: Option<&str>) -> crate::Result<Client> {
    static CLIENTS: OnceLock<Mutex<HashMap<String, Client>>> = OnceLock::new();

    let key = proxy_url.unwrap_or_default().to_string();

    let mut clients = CLIENTS
        .get_or_init(Default::default)
        .lock()
        .expect("HTTP client cache lock poisoned");

    if let Some(client) = clients.get(&key) {
        return Ok(client.clone());
    }

    let mut builder = default_http_client_builder();

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            log::error!("invalid proxy URL {proxy_url}: {e}");
            LlmError::Transport(format!("invalid proxy URL: {e}"))
        })?;

        builder = builder.proxy(proxy);
    }

    let client = builder.build().map_err(|e| {
        log::error!("failed to build HTTP client: {e}");
        LlmError::Internal(None)
    })?;

    clients.insert(key, client.clone());

    Ok(client)
}
