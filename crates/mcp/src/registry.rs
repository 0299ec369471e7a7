//! Process-wide registry of tool-server singletons.
//!
//! Concurrent requests for the same URL share one transport; first-use
//! creation is serialized per URL so an SSE handshake happens exactly once.
//! Failed connections are not cached: the next caller probes again.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use tokio::sync::OnceCell;

use crate::{client::ToolServer, error::ToolError};

type ServerCell = Arc<OnceCell<Arc<ToolServer>>>;

fn servers() -> &'static Mutex<HashMap<String, ServerCell>> {
    static SERVERS: OnceLock<Mutex<HashMap<String, ServerCell>>> = OnceLock::new();
    SERVERS.get_or_init(Default::default)
}

/// Get or lazily create the shared client for `base_url`.
pub async fn tool_server(base_url: &str) -> Result<Arc<ToolServer>, ToolError> {
    let key = base_url.trim_end_matches('/').to_string();

    let cell = {
        let mut map = servers()
            .lock()
            .expect("tool server registry lock poisoned");
        map.entry(key.clone()).or_default().clone()
    };

    let server = cell
        .get_or_try_init(|| async {
            log::debug!("creating tool server client for {key}");
            ToolServer::connect(&key).await.map(Arc::new)
        })
        .await?;

    Ok(server.clone())
}
