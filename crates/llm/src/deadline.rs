//! Per-invocation deadline enforcement.
//!
//! Every call from the chat loop into a provider adapter races against the
//! request's `timeout_ms`. When the deadline fires first, the in-flight
//! future is dropped, which tears down its transport; the caller sees
//! [`LlmError::Timeout`]. The timer itself is always released, on every exit
//! path.

use std::time::Duration;

use crate::error::LlmError;

/// Race `fut` against `limit`, flattening the inner result.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout),
    }
}
