use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Result alias used across the crate.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Errors of the orchestration core, with their HTTP mapping.
///
/// Tool-server failures are deliberately absent: discovery failures degrade
/// the request to a toolless conversation, invocation failures are folded
/// back into the conversation for the model to handle.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Malformed chat request: bad selector, empty message list, broken
    /// conversation structure, out-of-range options.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An upstream call exceeded its per-invocation deadline.
    #[error("upstream call timed out")]
    Timeout,

    /// Network-level failure talking to a provider.
    #[error("connection error: {0}")]
    Transport(String),

    /// The provider answered outside its documented protocol.
    #[error("provider error: {0}")]
    Protocol(String),

    /// The provider rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The provider answered 2xx with a body we could not interpret.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The model kept requesting tools past the configured iteration cap.
    #[error("tool-calling loop exceeded the limit of {limit} iteration(s)")]
    MaxIterationsExceeded {
        /// The configured `max_tool_calls`.
        limit: u32,
    },

    /// Internal failure. `Some` carries a provider message safe to show;
    /// `None` must not leak details.
    #[error("internal server error")]
    Internal(Option<String>),
}

impl LlmError {
    /// HTTP status this error surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Timeout
            | Self::Transport(_)
            | Self::Protocol(_)
            | Self::Auth(_)
            | Self::InvalidResponse(_)
            | Self::MaxIterationsExceeded { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(provider_message)) => provider_message.clone(),
            Self::Internal(None) => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.client_message(),
        };

        (status, Json(body)).into_response()
    }
}
