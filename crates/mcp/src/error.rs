use thiserror::Error;

/// Failures surfaced by tool-server interaction.
///
/// Discovery failures never abort a chat request: the caller degrades to a
/// toolless conversation. Invocation failures are folded back into the
/// conversation for the model to recover from.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Connecting to the server or listing its tools failed.
    #[error("tool discovery failed: {0}")]
    Discovery(String),

    /// A single tool call failed.
    #[error("tool '{tool_name}' failed: {message}")]
    Invocation {
        /// Name of the tool that was called.
        tool_name: String,
        /// Cause, safe to show to the model.
        message: String,
    },

    /// None of the known wire variants answered at this URL.
    #[error("could not determine tool server protocol for {url}")]
    ProtocolUnknown {
        /// The probed base URL.
        url: String,
    },
}

impl ToolError {
    pub(crate) fn invocation(tool_name: &str, message: impl Into<String>) -> Self {
        Self::Invocation {
            tool_name: tool_name.to_string(),
            message: message.into(),
        }
    }
}
