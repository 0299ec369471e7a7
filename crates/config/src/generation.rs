//! Per-request generation options.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8_192;
const DEFAULT_MAX_TOOL_CALLS: u32 = 5;

/// Options a chat request may carry. Every field has a default, so an absent
/// or empty `options` object yields a fully usable configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Delivery mode: `true` streams the terminal answer, `false` returns a
    /// single completed value.
    pub stream: bool,

    /// Deadline applied to each individual upstream model invocation, in
    /// milliseconds. The tool-calling loop may take several invocations.
    pub timeout_ms: u64,

    /// Upper bound on tokens the model may generate per turn.
    pub max_output_tokens: u32,

    /// Sampling temperature, 0.0 to 2.0.
    pub temperature: f32,

    /// Nucleus sampling cutoff, 0.0 to 1.0.
    pub top_p: f32,

    /// Presence penalty, -2.0 to 2.0. Dropped by providers that do not
    /// support it.
    pub presence_penalty: f32,

    /// Frequency penalty, -2.0 to 2.0. Dropped by providers that do not
    /// support it.
    pub frequency_penalty: f32,

    /// Base URL of a tool server. When absent, no tools are offered to the
    /// model.
    pub mcp_server_url: Option<String>,

    /// System prompt injected the way each provider family expects.
    pub system_prompt: Option<String>,

    /// Hard cap on tool-dispatch iterations of the chat loop.
    pub max_tool_calls: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            stream: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: 1.0,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            mcp_server_url: None,
            system_prompt: None,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
        }
    }
}

impl GenerationConfig {
    /// Deadline for one upstream model invocation.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check that every numeric option is inside its documented range.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            ));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(format!("top_p must be between 0 and 1, got {}", self.top_p));
        }

        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(format!(
                "presence_penalty must be between -2 and 2, got {}",
                self.presence_penalty
            ));
        }

        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(format!(
                "frequency_penalty must be between -2 and 2, got {}",
                self.frequency_penalty
            ));
        }

        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GenerationConfig::default();

        assert!(config.stream);
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.max_output_tokens, 8_192);
        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.top_p, 1.0);
        assert_eq!(config.presence_penalty, 0.0);
        assert_eq!(config.frequency_penalty, 0.0);
        assert_eq!(config.max_tool_calls, 5);
        assert!(config.mcp_server_url.is_none());
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn empty_object_deserializes_to_defaults() {
        let config: GenerationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.timeout_ms, 60_000);
        assert!(config.stream);
    }

    #[test]
    fn partial_options_keep_remaining_defaults() {
        let config: GenerationConfig =
            serde_json::from_str(r#"{"stream": false, "max_tool_calls": 2}"#).unwrap();

        assert!(!config.stream);
        assert_eq!(config.max_tool_calls, 2);
        assert_eq!(config.max_output_tokens, 8_192);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = GenerationConfig::default();
        assert!(config.validate().is_ok());

        config.temperature = 2.5;
        assert!(config.validate().is_err());

        config.temperature = 1.0;
        config.top_p = -0.1;
        assert!(config.validate().is_err());

        config.top_p = 1.0;
        config.frequency_penalty = 3.0;
        assert!(config.validate().is_err());
    }
}
