//! Provider registry resolved from the process environment.
//!
//! Providers are declared with `<PROVIDER>_API_KEY`, `<PROVIDER>_MODEL_LIST`
//! (comma-separated) and an optional `<PROVIDER>_PROXY_URL`. The registry is
//! built once at startup; request handlers only read it.

use secrecy::SecretString;

const API_KEY_SUFFIX: &str = "_API_KEY";
const MODEL_LIST_SUFFIX: &str = "_MODEL_LIST";
const PROXY_URL_SUFFIX: &str = "_PROXY_URL";

/// The wire-shape family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// Google Gemini `generateContent` shape.
    Gemini,
    /// Ollama `/api/chat` shape with NDJSON streaming.
    Ollama,
    /// Any OpenAI-compatible `chat/completions` endpoint.
    OpenAiCompatible,
}

/// Providers this build knows how to talk to, with their wire family and
/// default endpoint. Anything else found in the environment is ignored with
/// a warning; there is no env var to inject a base URL.
const KNOWN_PROVIDERS: &[(&str, ProviderFamily, &str)] = &[
    (
        "gemini",
        ProviderFamily::Gemini,
        "https://generativelanguage.googleapis.com/v1beta",
    ),
    ("ollama", ProviderFamily::Ollama, "http://localhost:11434"),
    (
        "openai",
        ProviderFamily::OpenAiCompatible,
        "https://api.openai.com/v1",
    ),
    (
        "deepseek",
        ProviderFamily::OpenAiCompatible,
        "https://api.deepseek.com/v1",
    ),
    (
        "qwen",
        ProviderFamily::OpenAiCompatible,
        "https://dashscope.aliyuncs.com/compatible-mode/v1",
    ),
    (
        "moonshot",
        ProviderFamily::OpenAiCompatible,
        "https://api.moonshot.cn/v1",
    ),
];

/// Resolved configuration for one upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Lowercased provider name, the left side of a `provider:model`
    /// selector.
    pub name: String,
    /// Wire family this provider speaks.
    pub family: ProviderFamily,
    /// Endpoint base URL.
    pub base_url: String,
    /// API key. `None` (the literal string) is only accepted for Ollama,
    /// which needs no key.
    pub api_key: SecretString,
    /// Optional per-provider outbound proxy.
    pub proxy_url: Option<String>,
    /// Models this provider advertises in the model list.
    pub models: Vec<String>,
}

/// One entry of the model-discovery endpoint.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModelOption {
    /// `provider:model` selector accepted by the chat endpoint.
    pub value: String,
    /// Human-readable label.
    pub label: String,
    /// Provider name.
    pub provider: String,
}

/// All providers resolved from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    /// Resolve the registry from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Resolve the registry from an explicit variable set.
    pub fn from_vars(vars: impl Iterator<Item = (String, String)>) -> Self {
        let vars: Vec<(String, String)> = vars.collect();

        let lookup = |name: &str| -> Option<&str> {
            vars.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let mut providers = Vec::new();

        for (key, api_key) in &vars {
            let Some(prefix) = key.strip_suffix(API_KEY_SUFFIX) else {
                continue;
            };

            if prefix.is_empty() {
                continue;
            }

            let name = prefix.to_ascii_lowercase();

            if api_key == "None" && !name.eq_ignore_ascii_case("ollama") {
                log::warn!("provider {name} has no API key configured, skipping");
                continue;
            }

            let Some(&(_, family, base_url)) = KNOWN_PROVIDERS
                .iter()
                .find(|(known, _, _)| *known == name)
            else {
                log::warn!("unrecognized provider {name} in environment, skipping");
                continue;
            };

            let models: Vec<String> = lookup(&format!("{prefix}{MODEL_LIST_SUFFIX}"))
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|model| !model.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            if models.is_empty() {
                log::warn!("provider {name} declares no models");
            }

            let proxy_url = lookup(&format!("{prefix}{PROXY_URL_SUFFIX}")).map(str::to_string);

            providers.push(ProviderConfig {
                name,
                family,
                base_url: base_url.to_string(),
                api_key: SecretString::from(api_key.clone()),
                proxy_url,
                models,
            });
        }

        providers.sort_by(|a, b| a.name.cmp(&b.name));

        Self { providers }
    }

    /// Look up a provider by its lowercased name.
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|provider| provider.name == name)
    }

    /// All resolved providers, ordered by name.
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Whether any provider was resolved.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Entries for the model-discovery endpoint, ordered by provider then
    /// model so the client dropdown is stable across restarts.
    pub fn model_options(&self) -> Vec<ModelOption> {
        let mut options = Vec::new();

        for provider in &self.providers {
            let mut models = provider.models.clone();
            models.sort();

            for model in models {
                options.push(ModelOption {
                    value: format!("{}:{}", provider.name, model),
                    label: model,
                    provider: provider.name.clone(),
                });
            }
        }

        options
    }
}
