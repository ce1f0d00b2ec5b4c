use crate::anthropic::AnthropicProvider;
use crate::error::{LlmError, Result};
use crate::openai::{AuthStyle, OpenAiCompatibleProvider};
use crate::types::{ChatMessage, ChatResponse, StreamChunk, ToolSpec};
use async_trait::async_trait;
use futures_util::Stream;
use serde::Deserialize;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Per-request parameters handed to an adapter.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolSpec>,
    /// Vendor-specific fields, copied verbatim into the request body.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The chat-completion capability every provider adapter implements.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<ChatResponse>;

    async fn complete_stream(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _options: &RequestOptions,
    ) -> Result<ChatStream> {
        Err(LlmError::InvalidInput(format!(
            "provider {} does not support streaming",
            self.name()
        )))
    }
}

/// Construction parameters for one provider. Unset fields fall back to the
/// provider's environment variables and defaults.
#[derive(Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Providers known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Azure,
    Groq,
    Mistral,
    Together,
    Xai,
    Fireworks,
    Sambanova,
    Nebius,
    Cerebras,
    HuggingFace,
    Cohere,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 14] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Azure,
        ProviderKind::Groq,
        ProviderKind::Mistral,
        ProviderKind::Together,
        ProviderKind::Xai,
        ProviderKind::Fireworks,
        ProviderKind::Sambanova,
        ProviderKind::Nebius,
        ProviderKind::Cerebras,
        ProviderKind::HuggingFace,
        ProviderKind::Cohere,
        ProviderKind::Ollama,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Azure => "azure",
            ProviderKind::Groq => "groq",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Together => "together",
            ProviderKind::Xai => "xai",
            ProviderKind::Fireworks => "fireworks",
            ProviderKind::Sambanova => "sambanova",
            ProviderKind::Nebius => "nebius",
            ProviderKind::Cerebras => "cerebras",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Azure => Some("AZURE_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::Mistral => Some("MISTRAL_API_KEY"),
            ProviderKind::Together => Some("TOGETHER_API_KEY"),
            ProviderKind::Xai => Some("XAI_API_KEY"),
            ProviderKind::Fireworks => Some("FIREWORKS_API_KEY"),
            ProviderKind::Sambanova => Some("SAMBANOVA_API_KEY"),
            ProviderKind::Nebius => Some("NEBIUS_API_KEY"),
            ProviderKind::Cerebras => Some("CEREBRAS_API_KEY"),
            ProviderKind::HuggingFace => Some("HF_TOKEN"),
            ProviderKind::Cohere => Some("CO_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    fn base_url_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::Azure => Some("AZURE_BASE_URL"),
            ProviderKind::Ollama => Some("OLLAMA_API_URL"),
            _ => None,
        }
    }

    fn default_base_url(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com"),
            ProviderKind::Azure => None,
            ProviderKind::Groq => Some("https://api.groq.com/openai/v1"),
            ProviderKind::Mistral => Some("https://api.mistral.ai/v1"),
            ProviderKind::Together => Some("https://api.together.xyz/v1"),
            ProviderKind::Xai => Some("https://api.x.ai/v1"),
            ProviderKind::Fireworks => Some("https://api.fireworks.ai/inference/v1"),
            ProviderKind::Sambanova => Some("https://api.sambanova.ai/v1"),
            ProviderKind::Nebius => Some("https://api.studio.nebius.ai/v1"),
            ProviderKind::Cerebras => Some("https://api.cerebras.ai/v1"),
            ProviderKind::HuggingFace => Some("https://router.huggingface.co/v1"),
            ProviderKind::Cohere => Some("https://api.cohere.ai/compatibility/v1"),
            ProviderKind::Ollama => Some("http://localhost:11434/v1"),
        }
    }

    /// Whether a credential is available from `config` or the environment.
    pub fn has_credentials(self, config: Option<&ProviderConfig>) -> bool {
        let Some(env) = self.api_key_env() else {
            return true;
        };
        config
            .and_then(|c| c.api_key.as_deref())
            .is_some_and(|k| !k.trim().is_empty())
            || env_value(env).is_some()
    }

    /// Builds the adapter for this provider.
    #[tracing::instrument(level = "debug", skip_all, fields(provider = self.key()))]
    pub fn build(
        self,
        config: &ProviderConfig,
        http: &reqwest::Client,
    ) -> Result<Arc<dyn ChatProvider>> {
        let key = self.key();
        let api_key = match self.api_key_env() {
            Some(env) => Some(
                config
                    .api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| env_value(env))
                    .ok_or_else(|| {
                        LlmError::init(
                            key,
                            format!(
                                "API key is missing; set it in the provider config or the {env} environment variable"
                            ),
                        )
                    })?,
            ),
            None => config.api_key.clone(),
        };

        let base_url = config
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.base_url_env().and_then(env_value))
            .or_else(|| self.default_base_url().map(str::to_string))
            .ok_or_else(|| {
                LlmError::init(
                    key,
                    format!(
                        "base_url is required; set it in the provider config or the {} environment variable",
                        self.base_url_env().unwrap_or("provider base URL")
                    ),
                )
            })?;

        let http = match config.timeout() {
            Some(timeout) => reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| LlmError::init(key, e.to_string()))?,
            None => http.clone(),
        };

        tracing::debug!(provider = key, base_url = %base_url, "provider adapter constructed");
        let adapter: Arc<dyn ChatProvider> = match self {
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
                http,
                api_key.unwrap_or_default(),
                base_url,
            )),
            ProviderKind::Azure => Arc::new(OpenAiCompatibleProvider::new(
                key,
                http,
                base_url,
                api_key,
                AuthStyle::RawAuthorization,
            )),
            _ => Arc::new(OpenAiCompatibleProvider::new(
                key,
                http,
                base_url,
                api_key,
                AuthStyle::Bearer,
            )),
        };
        Ok(adapter)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_its_key() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(ProviderKind::from_key("nope"), None);
    }

    #[test]
    fn explicit_key_builds_adapter() {
        let cfg = ProviderConfig::with_api_key("sk-test");
        let adapter = ProviderKind::Groq
            .build(&cfg, &reqwest::Client::new())
            .expect("adapter builds");
        assert_eq!(adapter.name(), "groq");
    }

    #[test]
    fn cohere_uses_its_compatibility_endpoint() {
        assert_eq!(ProviderKind::from_key("cohere"), Some(ProviderKind::Cohere));
        assert_eq!(ProviderKind::Cohere.api_key_env(), Some("CO_API_KEY"));
        assert_eq!(
            ProviderKind::Cohere.default_base_url(),
            Some("https://api.cohere.ai/compatibility/v1")
        );

        let adapter = ProviderKind::Cohere
            .build(&ProviderConfig::with_api_key("co-test"), &reqwest::Client::new())
            .expect("adapter builds");
        assert_eq!(adapter.name(), "cohere");
    }

    #[test]
    fn keyless_provider_builds_without_credentials() {
        let adapter = ProviderKind::Ollama
            .build(&ProviderConfig::default(), &reqwest::Client::new())
            .expect("adapter builds");
        assert_eq!(adapter.name(), "ollama");
        assert!(ProviderKind::Ollama.has_credentials(None));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let cfg = ProviderConfig::with_api_key("sk-secret").base_url("http://localhost");
        let out = format!("{cfg:?}");
        assert!(!out.contains("sk-secret"));
        assert!(out.contains("<redacted>"));
    }
}
