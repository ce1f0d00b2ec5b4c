use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("malformed model identifier {0:?}: expected 'provider:model'")]
    MalformedIdentifier(String),

    #[error("unknown provider {key:?}; supported providers: {}", .supported.join(", "))]
    UnknownProvider { key: String, supported: Vec<String> },

    #[error("provider {provider} failed to initialize: {message}")]
    ProviderInit { provider: String, message: String },

    #[error("provider {provider} call failed{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    ProviderCall {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("malformed tool spec: {0}")]
    MalformedToolSpec(String),

    #[error("ambiguous tool name: {0:?} is registered more than once")]
    AmbiguousToolName(String),

    #[error("model requested unknown tool {name:?} (call id {call_id})")]
    UnknownToolRequested { name: String, call_id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("stream parse error: {0}")]
    StreamParse(String),
}

impl LlmError {
    pub(crate) fn init(provider: &str, message: impl Into<String>) -> Self {
        Self::ProviderInit {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn http(provider: &str, e: reqwest::Error) -> Self {
        Self::ProviderCall {
            provider: provider.to_string(),
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    pub(crate) fn status(provider: &str, status: reqwest::StatusCode, body: String) -> Self {
        Self::ProviderCall {
            provider: provider.to_string(),
            status: Some(status.as_u16()),
            message: body,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
