use crate::error::{LlmError, Result};
use std::fmt;
use std::str::FromStr;

/// A `provider:model` pair, e.g. `openai:gpt-4o`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    /// Lowercased provider key.
    pub provider: String,
    /// Model name exactly as given; may itself contain colons.
    pub model: String,
}

/// Splits `id` on its first colon.
pub fn parse_model_id(id: &str) -> Result<ModelId> {
    let Some((provider, model)) = id.split_once(':') else {
        return Err(LlmError::MalformedIdentifier(id.to_string()));
    };
    if provider.trim().is_empty() {
        return Err(LlmError::MalformedIdentifier(id.to_string()));
    }
    Ok(ModelId {
        provider: provider.to_ascii_lowercase(),
        model: model.to_string(),
    })
}

impl FromStr for ModelId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        parse_model_id(s)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_provider_and_model() {
        let id = parse_model_id("openai:gpt-4o").expect("valid id");
        assert_eq!(id.provider, "openai");
        assert_eq!(id.model, "gpt-4o");
    }

    #[test]
    fn splits_only_on_first_colon() {
        let id = parse_model_id("azure:foo:bar").expect("valid id");
        assert_eq!(id.provider, "azure");
        assert_eq!(id.model, "foo:bar");
    }

    #[test]
    fn lowercases_provider_but_not_model() {
        let id: ModelId = "Anthropic:Claude-3-5-Sonnet".parse().expect("valid id");
        assert_eq!(id.provider, "anthropic");
        assert_eq!(id.model, "Claude-3-5-Sonnet");
        assert_eq!(id.to_string(), "anthropic:Claude-3-5-Sonnet");
    }

    #[test]
    fn rejects_missing_colon_and_empty_provider() {
        assert!(matches!(
            parse_model_id("gpt-4o"),
            Err(LlmError::MalformedIdentifier(_))
        ));
        assert!(matches!(
            parse_model_id(":gpt-4o"),
            Err(LlmError::MalformedIdentifier(_))
        ));
    }
}
