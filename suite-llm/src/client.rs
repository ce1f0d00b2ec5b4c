use crate::error::{LlmError, Result};
use crate::identifier::parse_model_id;
use crate::provider::{ChatProvider, ChatStream, ProviderConfig, RequestOptions};
use crate::registry::{ProviderFactory, ProviderRegistry};
use crate::toolset::{ToolMode, ToolSet};
use crate::types::{ChatMessage, ChatResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Per-call options for [`Client::create`].
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Option<ToolSet>,
    /// Unset or `<= 0` returns tool calls to the caller; `> 0` executes
    /// invocable tools for up to this many provider round-trips.
    pub max_turns: Option<i32>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CompletionOptions {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn tools(mut self, tools: ToolSet) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn max_turns(mut self, max_turns: i32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self
                .tools
                .as_ref()
                .map(|t| t.specs().to_vec())
                .unwrap_or_default(),
            extra: self.extra.clone(),
        }
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    registry: ProviderRegistry,
    configs: Vec<(String, ProviderConfig)>,
}

impl ClientBuilder {
    pub fn provider_config(mut self, key: impl Into<String>, config: ProviderConfig) -> Self {
        self.configs.push((key.into(), config));
        self
    }

    pub fn register_provider(mut self, key: impl Into<String>, factory: ProviderFactory) -> Self {
        self.registry.register_factory(key, factory);
        self
    }

    pub fn register_adapter(mut self, key: impl Into<String>, adapter: Arc<dyn ChatProvider>) -> Self {
        self.registry.register_adapter(key, adapter);
        self
    }

    /// Fails with [`LlmError::UnknownProvider`] if a config names a provider
    /// the registry does not know.
    pub fn build(self) -> Result<Client> {
        let client = Client {
            registry: Arc::new(self.registry),
        };
        for (key, config) in self.configs {
            client.configure(&key, config)?;
        }
        Ok(client)
    }
}

/// Unified chat-completion client. Cheap to clone; clones share the adapter
/// cache.
#[derive(Debug, Clone)]
pub struct Client {
    registry: Arc<ProviderRegistry>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ProviderRegistry::new()),
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn with_configs(configs: HashMap<String, ProviderConfig>) -> Result<Self> {
        configs
            .into_iter()
            .fold(Self::builder(), |b, (key, cfg)| b.provider_config(key, cfg))
            .build()
    }

    /// Replaces the configuration of `key`; the next call rebuilds its adapter.
    pub fn configure(&self, key: &str, config: ProviderConfig) -> Result<()> {
        let key = key.to_ascii_lowercase();
        if !self.registry.is_supported(&key) {
            return Err(LlmError::UnknownProvider {
                key,
                supported: self.registry.supported_providers(),
            });
        }
        self.registry.configure(&key, config);
        Ok(())
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn supported_providers(&self) -> Vec<String> {
        self.registry.supported_providers()
    }

    /// Sends `messages` to the provider named by `model_id` (`provider:model`).
    ///
    /// With invocable tools and `max_turns > 0`, tool calls are executed and
    /// their results fed back until the model answers without tool calls or
    /// the turn budget is spent. Otherwise exactly one provider call is made
    /// and any tool calls are returned unexecuted.
    #[tracing::instrument(level = "info", skip_all, fields(model = %model_id))]
    pub async fn create(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<ChatResponse> {
        let id = parse_model_id(model_id)?;
        let adapter = self.registry.resolve(&id.provider)?;
        let request = options.request_options();
        let max_turns = options.max_turns.unwrap_or(0);

        if max_turns <= 0 {
            return complete_once(adapter.as_ref(), &id.model, messages, &request).await;
        }

        let tools = match options.tools {
            Some(set) if set.mode() == ToolMode::Raw && !set.is_empty() => {
                tracing::warn!(
                    max_turns,
                    tools = set.specs().len(),
                    "raw tool schemas cannot be executed; returning tool calls unexecuted"
                );
                let mut response = complete_once(adapter.as_ref(), &id.model, messages, &request).await?;
                response.warnings.push(format!(
                    "max_turns={max_turns} ignored: tools were given as raw schemas without handlers, so tool calls are returned unexecuted"
                ));
                return Ok(response);
            }
            Some(set) => set,
            None => ToolSet::from_tools(Vec::new())?,
        };

        run_tool_loop(adapter.as_ref(), &id.model, messages, &request, &tools, max_turns).await
    }

    /// Streams a single provider call. Tool calls arrive as chunks and are never
    /// executed; `max_turns > 0` is rejected.
    #[tracing::instrument(level = "info", skip_all, fields(model = %model_id))]
    pub async fn create_stream(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<ChatStream> {
        if options.max_turns.is_some_and(|t| t > 0) {
            return Err(LlmError::InvalidInput(
                "automatic tool execution (max_turns > 0) is not available when streaming".to_string(),
            ));
        }
        let id = parse_model_id(model_id)?;
        let adapter = self.registry.resolve(&id.provider)?;
        adapter
            .complete_stream(&id.model, messages, &options.request_options())
            .await
    }
}

async fn complete_once(
    adapter: &dyn ChatProvider,
    model: &str,
    messages: &[ChatMessage],
    request: &RequestOptions,
) -> Result<ChatResponse> {
    let started = Instant::now();
    let mut response = adapter.complete(model, messages, request).await?;
    extract_thinking(&mut response);
    tracing::info!(
        provider = adapter.name(),
        latency_ms = started.elapsed().as_millis() as u64,
        prompt_tokens = response.usage.prompt_tokens,
        completion_tokens = response.usage.completion_tokens,
        tool_calls = response.tool_calls().len(),
        "provider response received"
    );
    Ok(response)
}

async fn run_tool_loop(
    adapter: &dyn ChatProvider,
    model: &str,
    messages: &[ChatMessage],
    request: &RequestOptions,
    tools: &ToolSet,
    max_turns: i32,
) -> Result<ChatResponse> {
    let mut conversation = messages.to_vec();
    let mut previous = Vec::new();
    let mut turns = 0;

    loop {
        let mut response = complete_once(adapter, model, &conversation, request).await?;
        let Some(message) = response.message().cloned() else {
            return Err(LlmError::ResponseFormat(format!(
                "provider {} returned no choices",
                adapter.name()
            )));
        };
        let calls = message.tool_calls.clone();
        conversation.push(message);

        if calls.is_empty() {
            tracing::info!(turns, "tool loop finished with a final answer");
            response.intermediate_messages = Some(conversation);
            response.intermediate_responses = previous;
            return Ok(response);
        }

        // Nothing runs if any requested name lacks a handler.
        if let Some(call) = calls.iter().find(|c| tools.get(&c.name).is_none()) {
            tracing::error!(
                tool_name = %call.name,
                tool_call_id = %call.id,
                "model requested a tool that is not registered; no calls of this turn were run"
            );
            return Err(LlmError::UnknownToolRequested {
                name: call.name.clone(),
                call_id: call.id.clone(),
            });
        }
        for call in &calls {
            let result = tools.invoke(call).await?;
            conversation.push(result);
        }
        turns += 1;
        tracing::info!(turn = turns, max_turns, tool_calls = calls.len(), "tool turn completed");

        if turns >= max_turns {
            tracing::warn!(max_turns, "tool turn budget exhausted; returning last response");
            response.intermediate_messages = Some(conversation);
            response.intermediate_responses = previous;
            return Ok(response);
        }
        previous.push(response);
    }
}

/// Moves a leading `<think>...</think>` block out of assistant content into
/// `reasoning_content`.
fn extract_thinking(response: &mut ChatResponse) {
    for choice in &mut response.choices {
        let message = &mut choice.message;
        let Some(rest) = message.content.trim_start().strip_prefix("<think>") else {
            continue;
        };
        let Some((thinking, answer)) = rest.split_once("</think>") else {
            continue;
        };
        let thinking = thinking.trim().to_string();
        let answer = answer.trim().to_string();
        message.content = answer;
        if message.reasoning_content.is_none() && !thinking.is_empty() {
            message.reasoning_content = Some(thinking);
        }
    }
}
