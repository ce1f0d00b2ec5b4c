//! Adapter for the OpenAI chat-completions wire format, shared by every
//! vendor exposing an OpenAI-compatible endpoint.

use crate::error::{LlmError, Result};
use crate::provider::{ChatProvider, ChatStream, RequestOptions};
use crate::sse::decode_sse;
use crate::types::{ChatMessage, ChatResponse, Choice, Role, StreamChunk, ToolCall, ToolSpec, Usage};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `Authorization: <key>`.
    RawAuthorization,
}

#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    name: &'static str,
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    auth: AuthStyle,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: &'static str,
        http: reqwest::Client,
        base_url: impl AsRef<str>,
        api_key: Option<String>,
        auth: AuthStyle,
    ) -> Self {
        Self {
            name,
            http,
            endpoint: format!("{}/chat/completions", base_url.as_ref().trim_end_matches('/')),
            api_key,
            auth,
        }
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let req = self.http.post(&self.endpoint).json(body);
        match (self.api_key.as_deref(), self.auth) {
            (Some(key), AuthStyle::Bearer) => req.bearer_auth(key),
            (Some(key), AuthStyle::RawAuthorization) => req.header(reqwest::header::AUTHORIZATION, key),
            (None, _) => req,
        }
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .post(body)
            .send()
            .await
            .map_err(|e| LlmError::http(self.name, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = self.name, %status, "chat completion rejected");
            return Err(LlmError::status(self.name, status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        self.name
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = self.name, model = %model))]
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<ChatResponse> {
        let body = request_body(model, messages, options, false)?;
        let response = self.send(&body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::http(self.name, e))?;
        let parsed: OpenAiChatResponse = serde_json::from_str(&text)?;
        parsed.try_into()
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = self.name, model = %model))]
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<ChatStream> {
        let body = request_body(model, messages, options, true)?;
        let response = self.send(&body).await?;

        let sse = Box::pin(decode_sse(self.name, response.bytes_stream()));
        let stream = futures_util::stream::unfold(
            (sse, StreamState::default()),
            |(mut sse, mut state)| async move {
                loop {
                    if let Some(chunk) = state.pending.pop() {
                        return Some((Ok(chunk), (sse, state)));
                    }
                    if state.finished {
                        return None;
                    }
                    let event = match sse.as_mut().next().await {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            state.finished = true;
                            return Some((Err(e), (sse, state)));
                        }
                        // Servers that omit `[DONE]` still end cleanly after a finish_reason.
                        None if state.finish_reason_seen => {
                            state.finished = true;
                            let usage = state.usage.unwrap_or_default();
                            return Some((Ok(StreamChunk::Done { usage }), (sse, state)));
                        }
                        None => {
                            state.finished = true;
                            return Some((
                                Err(LlmError::StreamParse(
                                    "stream closed before completion".to_string(),
                                )),
                                (sse, state),
                            ));
                        }
                    };
                    if event.data.trim() == "[DONE]" {
                        state.finished = true;
                        let usage = state.usage.unwrap_or_default();
                        return Some((Ok(StreamChunk::Done { usage }), (sse, state)));
                    }
                    match serde_json::from_str::<OpenAiStreamChunk>(&event.data) {
                        Ok(chunk) => state.absorb(chunk),
                        Err(e) => {
                            state.finished = true;
                            return Some((
                                Err(LlmError::StreamParse(format!(
                                    "chunk json error={e} data={}",
                                    event.data
                                ))),
                                (sse, state),
                            ));
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

fn request_body(
    model: &str,
    messages: &[ChatMessage],
    options: &RequestOptions,
    stream: bool,
) -> Result<serde_json::Value> {
    if let Some(t) = options.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(LlmError::InvalidInput(format!(
                "temperature must be within [0, 2], got {t}"
            )));
        }
    }

    let req = OpenAiChatRequest {
        model: model.to_string(),
        messages: messages.iter().map(to_openai_message).collect(),
        tool_choice: (!options.tools.is_empty()).then(|| "auto".to_string()),
        tools: options.tools.iter().map(to_openai_tool).collect(),
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        stream: stream.then_some(true),
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
    };

    let mut body = serde_json::to_value(&req)?;
    if let serde_json::Value::Object(map) = &mut body {
        for (k, v) in &options.extra {
            map.insert(k.clone(), v.clone());
        }
    }
    Ok(body)
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: &'static str,
    function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_openai_tool(t: &ToolSpec) -> OpenAiTool {
    OpenAiTool {
        r#type: "function",
        function: OpenAiToolFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    #[serde(default)]
    function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    // Tool results must always carry content, even when empty.
    let content = match m.role {
        Role::Tool | Role::User | Role::System => Some(m.content.clone()),
        // Content may be null only alongside tool calls.
        Role::Assistant if !m.tool_calls.is_empty() => Some(m.content.clone()).filter(|s| !s.is_empty()),
        Role::Assistant => Some(m.content.clone()),
    };
    OpenAiMessage {
        role: m.role.as_str(),
        content,
        tool_calls: m
            .tool_calls
            .iter()
            .map(|tc| OpenAiToolCall {
                id: tc.id.clone(),
                r#type: function_type(),
                function: OpenAiFunctionCall {
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                },
            })
            .collect(),
        tool_call_id: m.tool_call_id.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    index: Option<u32>,
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        if v.choices.is_empty() {
            return Err(LlmError::ResponseFormat(
                "chat completion response has no choices".to_string(),
            ));
        }
        let usage = v.usage.unwrap_or_default();

        let choices = v
            .choices
            .into_iter()
            .enumerate()
            .map(|(i, choice)| {
                let tool_calls: Vec<ToolCall> = choice
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect();
                let finish_reason = choice.finish_reason.unwrap_or_else(|| {
                    let inferred = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
                    inferred.to_string()
                });
                let mut message =
                    ChatMessage::assistant_tool_calls(choice.message.content.unwrap_or_default(), tool_calls);
                message.reasoning_content = choice.message.reasoning_content;
                Choice {
                    index: choice.index.unwrap_or(i as u32),
                    message,
                    finish_reason,
                }
            })
            .collect();

        Ok(ChatResponse {
            choices,
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            intermediate_messages: None,
            intermediate_responses: Vec::new(),
            warnings: Vec::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct StreamToolCall {
    id: Option<String>,
    name: Option<String>,
    started: bool,
}

#[derive(Debug, Default)]
struct StreamState {
    tool_calls: HashMap<u32, StreamToolCall>,
    usage: Option<Usage>,
    /// Chunks ready to emit, in reverse order.
    pending: Vec<StreamChunk>,
    finish_reason_seen: bool,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, chunk: OpenAiStreamChunk) {
        if let Some(u) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            });
        }

        let mut out = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if choice.finish_reason.is_some() {
                self.finish_reason_seen = true;
            }
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                out.push(StreamChunk::Delta { content });
            }
            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(tc.index.unwrap_or(0)).or_default();
                if entry.id.is_none() {
                    entry.id = tc.id.clone();
                }
                let function = tc.function.unwrap_or(OpenAiStreamFunction {
                    name: None,
                    arguments: None,
                });
                if entry.name.is_none() {
                    entry.name = function.name.clone();
                }
                if !entry.started {
                    if let (Some(id), Some(name)) = (entry.id.clone(), entry.name.clone()) {
                        entry.started = true;
                        out.push(StreamChunk::ToolCallStart { id, name });
                    }
                }
                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    out.push(StreamChunk::ToolCallDelta { arguments });
                }
            }
        }

        out.reverse();
        out.append(&mut self.pending);
        self.pending = out;
    }
}
