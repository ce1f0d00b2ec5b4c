use crate::error::{LlmError, Result};
use crate::provider::{ChatProvider, ChatStream, RequestOptions};
use crate::sse::decode_sse;
use crate::types::{ChatMessage, ChatResponse, Role, StreamChunk, ToolCall, ToolSpec, Usage};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, base_url: impl AsRef<str>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            endpoint: format!("{}/v1/messages", base_url.as_ref().trim_end_matches('/')),
        }
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::http(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = PROVIDER, %status, "messages request rejected");
            return Err(LlmError::status(PROVIDER, status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = PROVIDER, model = %model))]
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
            .map_err(|e| LlmError::http(PROVIDER, e))?;
        let parsed: AnthropicResponse = serde_json::from_str(&text)?;
        parsed.try_into()
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = PROVIDER, model = %model))]
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<ChatStream> {
        let body = request_body(model, messages, options, true)?;
        let response = self.send(&body).await?;

        let sse = Box::pin(decode_sse(PROVIDER, response.bytes_stream()));
        let stream = futures_util::stream::unfold(
            (sse, Usage::default(), false),
            |(mut sse, mut usage, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    let event = match sse.as_mut().next().await {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => return Some((Err(e), (sse, usage, true))),
                        None => {
                            return Some((
                                Err(LlmError::StreamParse(
                                    "stream closed before message_stop".to_string(),
                                )),
                                (sse, usage, true),
                            ));
                        }
                    };

                    match event.event.as_str() {
                        "message_start" => {
                            if let Ok(v) = serde_json::from_str::<MessageStart>(&event.data) {
                                usage.prompt_tokens = v.message.usage.input_tokens;
                                usage.completion_tokens = v.message.usage.output_tokens;
                            }
                        }
                        "content_block_start" => {
                            if let Ok(v) = serde_json::from_str::<ContentBlockStart>(&event.data) {
                                if let ContentBlock::ToolUse { id, name, .. } = v.content_block {
                                    return Some((
                                        Ok(StreamChunk::ToolCallStart { id, name }),
                                        (sse, usage, false),
                                    ));
                                }
                            }
                        }
                        "content_block_delta" => {
                            let v: ContentBlockDelta = match serde_json::from_str(&event.data) {
                                Ok(v) => v,
                                Err(e) => {
                                    return Some((
                                        Err(LlmError::StreamParse(format!(
                                            "anthropic delta json error={e} data={}",
                                            event.data
                                        ))),
                                        (sse, usage, true),
                                    ));
                                }
                            };
                            let chunk = match v.delta {
                                Delta::TextDelta { text } if !text.is_empty() => {
                                    StreamChunk::Delta { content: text }
                                }
                                Delta::InputJsonDelta { partial_json } if !partial_json.is_empty() => {
                                    StreamChunk::ToolCallDelta {
                                        arguments: partial_json,
                                    }
                                }
                                _ => continue,
                            };
                            return Some((Ok(chunk), (sse, usage, false)));
                        }
                        "message_delta" => {
                            if let Ok(v) = serde_json::from_str::<MessageDelta>(&event.data) {
                                if let Some(u) = v.usage {
                                    if u.input_tokens > 0 {
                                        usage.prompt_tokens = u.input_tokens;
                                    }
                                    usage.completion_tokens = u.output_tokens;
                                }
                            }
                        }
                        "message_stop" => {
                            return Some((Ok(StreamChunk::Done { usage }), (sse, usage, true)));
                        }
                        "error" => {
                            return Some((
                                Err(LlmError::ProviderCall {
                                    provider: PROVIDER.to_string(),
                                    status: None,
                                    message: event.data,
                                }),
                                (sse, usage, true),
                            ));
                        }
                        _ => {}
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
        if !(0.0..=1.0).contains(&t) {
            return Err(LlmError::InvalidInput(format!(
                "temperature must be within [0, 1], got {t}"
            )));
        }
    }

    let (system, messages) = convert_messages(messages);
    let req = AnthropicRequest {
        model: model.to_string(),
        max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        messages,
        tools: options.tools.iter().map(to_anthropic_tool).collect(),
        temperature: options.temperature,
        stream: stream.then_some(true),
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
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

fn to_anthropic_tool(t: &ToolSpec) -> AnthropicTool {
    AnthropicTool {
        name: t.name.clone(),
        description: t.description.clone(),
        input_schema: t.parameters.clone(),
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Unsupported,
}

/// System messages are hoisted into the top-level `system` field; consecutive
/// tool results share one user turn, as do user messages separated only by an
/// empty assistant message.
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system = String::new();
    let mut out: Vec<AnthropicMessage> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(m.content.trim());
            }
            Role::User => {
                let block = ContentBlock::Text {
                    text: m.content.clone(),
                };
                match out.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last.content.iter().all(|b| matches!(b, ContentBlock::Text { .. })) =>
                    {
                        last.content.push(block)
                    }
                    _ => out.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.trim().is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: m.content.clone(),
                    });
                }
                for tc in &m.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: tc
                            .parsed_arguments()
                            .unwrap_or_else(|_| serde_json::json!({})),
                    });
                }
                // Empty assistant turns are rejected by the API; the
                // surrounding user turns are merged instead.
                if blocks.is_empty() {
                    continue;
                }
                out.push(AnthropicMessage {
                    role: "assistant",
                    content: blocks,
                });
            }
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                    content: m.content.clone(),
                };
                let previous_is_tool_turn = out.last().is_some_and(|last| {
                    last.role == "user"
                        && last
                            .content
                            .iter()
                            .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
                });
                match out.last_mut() {
                    Some(last) if previous_is_tool_turn => last.content.push(block),
                    _ => out.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }
    }

    ((!system.is_empty()).then_some(system), out)
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn normalize_stop_reason(reason: Option<&str>) -> String {
    match reason {
        Some("end_turn") | Some("stop_sequence") | None => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        Some(other) => other,
    }
    .to_string()
}

impl TryFrom<AnthropicResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: AnthropicResponse) -> Result<Self> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for block in v.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: serde_json::to_string(&input)?,
                }),
                ContentBlock::ToolResult { .. } | ContentBlock::Unsupported => {}
            }
        }

        Ok(ChatResponse::from_message(
            ChatMessage::assistant_tool_calls(content, tool_calls),
            normalize_stop_reason(v.stop_reason.as_deref()),
            Usage {
                prompt_tokens: v.usage.input_tokens,
                completion_tokens: v.usage.output_tokens,
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartMessage,
}

#[derive(Debug, Deserialize)]
struct MessageStartMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlock,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn system_messages_are_hoisted_and_tool_results_grouped() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("weather in Paris and Oslo?"),
            ChatMessage::assistant_tool_calls(
                "",
                vec![
                    ToolCall {
                        id: "t1".to_string(),
                        name: "get_weather".to_string(),
                        arguments: r#"{"location":"Paris"}"#.to_string(),
                    },
                    ToolCall {
                        id: "t2".to_string(),
                        name: "get_weather".to_string(),
                        arguments: r#"{"location":"Oslo"}"#.to_string(),
                    },
                ],
            ),
            ChatMessage::tool_result("t1", "get_weather", "18C"),
            ChatMessage::tool_result("t2", "get_weather", "4C"),
        ];

        let (system, out) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].role, "assistant");
        assert_eq!(out[1].content.len(), 2);
        assert_eq!(out[2].role, "user");
        assert_eq!(out[2].content.len(), 2);
        assert!(matches!(
            &out[2].content[1],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "t2"
        ));
    }

    #[test]
    fn stop_reasons_are_normalized() {
        assert_eq!(normalize_stop_reason(Some("end_turn")), "stop");
        assert_eq!(normalize_stop_reason(Some("max_tokens")), "length");
        assert_eq!(normalize_stop_reason(Some("tool_use")), "tool_calls");
        assert_eq!(normalize_stop_reason(Some("refusal")), "refusal");
    }

    #[tokio::test]
    async fn complete_maps_tool_use_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-3-5-sonnet",
                "max_tokens": 4096,
                "system": "be brief",
                "tools": [{ "name": "get_weather", "input_schema": { "type": "object" } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    { "type": "text", "text": "Checking." },
                    { "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": { "location": "Paris" } }
                ],
                "stop_reason": "tool_use",
                "usage": { "input_tokens": 40, "output_tokens": 9 }
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(reqwest::Client::new(), "sk-ant", server.uri());
        let options = RequestOptions {
            tools: vec![ToolSpec {
                name: "get_weather".to_string(),
                description: "Gets the weather".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            }],
            ..RequestOptions::default()
        };
        let resp = provider
            .complete(
                "claude-3-5-sonnet",
                &[ChatMessage::system("be brief"), ChatMessage::user("weather?")],
                &options,
            )
            .await
            .expect("completion succeeds");

        assert_eq!(resp.choices[0].finish_reason, "tool_calls");
        assert_eq!(resp.choices[0].message.content, "Checking.");
        let calls = resp.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(
            calls[0].parsed_arguments().expect("json args"),
            json!({ "location": "Paris" })
        );
        assert_eq!(resp.usage.prompt_tokens, 40);
    }

    #[tokio::test]
    async fn stream_emits_text_and_done() {
        let server = MockServer::start().await;
        let body = [
            "event: message_start\ndata: {\"message\":{\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}",
            "event: message_delta\ndata: {\"usage\":{\"output_tokens\":3}}",
            "event: message_stop\ndata: {}",
        ]
        .join("\n\n")
            + "\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(reqwest::Client::new(), "sk-ant", server.uri());
        let chunks: Vec<StreamChunk> = provider
            .complete_stream("claude-3-5-sonnet", &[ChatMessage::user("hi")], &RequestOptions::default())
            .await
            .expect("stream opens")
            .map(|c| c.expect("chunk"))
            .collect()
            .await;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::Delta { content: "Hi".to_string() },
                StreamChunk::Done {
                    usage: Usage {
                        prompt_tokens: 5,
                        completion_tokens: 3
                    }
                },
            ]
        );
    }

    #[test]
    fn empty_assistant_turns_are_dropped_and_user_turns_merged() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant(""),
            ChatMessage::user("again"),
        ];

        let (_, out) = convert_messages(&messages);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, "user");
        assert_eq!(out[0].content.len(), 2);
        assert!(out.iter().all(|m| !m.content.is_empty()));
    }

    #[tokio::test]
    async fn stream_closed_before_message_stop_is_an_error() {
        let server = MockServer::start().await;
        let body = [
            "event: message_start\ndata: {\"message\":{\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}",
        ]
        .join("\n\n")
            + "\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(reqwest::Client::new(), "sk-ant", server.uri());
        let items: Vec<Result<StreamChunk>> = provider
            .complete_stream("claude-3-5-sonnet", &[ChatMessage::user("hi")], &RequestOptions::default())
            .await
            .expect("stream opens")
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(StreamChunk::Delta { content }) if content == "Hi"));
        assert!(matches!(&items[1], Err(LlmError::StreamParse(_))));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let options = RequestOptions {
            temperature: Some(1.5),
            ..RequestOptions::default()
        };
        assert!(matches!(
            request_body("claude-3-5-sonnet", &[], &options, false),
            Err(LlmError::InvalidInput(_))
        ));
    }
}
