use serde_json::json;
use suite_llm::{
    ChatMessage, Client, CompletionOptions, FunctionTool, ParamType, ProviderConfig, Role, ToolSet,
    ToolSpec,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn weather_tools() -> ToolSet {
    let spec = ToolSpec::builder("get_weather")
        .description("Current weather for a city")
        .required("location", ParamType::String, "City name")
        .build()
        .expect("valid spec");
    let tool = FunctionTool::new(spec, |args| async move {
        Ok(json!({ "location": args["location"], "forecast": "sunny" }))
    });
    ToolSet::from_tools(vec![tool.into_arc()]).expect("tool set")
}

async fn openai_client(server: &MockServer) -> Client {
    Client::builder()
        .provider_config(
            "openai",
            ProviderConfig::with_api_key("sk-test").base_url(format!("{}/v1", server.uri())),
        )
        .build()
        .expect("client builds")
}

#[tokio::test]
async fn tool_call_round_trip_over_http() {
    let server = MockServer::start().await;

    // Second request carries the tool result.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("call_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "It is sunny in Paris." },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 40, "completion_tokens": 7 }
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": { "name": "get_weather", "arguments": "{\"location\":\"Paris\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 20, "completion_tokens": 12 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = openai_client(&server).await;
    let messages = vec![ChatMessage::user("What's the weather in Paris?")];
    let response = client
        .create(
            "openai:gpt-4o",
            &messages,
            CompletionOptions::default()
                .tools(weather_tools())
                .max_turns(2),
        )
        .await
        .expect("completes");

    assert_eq!(
        response.message().map(|m| m.content.as_str()),
        Some("It is sunny in Paris.")
    );
    let history = response.intermediate_messages.expect("history");
    assert_eq!(history.len(), messages.len() + 3);
    assert_eq!(history[2].role, Role::Tool);
    assert!(history[2].content.contains("sunny"));
}

#[tokio::test]
async fn provider_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let client = openai_client(&server).await;
    let err = client
        .create(
            "openai:gpt-4o",
            &[ChatMessage::user("hi")],
            CompletionOptions::default().tools(weather_tools()).max_turns(3),
        )
        .await
        .expect_err("provider failure");

    match err {
        suite_llm::LlmError::ProviderCall { status, message, .. } => {
            assert_eq!(status, Some(500));
            assert_eq!(message, "upstream exploded");
        }
        other => panic!("unexpected error: {other}"),
    }
}
