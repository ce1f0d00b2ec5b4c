use crate::error::{LlmError, Result};
use crate::tool::{Tool, validate_tool_name};
use crate::types::{ChatMessage, ToolCall, ToolSpec};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    /// Schemas only; calls are returned to the caller.
    Raw,
    /// Schemas with local handlers; eligible for automatic execution.
    Invocable,
}

/// Tools normalized for one request: schemas for the provider plus, in
/// invocable mode, the handler for each name.
#[derive(Clone)]
pub struct ToolSet {
    mode: ToolMode,
    specs: Vec<ToolSpec>,
    handlers: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("mode", &self.mode)
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolSet {
    /// Accepts OpenAI-style `{"type":"function","function":{..}}` entries or
    /// flat `{name, description, parameters}` objects.
    pub fn from_raw(schemas: Vec<serde_json::Value>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(schemas.len());
        for (i, schema) in schemas.into_iter().enumerate() {
            let spec = raw_to_spec(i, schema)?;
            if !seen.insert(spec.name.clone()) {
                return Err(LlmError::MalformedToolSpec(format!(
                    "tool name {:?} appears more than once",
                    spec.name
                )));
            }
            specs.push(spec);
        }
        Ok(Self {
            mode: ToolMode::Raw,
            specs,
            handlers: HashMap::new(),
        })
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut specs = Vec::with_capacity(tools.len());
        let mut handlers = HashMap::with_capacity(tools.len());
        for tool in tools {
            let spec = tool.spec();
            validate_tool_name(&spec.name)?;
            validate_parameters(&spec.name, &spec.parameters)?;
            if handlers.contains_key(&spec.name) {
                return Err(LlmError::AmbiguousToolName(spec.name));
            }
            handlers.insert(spec.name.clone(), tool);
            specs.push(spec);
        }
        Ok(Self {
            mode: ToolMode::Invocable,
            specs,
            handlers,
        })
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.handlers.get(name)
    }

    /// Runs one tool call and returns its result message. Handler failures and
    /// unparsable arguments become an `{"error": ..}` payload; only a name
    /// with no handler is an error.
    #[tracing::instrument(level = "info", skip_all, fields(tool_name = %call.name, tool_call_id = %call.id))]
    pub async fn invoke(&self, call: &ToolCall) -> Result<ChatMessage> {
        let Some(tool) = self.handlers.get(&call.name) else {
            tracing::error!(tool_name = %call.name, "model requested a tool that is not registered");
            return Err(LlmError::UnknownToolRequested {
                name: call.name.clone(),
                call_id: call.id.clone(),
            });
        };

        let args = match call.parsed_arguments() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "tool arguments are not valid json");
                return Ok(error_result(call, format!("invalid tool arguments: {e}")));
            }
        };

        let started = Instant::now();
        match tool.execute(args).await {
            Ok(out) => {
                let content = out.to_string();
                tracing::info!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    output_len = content.len(),
                    "tool call executed"
                );
                Ok(ChatMessage::tool_result(&call.id, &call.name, content))
            }
            Err(e) => {
                tracing::warn!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "tool call failed"
                );
                Ok(error_result(call, e.to_string()))
            }
        }
    }
}

fn error_result(call: &ToolCall, message: String) -> ChatMessage {
    ChatMessage::tool_result(
        &call.id,
        &call.name,
        serde_json::json!({ "error": message }).to_string(),
    )
}

fn raw_to_spec(index: usize, schema: serde_json::Value) -> Result<ToolSpec> {
    let serde_json::Value::Object(mut obj) = schema else {
        return Err(LlmError::MalformedToolSpec(format!(
            "tool #{index} must be a JSON object"
        )));
    };

    if obj.get("type").and_then(|t| t.as_str()) == Some("function") {
        match obj.remove("function") {
            Some(serde_json::Value::Object(inner)) => obj = inner,
            _ => {
                return Err(LlmError::MalformedToolSpec(format!(
                    "tool #{index} has type \"function\" but no function object"
                )));
            }
        }
    }

    let name = match obj.get("name") {
        Some(serde_json::Value::String(s)) => s.clone(),
        _ => {
            return Err(LlmError::MalformedToolSpec(format!(
                "tool #{index} is missing a string name"
            )));
        }
    };
    validate_tool_name(&name)?;

    let description = match obj.get("description") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(LlmError::MalformedToolSpec(format!(
                "tool {name:?} description must be a string"
            )));
        }
    };

    let parameters = obj
        .remove("parameters")
        .unwrap_or_else(|| serde_json::json!({ "type": "object", "properties": {} }));
    validate_parameters(&name, &parameters)?;

    Ok(ToolSpec {
        name,
        description,
        parameters,
    })
}

/// Parameters must be an object schema whose properties each declare a type
/// and whose `required` names only declared properties.
fn validate_parameters(tool: &str, parameters: &serde_json::Value) -> Result<()> {
    let malformed =
        |msg: String| -> Result<()> { Err(LlmError::MalformedToolSpec(format!("tool {tool:?}: {msg}"))) };

    let Some(obj) = parameters.as_object() else {
        return malformed("parameters must be a JSON object".to_string());
    };
    match obj.get("type").and_then(|t| t.as_str()) {
        Some("object") => {}
        other => return malformed(format!("parameters type must be \"object\", got {other:?}")),
    }

    let properties = match obj.get("properties") {
        None => serde_json::Map::new(),
        Some(serde_json::Value::Object(p)) => p.clone(),
        Some(_) => return malformed("properties must be a JSON object".to_string()),
    };
    for (key, prop) in &properties {
        let Some(prop) = prop.as_object() else {
            return malformed(format!("property {key:?} must be a JSON object"));
        };
        let typed = ["type", "enum", "anyOf", "oneOf", "allOf", "$ref"]
            .iter()
            .any(|k| prop.contains_key(*k));
        if !typed {
            return malformed(format!("property {key:?} declares no type"));
        }
    }

    match obj.get("required") {
        None => {}
        Some(serde_json::Value::Array(names)) => {
            for n in names {
                let Some(n) = n.as_str() else {
                    return malformed("required entries must be strings".to_string());
                };
                if !properties.contains_key(n) {
                    return malformed(format!("required parameter {n:?} is not declared"));
                }
            }
        }
        Some(_) => return malformed("required must be an array".to_string()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FunctionTool, ParamType, ToolError};
    use serde_json::json;

    fn echo_tool(name: &str) -> Arc<dyn Tool> {
        let spec = ToolSpec::builder(name)
            .description("Echoes its input")
            .required("text", ParamType::String, "Text to echo")
            .build()
            .expect("valid spec");
        FunctionTool::new(spec, |args| async move { Ok(args) }).into_arc()
    }

    fn failing_tool() -> Arc<dyn Tool> {
        let spec = ToolSpec::builder("explode").build().expect("valid spec");
        FunctionTool::new(spec, |_| async move {
            Err(ToolError::ExecutionFailed("boom".to_string()))
        })
        .into_arc()
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn raw_accepts_openai_and_flat_shapes() {
        let set = ToolSet::from_raw(vec![
            json!({
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Gets the weather",
                    "parameters": {
                        "type": "object",
                        "properties": { "location": { "type": "string" } },
                        "required": ["location"]
                    }
                }
            }),
            json!({ "name": "ping" }),
        ])
        .expect("valid raw tools");

        assert_eq!(set.mode(), ToolMode::Raw);
        assert_eq!(set.names(), vec!["get_weather", "ping"]);
        assert_eq!(set.specs()[1].parameters["type"], "object");
        assert!(set.get("get_weather").is_none());
    }

    #[test]
    fn raw_rejects_malformed_entries() {
        let cases = vec![
            json!("not an object"),
            json!({ "description": "no name" }),
            json!({ "name": "bad name" }),
            json!({ "name": "t", "parameters": { "type": "array" } }),
            json!({ "name": "t", "parameters": { "type": "object", "properties": { "a": {} } } }),
            json!({ "name": "t", "parameters": { "type": "object", "properties": {}, "required": ["a"] } }),
        ];
        for case in cases {
            assert!(
                matches!(ToolSet::from_raw(vec![case.clone()]), Err(LlmError::MalformedToolSpec(_))),
                "expected rejection of {case}"
            );
        }

        let dup = ToolSet::from_raw(vec![json!({ "name": "t" }), json!({ "name": "t" })]);
        assert!(matches!(dup, Err(LlmError::MalformedToolSpec(_))));
    }

    #[test]
    fn duplicate_invocable_names_are_ambiguous() {
        let err = ToolSet::from_tools(vec![echo_tool("echo"), echo_tool("echo")])
            .expect_err("duplicate names");
        assert!(matches!(err, LlmError::AmbiguousToolName(name) if name == "echo"));
    }

    #[tokio::test]
    async fn invoke_echoes_call_id_and_serializes_output() {
        let set = ToolSet::from_tools(vec![echo_tool("echo")]).expect("valid tools");
        let msg = set
            .invoke(&call("echo", r#"{"text":"hi"}"#))
            .await
            .expect("known tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("echo"));
        assert_eq!(serde_json::from_str::<serde_json::Value>(&msg.content).expect("json"), json!({ "text": "hi" }));
    }

    #[tokio::test]
    async fn invoke_captures_failures_as_error_payloads() {
        let set = ToolSet::from_tools(vec![echo_tool("echo"), failing_tool()]).expect("valid tools");

        let failed = set.invoke(&call("explode", "")).await.expect("captured");
        let payload: serde_json::Value = serde_json::from_str(&failed.content).expect("json");
        assert_eq!(payload["error"], "execution failed: boom");

        let bad_args = set.invoke(&call("echo", "{not json")).await.expect("captured");
        assert!(bad_args.content.contains("invalid tool arguments"));
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_an_error() {
        let set = ToolSet::from_tools(vec![echo_tool("echo")]).expect("valid tools");
        let err = set.invoke(&call("missing", "{}")).await.expect_err("unknown");
        assert!(matches!(
            err,
            LlmError::UnknownToolRequested { name, call_id } if name == "missing" && call_id == "call_1"
        ));
    }
}
