//! Locally executable tools: an explicit schema paired with an async handler.

use crate::error::{LlmError, Result};
use crate::types::ToolSpec;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}

/// Tool names accepted by every supported provider: `^[A-Za-z0-9_-]{1,64}$`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(LlmError::MalformedToolSpec(format!(
            "tool name {name:?} must be 1-64 characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(LlmError::MalformedToolSpec(format!(
            "tool name {name:?} may only contain ASCII letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

#[derive(Debug, Clone)]
struct ParamSpec {
    name: String,
    kind: ParamType,
    description: String,
    required: bool,
    default: Option<serde_json::Value>,
    choices: Vec<String>,
}

/// Derives a [`ToolSpec`] from typed parameter declarations. A parameter is
/// required unless it is declared optional.
#[derive(Debug, Clone)]
pub struct ToolSpecBuilder {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn builder(name: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
        }
    }
}

impl ToolSpecBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self, name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
            choices: Vec::new(),
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            default: None,
            choices: Vec::new(),
        });
        self
    }

    /// Default for the most recently declared parameter; makes it optional.
    pub fn default_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        if let Some(p) = self.params.last_mut() {
            p.default = Some(value.into());
            p.required = false;
        }
        self
    }

    /// Restricts the most recently declared parameter to the given values.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(p) = self.params.last_mut() {
            p.choices = values.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn build(self) -> Result<ToolSpec> {
        validate_tool_name(&self.name)?;

        let mut seen = HashSet::new();
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in self.params {
            if !seen.insert(p.name.clone()) {
                return Err(LlmError::MalformedToolSpec(format!(
                    "tool {:?} declares parameter {:?} twice",
                    self.name, p.name
                )));
            }
            let mut prop = serde_json::Map::new();
            prop.insert("type".to_string(), p.kind.as_str().into());
            prop.insert("description".to_string(), p.description.into());
            if !p.choices.is_empty() {
                prop.insert("enum".to_string(), p.choices.into());
            }
            if let Some(default) = p.default {
                prop.insert("default".to_string(), default);
            }
            if p.required {
                required.push(serde_json::Value::String(p.name.clone()));
            }
            properties.insert(p.name, serde_json::Value::Object(prop));
        }

        Ok(ToolSpec {
            name: self.name,
            description: self.description,
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        })
    }
}

type Handler = Arc<
    dyn Fn(serde_json::Value) -> BoxFuture<'static, std::result::Result<serde_json::Value, ToolError>>
        + Send
        + Sync,
>;

/// A [`Tool`] backed by an async closure.
#[derive(Clone)]
pub struct FunctionTool {
    spec: ToolSpec,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(spec: ToolSpec, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            spec,
            handler: Arc::new(move |args| -> BoxFuture<'static, _> { Box::pin(f(args)) }),
        }
    }

    /// Handler over a deserialized argument struct. Arguments that fail to
    /// deserialize are reported as [`ToolError::InvalidArguments`].
    pub fn typed<A, R, F, Fut>(spec: ToolSpec, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, ToolError>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(spec, move |args| {
            let f = Arc::clone(&f);
            async move {
                let parsed: A = serde_json::from_value(args)
                    .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
                let out = f(parsed).await?;
                serde_json::to_value(out).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
            }
        })
    }

    pub fn into_arc(self) -> Arc<dyn Tool> {
        Arc::new(self)
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        (self.handler)(arguments).await
    }
}

pub fn require_string(args: &serde_json::Value, key: &str) -> std::result::Result<String, ToolError> {
    match args.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other}"
        ))),
        None => Err(ToolError::InvalidArguments(format!("missing key: {key}"))),
    }
}

pub fn optional_string(
    args: &serde_json::Value,
    key: &str,
) -> std::result::Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other}"
        ))),
    }
}

pub fn optional_i64(args: &serde_json::Value, key: &str) -> std::result::Result<Option<i64>, ToolError> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            ToolError::InvalidArguments(format!("key {key} must be an integer, got {v}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn builder_marks_parameters_without_defaults_as_required() {
        let spec = ToolSpec::builder("get_current_temperature")
            .description("Gets the current temperature for a specific location and unit.")
            .required("location", ParamType::String, "City name")
            .optional("unit", ParamType::String, "Temperature unit")
            .one_of(["Celsius", "Fahrenheit"])
            .default_value("Celsius")
            .build()
            .expect("valid spec");

        assert_eq!(
            spec.parameters,
            json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "City name" },
                    "unit": {
                        "type": "string",
                        "description": "Temperature unit",
                        "enum": ["Celsius", "Fahrenheit"],
                        "default": "Celsius"
                    }
                },
                "required": ["location"]
            })
        );
    }

    #[test]
    fn builder_rejects_bad_names_and_duplicate_parameters() {
        assert!(matches!(
            ToolSpec::builder("shell.execute").build(),
            Err(LlmError::MalformedToolSpec(_))
        ));
        assert!(matches!(
            ToolSpec::builder("").build(),
            Err(LlmError::MalformedToolSpec(_))
        ));
        assert!(matches!(
            ToolSpec::builder("t")
                .required("a", ParamType::String, "")
                .optional("a", ParamType::Integer, "")
                .build(),
            Err(LlmError::MalformedToolSpec(_))
        ));
    }

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    #[tokio::test]
    async fn typed_tool_deserializes_arguments() {
        let spec = ToolSpec::builder("add")
            .required("a", ParamType::Integer, "")
            .required("b", ParamType::Integer, "")
            .build()
            .expect("valid spec");
        let tool = FunctionTool::typed(spec, |args: AddArgs| async move { Ok::<_, ToolError>(args.a + args.b) });

        let out = tool.execute(json!({ "a": 2, "b": 40 })).await.expect("adds");
        assert_eq!(out, json!(42));

        let err = tool
            .execute(json!({ "a": "two" }))
            .await
            .expect_err("bad args");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn argument_helpers_report_wrong_types() {
        let args = json!({ "path": "a.txt", "limit": "ten" });
        assert_eq!(require_string(&args, "path").expect("present"), "a.txt");
        assert!(require_string(&args, "missing").is_err());
        assert_eq!(optional_string(&args, "missing").expect("absent ok"), None);
        assert!(optional_i64(&args, "limit").is_err());
    }
}
