//! Unified chat-completion client.
//!
//! Routes `provider:model` identifiers to vendor adapters, normalizes tool
//! schemas, and optionally runs the tool-calling loop.

mod anthropic;
mod client;
mod error;
mod identifier;
mod openai;
mod provider;
mod registry;
mod sse;
mod tool;
mod toolset;
mod types;

pub use anthropic::AnthropicProvider;
pub use client::{Client, ClientBuilder, CompletionOptions};
pub use error::{LlmError, Result};
pub use identifier::{ModelId, parse_model_id};
pub use openai::{AuthStyle, OpenAiCompatibleProvider};
pub use provider::{ChatProvider, ChatStream, ProviderConfig, ProviderKind, RequestOptions};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use tool::{
    FunctionTool, ParamType, Tool, ToolError, ToolSpecBuilder, optional_i64, optional_string,
    require_string, validate_tool_name,
};
pub use toolset::{ToolMode, ToolSet};
pub use types::{ChatMessage, ChatResponse, Choice, Role, StreamChunk, ToolCall, ToolSpec, Usage};
