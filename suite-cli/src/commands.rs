use crate::config::SuiteConfig;
use anyhow::Context as _;
use futures_util::StreamExt;
use std::io::Write as _;
use std::sync::Arc;
use suite_llm::{
    ChatMessage, ChatResponse, Client, CompletionOptions, ProviderKind, StreamChunk, Tool, ToolSet,
};
use suite_tools::{ClockTool, FilesystemTool};

/// Flags of `suite chat` that override the config file.
#[derive(Debug, Clone, Default)]
pub struct ChatArgs {
    pub prompt: String,
    pub model: Option<String>,
    pub system: Option<String>,
    pub max_turns: Option<i32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub json: bool,
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn run_chat(cfg: &SuiteConfig, args: ChatArgs) -> anyhow::Result<()> {
    let client = Client::with_configs(cfg.providers.clone()).context("configure providers")?;
    let model = args.model.clone().unwrap_or_else(|| cfg.general.model.clone());
    let messages = build_messages(cfg, &args);
    let tools = build_tools(cfg)?;
    let max_turns = args.max_turns.unwrap_or(cfg.general.max_turns);

    let mut options = CompletionOptions::default();
    if let Some(t) = args.temperature.or(cfg.general.temperature) {
        options = options.temperature(t);
    }
    if let Some(n) = args.max_tokens.or(cfg.general.max_tokens) {
        options = options.max_tokens(n);
    }
    if !tools.is_empty() {
        options = options.tools(ToolSet::from_tools(tools)?);
    }

    tracing::info!(
        model = %model,
        max_turns,
        stream = args.stream,
        "chat request started"
    );

    if args.stream {
        return stream_chat(&client, &model, &messages, options).await;
    }

    let response = client
        .create(&model, &messages, options.max_turns(max_turns))
        .await?;
    let out = render_response(&response, args.json)?;
    println!("{out}");
    Ok(())
}

async fn stream_chat(
    client: &Client,
    model: &str,
    messages: &[ChatMessage],
    options: CompletionOptions,
) -> anyhow::Result<()> {
    let mut stream = client.create_stream(model, messages, options).await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Delta { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamChunk::ToolCallStart { id, name } => {
                eprintln!("[tool call {name} ({id}) not executed while streaming]");
            }
            StreamChunk::ToolCallDelta { .. } => {}
            StreamChunk::Done { usage } => {
                writeln!(stdout)?;
                tracing::info!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "stream finished"
                );
            }
        }
    }
    Ok(())
}

fn build_messages(cfg: &SuiteConfig, args: &ChatArgs) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    let system = args.system.as_deref().or(cfg.general.system_prompt.as_deref());
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(args.prompt.clone()));
    messages
}

fn build_tools(cfg: &SuiteConfig) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    if cfg.tools.clock {
        tools.push(Arc::new(ClockTool::new()));
    }
    if cfg.tools.filesystem {
        let root = match &cfg.tools.filesystem_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("resolve current directory")?,
        };
        tracing::debug!(root = %root.display(), "filesystem tool enabled");
        tools.push(Arc::new(FilesystemTool::new(root)?));
    }
    Ok(tools)
}

fn render_response(response: &ChatResponse, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(response)?);
    }

    let mut lines = Vec::new();
    for warning in &response.warnings {
        lines.push(format!("warning: {warning}"));
    }
    if let Some(message) = response.message() {
        if !message.content.is_empty() {
            lines.push(message.content.clone());
        }
        for call in &message.tool_calls {
            lines.push(format!("tool call {} ({}): {}", call.name, call.id, call.arguments));
        }
    }
    Ok(lines.join("\n"))
}

/// Supported providers and whether credentials were found for each.
pub fn provider_report(cfg: &SuiteConfig) -> Vec<(String, bool)> {
    Client::new()
        .supported_providers()
        .into_iter()
        .map(|key| {
            let ready = ProviderKind::from_key(&key)
                .is_some_and(|kind| kind.has_credentials(cfg.providers.get(&key)));
            (key, ready)
        })
        .collect()
}

pub fn list_providers(cfg: &SuiteConfig) {
    for (key, ready) in provider_report(cfg) {
        let status = if ready { "credentials found" } else { "no credentials" };
        println!("{key:<12} {status}");
    }
}
