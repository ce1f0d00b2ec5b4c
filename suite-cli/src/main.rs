//! `suite` command-line client.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "suite", version, about = "Chat with any supported LLM provider")]
struct Cli {
    /// Config file. Default: ~/.suite/config.toml
    #[arg(long, global = true, env = "SUITE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one prompt and print the answer.
    Chat {
        prompt: String,
        /// Model as provider:model, e.g. openai:gpt-4o.
        #[arg(long, short)]
        model: Option<String>,
        #[arg(long)]
        system: Option<String>,
        /// Tool round-trips to run automatically; 0 prints tool calls instead.
        #[arg(long, conflicts_with = "stream")]
        max_turns: Option<i32>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Print tokens as they arrive (tools are not executed; the config's
        /// max_turns is ignored).
        #[arg(long)]
        stream: bool,
        /// Print the full response as JSON.
        #[arg(long, conflicts_with = "stream")]
        json: bool,
    },
    /// List supported providers and whether credentials are configured.
    Providers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env: {e}");
        }
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let cfg = config::SuiteConfig::load(cli.config).await?;

    match cli.command {
        Command::Chat {
            prompt,
            model,
            system,
            max_turns,
            temperature,
            max_tokens,
            stream,
            json,
        } => {
            let args = commands::ChatArgs {
                prompt,
                model,
                system,
                max_turns,
                temperature,
                max_tokens,
                stream,
                json,
            };
            commands::run_chat(&cfg, args).await
        }
        Command::Providers => {
            commands::list_providers(&cfg);
            Ok(())
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("warn,suite=info,suite_llm=info,suite_tools=info"),
    };
    let log_format = std::env::var("SUITE_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported SUITE_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_flags_parse() {
        let cli = Cli::try_parse_from([
            "suite",
            "--config",
            "/tmp/suite.toml",
            "chat",
            "hello",
            "--model",
            "groq:llama-3.1-8b-instant",
            "--max-turns",
            "0",
        ])
        .expect("parses");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/suite.toml")));
        match cli.command {
            Command::Chat { prompt, model, max_turns, .. } => {
                assert_eq!(prompt, "hello");
                assert_eq!(model.as_deref(), Some("groq:llama-3.1-8b-instant"));
                assert_eq!(max_turns, Some(0));
            }
            Command::Providers => panic!("expected chat"),
        }
    }

    #[test]
    fn stream_and_json_conflict() {
        assert!(Cli::try_parse_from(["suite", "chat", "hi", "--stream", "--json"]).is_err());
    }

    #[test]
    fn stream_rejects_a_turn_budget() {
        assert!(
            Cli::try_parse_from(["suite", "chat", "hi", "--stream", "--max-turns", "3"]).is_err()
        );
        assert!(Cli::try_parse_from(["suite", "chat", "hi", "--stream"]).is_ok());
    }
}
