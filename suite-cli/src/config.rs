//! `suite` configuration loader.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use suite_llm::{ProviderConfig, parse_model_id};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// `0` returns tool calls without executing them.
    #[serde(default = "default_max_turns")]
    pub max_turns: i32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String {
    "openai:gpt-4o-mini".to_string()
}

fn default_max_turns() -> i32 {
    4
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: None,
            max_turns: default_max_turns(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub filesystem: bool,
    /// Root of the read-only filesystem tool. Default: current directory.
    #[serde(default)]
    pub filesystem_root: Option<PathBuf>,
    #[serde(default = "default_clock")]
    pub clock: bool,
}

fn default_clock() -> bool {
    true
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            filesystem: false,
            filesystem_root: None,
            clock: default_clock(),
        }
    }
}

impl SuiteConfig {
    /// Loads `path`, or the default location when `None`. A missing default
    /// file yields built-in defaults; a missing explicit file is an error.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        tracing::debug!(
            path = %path.display(),
            model = %cfg.general.model,
            providers = cfg.providers.len(),
            "config loaded"
        );
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SUITE_MODEL") {
            if !v.trim().is_empty() {
                self.general.model = v;
            }
        }
        if let Ok(v) = std::env::var("SUITE_MAX_TURNS") {
            match v.trim().parse::<i32>() {
                Ok(n) => self.general.max_turns = n,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring invalid SUITE_MAX_TURNS"),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        parse_model_id(&self.general.model)
            .map_err(|e| anyhow::anyhow!("general.model: {e}"))?;
        if let Some(t) = self.general.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(anyhow::anyhow!("general.temperature must be within 0..=2, got {t}"));
            }
        }
        if self.general.max_tokens == Some(0) {
            return Err(anyhow::anyhow!("general.max_tokens must be > 0"));
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".suite").join("config.toml")
}
