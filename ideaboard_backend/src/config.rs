use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::mention::DEFAULT_TRIGGER;

/// How the front end reaches the assistant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// Spawn the CLI directly when it is on PATH, otherwise use the gateway.
    #[default]
    Auto,
    Subprocess,
    Gateway,
}

impl InvocationMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Some(InvocationMode::Auto),
            "subprocess" | "process" | "cli" => Some(InvocationMode::Subprocess),
            "gateway" | "http" => Some(InvocationMode::Gateway),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    // Mention trigger
    #[serde(default = "default_trigger")]
    pub trigger: String,

    // External CLI
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Credential variables removed from the child environment so the CLI
    /// uses its own signed-in session.
    #[serde(default = "default_scrubbed_env_vars")]
    pub scrubbed_env_vars: Vec<String>,

    // Routing
    #[serde(default)]
    pub invocation_mode: InvocationMode,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    // Board
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_column")]
    pub default_column: String,
    #[serde(default = "default_username")]
    pub username: String,

    // Brainstorming (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
}

fn default_trigger() -> String {
    DEFAULT_TRIGGER.to_string()
}

fn default_cli_binary() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_scrubbed_env_vars() -> Vec<String> {
    vec![
        "ANTHROPIC_API_KEY".to_string(),
        "ANTHROPIC_AUTH_TOKEN".to_string(),
    ]
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_max_request_bytes() -> usize {
    1024 * 1024
}

fn default_database_path() -> String {
    "ideaboard.db".to_string()
}

fn default_column() -> String {
    "todo".to_string()
}

fn default_username() -> String {
    "me".to_string()
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            trigger: default_trigger(),
            cli_binary: default_cli_binary(),
            timeout_secs: default_timeout_secs(),
            scrubbed_env_vars: default_scrubbed_env_vars(),
            invocation_mode: InvocationMode::default(),
            gateway_url: default_gateway_url(),
            max_request_bytes: default_max_request_bytes(),
            database_path: default_database_path(),
            default_column: default_column(),
            username: default_username(),
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
        }
    }
}

impl AssistantConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("ideaboard_config.toml")
    }

    /// Load config from ideaboard_config.toml (next to executable), then
    /// apply environment overrides.
    pub fn load() -> Self {
        let path = Self::config_path();

        let base = match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<AssistantConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    Some(config)
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    None
                }
            },
            Err(_) => None,
        };

        let mut config = base.unwrap_or_else(|| {
            tracing::warn!("No config file found, using defaults + env vars");
            Self::default()
        });
        config.apply_env();
        config
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(trigger) = env::var("IDEABOARD_TRIGGER") {
            if !trigger.trim().is_empty() {
                self.trigger = trigger;
            }
        }

        if let Ok(binary) = env::var("IDEABOARD_CLI_BINARY") {
            if !binary.trim().is_empty() {
                self.cli_binary = binary;
            }
        }

        if let Ok(timeout) = env::var("IDEABOARD_TIMEOUT_SECS") {
            match timeout.parse() {
                Ok(seconds) => self.timeout_secs = seconds,
                Err(_) => tracing::warn!("Ignoring invalid IDEABOARD_TIMEOUT_SECS '{}'", timeout),
            }
        }

        if let Ok(mode) = env::var("IDEABOARD_INVOCATION_MODE") {
            match InvocationMode::parse(&mode) {
                Some(mode) => self.invocation_mode = mode,
                None => tracing::warn!(
                    "Ignoring invalid IDEABOARD_INVOCATION_MODE '{}'. Expected auto, subprocess or gateway",
                    mode
                ),
            }
        }

        if let Ok(url) = env::var("IDEABOARD_GATEWAY_URL") {
            self.gateway_url = url;
        }

        if let Ok(path) = env::var("IDEABOARD_DATABASE_PATH") {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }

        if let Ok(url) = env::var("LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm_model = model;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }
    }
}
