// ABOUTME: Configuration file support for valet-agent.
// ABOUTME: Loads the backend roster from TOML with a [[backends]] array.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_restart_delay_secs() -> u64 {
    5
}

/// Immutable launch configuration for a supervised external command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Command to run (resolved on PATH or an absolute path)
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Delay before respawning after an unexpected exit
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    /// Unconditional restart interval; 0 disables it
    #[serde(default)]
    pub periodic_restart_secs: u64,
    /// Per-prompt deadline; 0 means the adapter default
    #[serde(default)]
    pub prompt_timeout_secs: u64,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            restart_delay_secs: default_restart_delay_secs(),
            periodic_restart_secs: 0,
            prompt_timeout_secs: 0,
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn periodic_restart(&self) -> Option<Duration> {
        match self.periodic_restart_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn prompt_timeout(&self) -> Option<Duration> {
        match self.prompt_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// One backend entry with a type discriminator and priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type: "rpc", "claude", "gemini", "mock"
    #[serde(rename = "type")]
    pub backend_type: String,

    /// Registry name; defaults to the backend type
    #[serde(default)]
    pub name: Option<String>,

    /// Lower numbers are preferred by the registry
    #[serde(default)]
    pub priority: u32,

    /// Remaining fields passed to the backend factory
    #[serde(flatten)]
    pub config: toml::Table,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    /// Find config file in standard locations
    /// Searches: ./valet-agent.toml, ~/.config/valet/agent.toml
    pub fn find_and_load() -> Result<Option<Self>> {
        let candidates = [
            std::env::current_dir()
                .ok()
                .map(|p| p.join("valet-agent.toml")),
            user_config_dir().map(|p| p.join("valet/agent.toml")),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "Found config file");
                return Ok(Some(Self::from_file(&candidate)?));
            }
        }

        Ok(None)
    }
}

impl BackendConfig {
    /// Registry name for this entry
    pub fn registry_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.backend_type)
    }

    /// Convert config table to serde_json::Value for backend factories
    pub fn to_json_value(&self) -> serde_json::Value {
        let json_str = serde_json::to_string(&self.config).unwrap_or_default();
        serde_json::from_str(&json_str).unwrap_or(serde_json::json!({}))
    }
}

/// Get user config directory
fn user_config_dir() -> Option<std::path::PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| std::path::PathBuf::from(h).join(".config"))
}
