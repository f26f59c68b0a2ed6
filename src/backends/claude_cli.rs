// ABOUTME: Claude CLI backend - spawns the claude binary per prompt with --print --output-format stream-json.
// ABOUTME: Accumulates text from assistant events; a result event with is_error ends the call.

use crate::error::{ErrorKind, PromptError};
use crate::health;
use crate::traits::{AgentBackend, ModelSwitch, PromptContext, StatusSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as ProcessCommand;

const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

fn default_binary() -> String {
    "claude".to_string()
}

/// Configuration for the Claude CLI backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeCliConfig {
    /// Path to the claude binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Model passed via --model; None uses the CLI default
    #[serde(default)]
    pub model: Option<String>,
    /// Working directory for the agent
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub prompt_timeout_secs: u64,
}

pub struct ClaudeCliBackend {
    config: ClaudeCliConfig,
    model: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl ClaudeCliBackend {
    pub fn new(config: ClaudeCliConfig) -> Self {
        let model = config.model.clone();
        Self {
            config,
            model: Mutex::new(model),
            closed: AtomicBool::new(false),
        }
    }

    /// Factory for building from a config table
    pub fn from_json(config: &Value) -> anyhow::Result<Self> {
        let config: ClaudeCliConfig = serde_json::from_value(config.clone())?;
        Ok(Self::new(config))
    }

    fn model(&self) -> Option<String> {
        self.model.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn prompt_timeout(&self) -> Duration {
        match self.config.prompt_timeout_secs {
            0 => DEFAULT_PROMPT_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }
}

#[async_trait]
impl AgentBackend for ClaudeCliBackend {
    fn name(&self) -> &str {
        "claude"
    }

    async fn send_prompt(&self, ctx: &PromptContext, text: &str) -> Result<String, PromptError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PromptError::new(
                ErrorKind::Closed,
                "claude backend is closed",
            ));
        }

        let timeout = ctx.effective_timeout(self.prompt_timeout());
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        if let Some(model) = self.model() {
            args.push("--model".to_string());
            args.push(model);
        }
        args.push(text.to_string());

        // The spawned child is killed on drop, so an expired deadline also
        // tears the process down.
        match tokio::time::timeout(timeout, run_prompt(&self.config, &args)).await {
            Err(_) => Err(PromptError::timeout(timeout)),
            Ok(result) => result,
        }
    }

    async fn close(&self) -> Result<(), PromptError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        health::probe_version(&self.config.binary, &["--version"], health::PROBE_TIMEOUT).await
    }

    fn model_switch(&self) -> Option<&dyn ModelSwitch> {
        Some(self)
    }

    fn label(&self) -> String {
        match self.model() {
            Some(model) => format!("claude ({})", model),
            None => "claude".to_string(),
        }
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            backend: self.name().to_string(),
            model: self.model(),
            provider: Some("anthropic".to_string()),
            source: Some(self.config.binary.clone()),
        }
    }
}

impl ModelSwitch for ClaudeCliBackend {
    fn set_model(&self, model: &str) -> Result<(), PromptError> {
        let mut current = self.model.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(model.to_string());
        Ok(())
    }

    fn current_model(&self) -> String {
        self.model().unwrap_or_else(|| "default".to_string())
    }
}

async fn run_prompt(config: &ClaudeCliConfig, args: &[String]) -> Result<String, PromptError> {
    tracing::debug!(binary = %config.binary, "Spawning Claude CLI");

    let mut cmd = ProcessCommand::new(&config.binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        PromptError::new(
            ErrorKind::Spawn,
            format!("failed to spawn {}: {}", config.binary, e),
        )
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PromptError::new(ErrorKind::Spawn, "failed to capture stdout"))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    tracing::warn!(stderr = %line, "Claude CLI stderr");
                }
            }
        });
    }

    let mut lines = BufReader::new(stdout).lines();
    let mut accumulated = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        let event: Value = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed Claude CLI event");
                continue;
            }
        };
        if let Err(err) = apply_event(&event, &mut accumulated) {
            return Err(err);
        }
    }

    let status = child.wait().await.map_err(|e| {
        PromptError::new(ErrorKind::Spawn, format!("failed to reap child: {}", e))
            .with_partial(accumulated.clone())
    })?;
    if !status.success() {
        return Err(PromptError::new(
            ErrorKind::Exited,
            format!("Claude CLI exited with status {:?}", status.code()),
        )
        .with_partial(accumulated));
    }

    Ok(accumulated)
}

/// Fold one protocol event into the accumulated response.
fn apply_event(event: &Value, accumulated: &mut String) -> Result<(), PromptError> {
    match event.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "assistant" => {
            if let Some(content) = event
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
            {
                for block in content {
                    if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            accumulated.push_str(text);
                        }
                    }
                }
            }
            Ok(())
        }
        "result" => {
            let is_error = event
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if is_error {
                let message = event
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("Claude CLI reported an error")
                    .to_string();
                return Err(PromptError::new(ErrorKind::Backend, message)
                    .with_partial(std::mem::take(accumulated)));
            }
            // Fallback to the result field when no assistant text streamed
            if accumulated.is_empty() {
                if let Some(result) = event.get("result").and_then(|r| r.as_str()) {
                    accumulated.push_str(result);
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
