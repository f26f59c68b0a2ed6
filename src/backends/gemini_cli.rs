// ABOUTME: Gemini CLI backend - spawns the gemini binary per prompt, falling back to npx.
// ABOUTME: Collects response text with a recursive walk over each event's JSON value.

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

/// Arguments prepended when running through the package runner
const RUNNER_PREFIX: &[&str] = &["--yes", "@google/gemini-cli"];

fn default_binary() -> String {
    "gemini".to_string()
}

fn default_runner() -> String {
    "npx".to_string()
}

/// Configuration for the Gemini CLI backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiCliConfig {
    /// Primary binary name probed on PATH
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Package runner used when the binary is absent
    #[serde(default = "default_runner")]
    pub runner: String,
    /// Model passed via --model; None uses the CLI default
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt_timeout_secs: u64,
}

/// How a prompt invocation reaches the tool
enum Invocation {
    Direct(PathBuf),
    Runner(PathBuf),
}

pub struct GeminiCliBackend {
    config: GeminiCliConfig,
    model: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl GeminiCliBackend {
    pub fn new(config: GeminiCliConfig) -> Self {
        let model = config.model.clone();
        Self {
            config,
            model: Mutex::new(model),
            closed: AtomicBool::new(false),
        }
    }

    /// Factory for building from a config table
    pub fn from_json(config: &Value) -> anyhow::Result<Self> {
        let config: GeminiCliConfig = serde_json::from_value(config.clone())?;
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

    /// Probe for the primary binary, then the package runner
    fn resolve(&self) -> Result<Invocation, PromptError> {
        if let Ok(path) = which::which(&self.config.binary) {
            return Ok(Invocation::Direct(path));
        }
        match which::which(&self.config.runner) {
            Ok(path) => Ok(Invocation::Runner(path)),
            Err(_) => Err(PromptError::new(
                ErrorKind::Spawn,
                format!(
                    "neither {} nor {} found on PATH",
                    self.config.binary, self.config.runner
                ),
            )),
        }
    }
}

#[async_trait]
impl AgentBackend for GeminiCliBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send_prompt(&self, ctx: &PromptContext, text: &str) -> Result<String, PromptError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PromptError::new(
                ErrorKind::Closed,
                "gemini backend is closed",
            ));
        }

        let invocation = self.resolve()?;
        let timeout = ctx.effective_timeout(self.prompt_timeout());

        let mut args: Vec<String> = Vec::new();
        let program = match &invocation {
            Invocation::Direct(path) => path.clone(),
            Invocation::Runner(path) => {
                args.extend(RUNNER_PREFIX.iter().map(|s| s.to_string()));
                path.clone()
            }
        };
        if let Some(model) = self.model() {
            args.push("--model".to_string());
            args.push(model);
        }
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
        args.push("--prompt".to_string());
        args.push(text.to_string());

        match tokio::time::timeout(timeout, run_prompt(&program, &args)).await {
            Err(_) => Err(PromptError::timeout(timeout)),
            Ok(result) => result,
        }
    }

    async fn close(&self) -> Result<(), PromptError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        match self.resolve() {
            Ok(Invocation::Direct(path)) => {
                let path = path.to_string_lossy().to_string();
                health::probe_version(&path, &["--version"], health::PROBE_TIMEOUT).await
            }
            // Running the package through npx just for a probe is too slow;
            // a present runner counts as healthy.
            Ok(Invocation::Runner(_)) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn model_switch(&self) -> Option<&dyn ModelSwitch> {
        Some(self)
    }

    fn label(&self) -> String {
        match self.model() {
            Some(model) => format!("gemini ({})", model),
            None => "gemini".to_string(),
        }
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            backend: self.name().to_string(),
            model: self.model(),
            provider: Some("google".to_string()),
            source: Some(self.config.binary.clone()),
        }
    }
}

impl ModelSwitch for GeminiCliBackend {
    fn set_model(&self, model: &str) -> Result<(), PromptError> {
        let mut current = self.model.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(model.to_string());
        Ok(())
    }

    fn current_model(&self) -> String {
        self.model().unwrap_or_else(|| "default".to_string())
    }
}

async fn run_prompt(program: &PathBuf, args: &[String]) -> Result<String, PromptError> {
    tracing::debug!(program = %program.display(), "Spawning Gemini CLI");

    let mut child = ProcessCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            PromptError::new(
                ErrorKind::Spawn,
                format!("failed to spawn {}: {}", program.display(), e),
            )
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PromptError::new(ErrorKind::Spawn, "failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PromptError::new(ErrorKind::Spawn, "failed to capture stderr"))?;

    // Captured rather than streamed: an empty response promotes stderr to the
    // error message.
    let stderr_task = tokio::spawn(async move {
        let mut captured = String::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !captured.is_empty() {
                captured.push('\n');
            }
            captured.push_str(&line);
        }
        captured
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut accumulated = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        let event: Value = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed Gemini CLI event");
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
    let stderr_text = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(PromptError::new(
            ErrorKind::Exited,
            format!("Gemini CLI exited with status {:?}", status.code()),
        )
        .with_partial(accumulated));
    }

    if accumulated.is_empty() && !stderr_text.trim().is_empty() {
        return Err(PromptError::new(
            ErrorKind::Backend,
            stderr_text.trim().to_string(),
        ));
    }

    Ok(accumulated)
}

/// Fold one protocol event into the accumulated response.
fn apply_event(event: &Value, accumulated: &mut String) -> Result<(), PromptError> {
    match event.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "error" => {
            let message = event
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| {
                    event
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .or_else(|| {
                    let mut text = String::new();
                    collect_text(event, &mut text);
                    if text.is_empty() {
                        None
                    } else {
                        Some(text)
                    }
                })
                .unwrap_or_else(|| "Gemini CLI reported an error".to_string());
            Err(PromptError::new(ErrorKind::Backend, message)
                .with_partial(std::mem::take(accumulated)))
        }
        "message" | "result" => {
            collect_text(event, accumulated);
            Ok(())
        }
        _ => {
            if let Some(text) = event.get("text").and_then(|t| t.as_str()) {
                accumulated.push_str(text);
            }
            Ok(())
        }
    }
}

/// Collect every string under a `text`, `content`, or `message` key at any
/// nesting depth, in first-seen order. Kept local to this backend; no other
/// protocol needs a generic walk.
fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::String(s) if key == "text" || key == "content" || key == "message" => {
                        out.push_str(s);
                    }
                    _ => collect_text(val, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}
