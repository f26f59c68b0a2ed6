// ABOUTME: Persistent RPC backend - one long-lived agent subprocess reused across prompts.
// ABOUTME: Writes single-line JSON commands to stdin, reads newline-delimited events until agent_end.

use crate::config::ProcessConfig;
use crate::error::{ErrorKind, PromptError};
use crate::health;
use crate::supervisor::ProcessSupervisor;
use crate::traits::{AgentBackend, PromptContext, StatusSnapshot};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWriteExt, Lines};
use tokio::sync::Mutex;

/// Deadline when the config leaves prompt_timeout_secs at 0
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Prefixed to every outbound prompt. The agent runs unattended, so it must
/// never hand commands back to the user to execute.
const AUTONOMY_GUARDRAIL: &str = "You are running unattended inside an automated assistant. \
Execute whatever commands you need yourself; never ask the user to run a command \
or wait for confirmation.\n\n";

/// Backend for an agent tool running in a persistent line-JSON RPC mode.
///
/// The supervisor keeps the subprocess alive across prompts and crashes; the
/// prompt lock serializes callers because the child's pipes are one shared
/// channel.
pub struct RpcBackend {
    supervisor: Arc<ProcessSupervisor>,
    prompt_lock: Mutex<()>,
    closed: AtomicBool,
}

impl RpcBackend {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(config),
            prompt_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Factory for building from a config table
    pub fn from_json(config: &Value) -> anyhow::Result<Self> {
        let config: ProcessConfig = serde_json::from_value(config.clone())?;
        Ok(Self::new(config))
    }
}

#[async_trait]
impl AgentBackend for RpcBackend {
    fn name(&self) -> &str {
        "rpc"
    }

    async fn send_prompt(&self, ctx: &PromptContext, text: &str) -> Result<String, PromptError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PromptError::new(ErrorKind::Closed, "rpc backend is closed"));
        }
        let _guard = self.prompt_lock.lock().await;

        if !self.supervisor.is_running().await {
            self.supervisor.start().await?;
        }

        let timeout = ctx.effective_timeout(
            self.supervisor
                .config()
                .prompt_timeout()
                .unwrap_or(DEFAULT_PROMPT_TIMEOUT),
        );

        let io = self.supervisor.io();
        let mut io_guard = io.lock().await;
        let io = io_guard.as_mut().ok_or_else(|| {
            PromptError::new(ErrorKind::StreamClosed, "agent process has no open pipes")
        })?;

        // Discard leftovers from a previously timed-out turn.
        drain_stale(&mut io.lines).await;

        let command = serde_json::json!({
            "type": "prompt",
            "message": format!("{}{}", AUTONOMY_GUARDRAIL, text),
        });
        let mut line = command.to_string();
        line.push('\n');
        io.stdin.write_all(line.as_bytes()).await.map_err(|e| {
            PromptError::new(
                ErrorKind::StreamClosed,
                format!("failed writing prompt to agent: {}", e),
            )
        })?;
        io.stdin.flush().await.map_err(|e| {
            PromptError::new(
                ErrorKind::StreamClosed,
                format!("failed flushing prompt to agent: {}", e),
            )
        })?;

        match tokio::time::timeout(timeout, read_turn(&mut io.lines, ctx)).await {
            // The child keeps running; only this call aborts.
            Err(_) => Err(PromptError::timeout(timeout)),
            Ok(result) => result,
        }
    }

    async fn close(&self) -> Result<(), PromptError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.supervisor.stop().await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        health::probe_version(
            &self.supervisor.config().command,
            &["--version"],
            health::PROBE_TIMEOUT,
        )
        .await
    }

    fn label(&self) -> String {
        format!("rpc ({})", self.supervisor.config().command)
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            backend: self.name().to_string(),
            model: None,
            provider: None,
            source: Some(self.supervisor.config().command.clone()),
        }
    }
}

/// Read protocol events until an end-of-turn, accumulating response text.
///
/// Delta text is preferred; the `message_end`/`turn_end` fallback extracts
/// text blocks from the embedded assistant message only when no delta arrived,
/// so full-message events never duplicate streamed output.
async fn read_turn<R>(lines: &mut Lines<R>, ctx: &PromptContext) -> Result<String, PromptError>
where
    R: AsyncBufRead + Unpin,
{
    let mut accumulated = String::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(PromptError::new(
                    ErrorKind::StreamClosed,
                    "agent closed its output before end of turn",
                )
                .with_partial(accumulated));
            }
            Err(e) => {
                return Err(PromptError::new(
                    ErrorKind::StreamClosed,
                    format!("failed reading agent output: {}", e),
                )
                .with_partial(accumulated));
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let event: Value = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "Skipping malformed agent event");
                continue;
            }
        };

        match event.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "response" => {
                let success = event
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                if !success {
                    let message = event
                        .get("error")
                        .and_then(|e| e.as_str())
                        .unwrap_or("agent rejected the command")
                        .to_string();
                    return Err(
                        PromptError::new(ErrorKind::Backend, message).with_partial(accumulated)
                    );
                }
            }
            "message_update" => {
                if let Some(delta) = extract_delta(&event) {
                    ctx.report_progress(&delta);
                    accumulated.push_str(&delta);
                }
            }
            "message_end" | "turn_end" => {
                if accumulated.is_empty() {
                    if let Some(text) = extract_message_text(&event) {
                        accumulated.push_str(&text);
                    }
                }
            }
            "agent_end" => return Ok(accumulated),
            other => {
                tracing::debug!(event_type = %other, "Ignoring agent event");
            }
        }
    }
}

/// Text delta from a `message_update` event; `text` wins over `delta` when
/// both are present.
fn extract_delta(event: &Value) -> Option<String> {
    let update = event.get("update").unwrap_or(event);
    let kind = update.get("type").and_then(|t| t.as_str())?;
    if kind != "text_delta" && kind != "output_text_delta" {
        return None;
    }
    update
        .get("text")
        .or_else(|| update.get("delta"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Newline-joined text blocks of the assistant message embedded in an
/// end-of-message event.
fn extract_message_text(event: &Value) -> Option<String> {
    let content = event.get("message")?.get("content")?.as_array()?;
    let blocks: Vec<&str> = content
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n"))
    }
}

/// Discard buffered lines left behind by a turn that timed out.
async fn drain_stale<R>(lines: &mut Lines<R>)
where
    R: AsyncBufRead + Unpin,
{
    while let Ok(Ok(Some(line))) =
        tokio::time::timeout(Duration::from_millis(10), lines.next_line()).await
    {
        tracing::debug!(line = %line, "Discarding stale agent output");
    }
}
