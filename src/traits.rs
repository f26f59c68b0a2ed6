// ABOUTME: Core AgentBackend trait that all backends implement.
// ABOUTME: Defines prompt execution, lifecycle, and optional capability probes.

use crate::error::PromptError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Sink for incremental response text as it streams from a backend
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Call-scoped deadline and progress reporting for one `send_prompt`.
///
/// Adapters bound each call by the tighter of the caller's deadline and their
/// own configured prompt timeout. The progress sink is optional; currently
/// only the persistent RPC adapter produces deltas.
#[derive(Clone, Default)]
pub struct PromptContext {
    deadline: Option<Duration>,
    progress: Option<ProgressFn>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn progress_fn(&self) -> Option<ProgressFn> {
        self.progress.clone()
    }

    /// Report a streamed text delta to the caller, if anyone is listening
    pub fn report_progress(&self, delta: &str) {
        if let Some(progress) = &self.progress {
            progress(delta);
        }
    }

    /// The tighter of the caller's deadline and the adapter's configured timeout
    pub fn effective_timeout(&self, configured: Duration) -> Duration {
        match self.deadline {
            Some(deadline) if deadline < configured => deadline,
            _ => configured,
        }
    }
}

impl std::fmt::Debug for PromptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptContext")
            .field("deadline", &self.deadline)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Point-in-time description of a backend for status displays
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub backend: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub source: Option<String>,
}

/// Optional model-switching capability, probed via `AgentBackend::model_switch`
pub trait ModelSwitch: Send + Sync {
    fn set_model(&self, model: &str) -> Result<(), PromptError>;
    fn current_model(&self) -> String;
}

/// Core trait that all agent backends implement.
///
/// `send_prompt` blocks its caller until the backend finishes one turn; run it
/// from a background task when the caller cannot block. The capability
/// accessors (`model_switch`, `label`, `status`) have defaults so a backend
/// only implements what it supports; callers probe and fall back when absent.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Backend name for logging and status displays
    fn name(&self) -> &str;

    /// Execute one prompt and return the accumulated response text
    async fn send_prompt(&self, ctx: &PromptContext, text: &str) -> Result<String, PromptError>;

    /// Release all owned resources; idempotent
    async fn close(&self) -> Result<(), PromptError>;

    /// Liveness probe used by the registry; `Err` carries a reason string
    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }

    /// Probe for model-switching support; `None` is not an error
    fn model_switch(&self) -> Option<&dyn ModelSwitch> {
        None
    }

    /// Human-readable label for user-facing displays
    fn label(&self) -> String {
        self.name().to_string()
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            backend: self.name().to_string(),
            ..StatusSnapshot::default()
        }
    }
}
