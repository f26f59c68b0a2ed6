// ABOUTME: Mock backend for testing - returns pre-configured responses.
// ABOUTME: Allows deterministic tests without spawning real agent processes.

use crate::error::PromptError;
use crate::traits::{AgentBackend, ModelSwitch, PromptContext, StatusSnapshot};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock backend with scripted prompt expectations.
///
/// Expectations match with FIFO preference: the front of the queue is checked
/// first, then the rest in order, so in-order prompts drain deterministically
/// while out-of-order prompts still find their match.
pub struct MockBackend {
    expectations: Mutex<VecDeque<Expectation>>,
    prompts: Mutex<Vec<String>>,
    health: Mutex<Result<(), String>>,
    fail_close: Option<String>,
    model: Mutex<String>,
    closed: AtomicBool,
}

struct Expectation {
    pattern: String,
    delay: Option<Duration>,
    deltas: Vec<String>,
    outcome: Result<String, PromptError>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            expectations: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            health: Mutex::new(Ok(())),
            fail_close: None,
            model: Mutex::new("mock-model".to_string()),
            closed: AtomicBool::new(false),
        }
    }

    /// Set up an expectation for a prompt containing the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            backend: self,
            pattern: pattern.to_string(),
            delay: None,
            deltas: Vec::new(),
        }
    }

    /// Report unhealthy from `health_check` with the given reason
    pub fn unhealthy(self, reason: &str) -> Self {
        *self.health.lock().unwrap_or_else(|e| e.into_inner()) = Err(reason.to_string());
        self
    }

    /// Make `close` fail with the given reason
    pub fn fail_close(mut self, reason: &str) -> Self {
        self.fail_close = Some(reason.to_string());
        self
    }

    /// Prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push_expectation(&self, expectation: Expectation) {
        self.expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(expectation);
    }

    fn take_expectation(&self, text: &str) -> Option<Expectation> {
        let mut expectations = self.expectations.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(front) = expectations.front() {
            if text.contains(&front.pattern) {
                return expectations.pop_front();
            }
        }
        expectations
            .iter()
            .position(|e| text.contains(&e.pattern))
            .and_then(|i| expectations.remove(i))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_prompt(&self, ctx: &PromptContext, text: &str) -> Result<String, PromptError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());

        match self.take_expectation(text) {
            Some(expectation) => {
                for delta in &expectation.deltas {
                    ctx.report_progress(delta);
                }
                if let Some(delay) = expectation.delay {
                    tokio::time::sleep(delay).await;
                }
                expectation.outcome
            }
            None => Ok(format!("mock: no expectation for '{}'", text)),
        }
    }

    async fn close(&self) -> Result<(), PromptError> {
        self.closed.store(true, Ordering::SeqCst);
        match &self.fail_close {
            Some(reason) => Err(PromptError::new(
                crate::error::ErrorKind::Closed,
                reason.clone(),
            )),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn model_switch(&self) -> Option<&dyn ModelSwitch> {
        Some(self)
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            backend: self.name().to_string(),
            model: Some(ModelSwitch::current_model(self)),
            provider: Some("mock".to_string()),
            source: None,
        }
    }
}

impl ModelSwitch for MockBackend {
    fn set_model(&self, model: &str) -> Result<(), PromptError> {
        *self.model.lock().unwrap_or_else(|e| e.into_inner()) = model.to_string();
        Ok(())
    }

    fn current_model(&self) -> String {
        self.model.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    backend: MockBackend,
    pattern: String,
    delay: Option<Duration>,
    deltas: Vec<String>,
}

impl ExpectationBuilder {
    /// Sleep this long before responding; useful for queue timing tests
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report these deltas through the prompt context before responding
    pub fn with_deltas(mut self, deltas: &[&str]) -> Self {
        self.deltas = deltas.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Respond with a simple text result
    pub fn respond_text(self, text: &str) -> MockBackend {
        let outcome = Ok(text.to_string());
        self.finish(outcome)
    }

    /// Respond with an error
    pub fn respond_error(self, error: PromptError) -> MockBackend {
        self.finish(Err(error))
    }

    fn finish(self, outcome: Result<String, PromptError>) -> MockBackend {
        self.backend.push_expectation(Expectation {
            pattern: self.pattern,
            delay: self.delay,
            deltas: self.deltas,
            outcome,
        });
        self.backend
    }
}
