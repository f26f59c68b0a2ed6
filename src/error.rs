// ABOUTME: Typed error surface for prompt execution across all backends.
// ABOUTME: ErrorKind discriminates spawn/timeout/protocol/backend failures for callers.

use std::time::Duration;

/// Typed error classes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// External command missing or unstartable
    Spawn,
    /// Process exited with a non-zero status
    Exited,
    /// Deadline exceeded
    Timeout,
    /// Unexpected protocol state
    Protocol,
    /// Backend reported a failed command
    Backend,
    /// Child closed its output stream before an end-of-turn event
    StreamClosed,
    /// Registry has no healthy backend to route to
    NoHealthyBackend,
    /// Backend was already closed
    Closed,
}

/// Error returned by `AgentBackend::send_prompt` and the surrounding machinery.
///
/// Carries the response text accumulated before the failure so a late error
/// does not discard partial output (e.g. a `result` event with an error flag
/// arriving after assistant text already streamed).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct PromptError {
    pub kind: ErrorKind,
    pub message: String,
    /// Text accumulated before the failure; empty when none
    pub partial: String,
}

impl PromptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            partial: String::new(),
        }
    }

    /// Attach the partial response text accumulated before the failure
    pub fn with_partial(mut self, partial: impl Into<String>) -> Self {
        self.partial = partial.into();
        self
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("prompt timed out after {}s", limit.as_secs()),
        )
    }

    pub fn no_healthy_backend() -> Self {
        Self::new(ErrorKind::NoHealthyBackend, "no healthy backend available")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_is_preserved() {
        let err = PromptError::new(ErrorKind::Backend, "bad prompt").with_partial("so far");
        assert_eq!(err.kind, ErrorKind::Backend);
        assert_eq!(err.partial, "so far");
        assert_eq!(err.to_string(), "bad prompt");
    }

    #[test]
    fn test_timeout_message_names_limit() {
        let err = PromptError::timeout(Duration::from_secs(30));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.to_string().contains("30s"));
    }
}
