// ABOUTME: Tests for the scripted MockBackend used across the test suite.
// ABOUTME: Validates expectation matching, capability probes, and defaults.

use std::sync::Arc;
use valet_agent::backends::mock::MockBackend;
use valet_agent::{AgentBackend, ErrorKind, PromptContext, PromptError};

#[tokio::test]
async fn test_expectations_match_in_fifo_order() {
    let mock = MockBackend::new()
        .on_prompt("first")
        .respond_text("one")
        .on_prompt("second")
        .respond_text("two");

    let ctx = PromptContext::new();
    assert_eq!(mock.send_prompt(&ctx, "first").await.unwrap(), "one");
    assert_eq!(mock.send_prompt(&ctx, "second").await.unwrap(), "two");
}

#[tokio::test]
async fn test_out_of_order_prompts_still_match() {
    let mock = MockBackend::new()
        .on_prompt("alpha")
        .respond_text("a")
        .on_prompt("beta")
        .respond_text("b");

    let ctx = PromptContext::new();
    assert_eq!(mock.send_prompt(&ctx, "beta").await.unwrap(), "b");
    assert_eq!(mock.send_prompt(&ctx, "alpha").await.unwrap(), "a");
}

#[tokio::test]
async fn test_unmatched_prompt_gets_default_response() {
    let mock = MockBackend::new();
    let text = mock
        .send_prompt(&PromptContext::new(), "surprise")
        .await
        .unwrap();
    assert!(text.contains("no expectation"));
    assert_eq!(mock.prompts(), vec!["surprise".to_string()]);
}

#[tokio::test]
async fn test_scripted_error_passes_through() {
    let mock = MockBackend::new()
        .on_prompt("fail")
        .respond_error(PromptError::new(ErrorKind::Timeout, "too slow"));
    let err = mock
        .send_prompt(&PromptContext::new(), "fail")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_deltas_are_reported_before_response() {
    let mock = MockBackend::new()
        .on_prompt("stream")
        .with_deltas(&["a", "ab"])
        .respond_text("ab");

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let ctx = PromptContext::new().with_progress(Arc::new(move |delta: &str| {
        sink.lock().unwrap().push(delta.to_string());
    }));

    mock.send_prompt(&ctx, "stream").await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "ab".to_string()]);
}

#[tokio::test]
async fn test_health_and_close_configuration() {
    let healthy = MockBackend::new();
    assert!(healthy.health_check().await.is_ok());
    assert!(healthy.close().await.is_ok());
    assert!(healthy.is_closed());

    let unhealthy = MockBackend::new().unhealthy("offline");
    assert_eq!(unhealthy.health_check().await.unwrap_err(), "offline");

    let stubborn = MockBackend::new().fail_close("stuck");
    assert!(stubborn.close().await.is_err());
}
