// ABOUTME: Tests for the Claude CLI spawn-per-request backend.
// ABOUTME: Uses fake shell-script binaries that emit canned stream-json events.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use valet_agent::backends::claude_cli::{ClaudeCliBackend, ClaudeCliConfig};
use valet_agent::{AgentBackend, ErrorKind, PromptContext};

fn fake_cli(script: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake-claude");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    (dir, path.to_string_lossy().to_string())
}

fn backend_for(binary: String) -> ClaudeCliBackend {
    ClaudeCliBackend::new(ClaudeCliConfig {
        binary,
        model: None,
        working_dir: None,
        prompt_timeout_secs: 10,
    })
}

#[tokio::test]
async fn test_accumulates_assistant_text() {
    let (_dir, binary) = fake_cli(
        r#"#!/bin/sh
echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":" world"}]}}'
echo '{"type":"result","is_error":false}'
"#,
    );
    let backend = backend_for(binary);
    let text = backend
        .send_prompt(&PromptContext::new(), "hi")
        .await
        .unwrap();
    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn test_error_result_keeps_partial_text() {
    let (_dir, binary) = fake_cli(
        r#"#!/bin/sh
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}'
echo '{"type":"result","is_error":true,"error":"rate limited"}'
"#,
    );
    let backend = backend_for(binary);
    let err = backend
        .send_prompt(&PromptContext::new(), "hi")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Backend);
    assert!(err.to_string().contains("rate limited"));
    assert_eq!(err.partial, "partial");
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let (_dir, binary) = fake_cli(
        r#"#!/bin/sh
echo 'garbage that is not json'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"ok"}]}}'
echo '{"type":"result","is_error":false}'
"#,
    );
    let backend = backend_for(binary);
    let text = backend
        .send_prompt(&PromptContext::new(), "hi")
        .await
        .unwrap();
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn test_nonzero_exit_is_distinct_from_backend_error() {
    let (_dir, binary) = fake_cli(
        r#"#!/bin/sh
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"some"}]}}'
exit 7
"#,
    );
    let backend = backend_for(binary);
    let err = backend
        .send_prompt(&PromptContext::new(), "hi")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Exited);
    assert_eq!(err.partial, "some");
}

#[tokio::test]
async fn test_deadline_surfaces_timeout() {
    let (_dir, binary) = fake_cli("#!/bin/sh\nsleep 30\n");
    let backend = backend_for(binary);
    let ctx = PromptContext::new().with_deadline(Duration::from_millis(100));
    let err = backend.send_prompt(&ctx, "hi").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_missing_binary_is_spawn_error() {
    let backend = backend_for("/nonexistent/claude-binary".to_string());
    let err = backend
        .send_prompt(&PromptContext::new(), "hi")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Spawn);
}

#[tokio::test]
async fn test_closed_backend_rejects_prompts() {
    let (_dir, binary) = fake_cli("#!/bin/sh\nexit 0\n");
    let backend = backend_for(binary);
    backend.close().await.unwrap();
    let err = backend
        .send_prompt(&PromptContext::new(), "hi")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Closed);
}

#[tokio::test]
async fn test_model_switch_capability() {
    let (_dir, binary) = fake_cli("#!/bin/sh\nexit 0\n");
    let backend = backend_for(binary.clone());

    let switch = backend.model_switch().expect("claude supports model switching");
    assert_eq!(switch.current_model(), "default");
    switch.set_model("opus").unwrap();
    assert_eq!(switch.current_model(), "opus");

    assert_eq!(backend.label(), "claude (opus)");
    let status = backend.status();
    assert_eq!(status.backend, "claude");
    assert_eq!(status.model, Some("opus".to_string()));
    assert_eq!(status.provider, Some("anthropic".to_string()));
    assert_eq!(status.source, Some(binary));
}

#[test]
fn test_config_defaults() {
    let config: ClaudeCliConfig = serde_json::from_value(serde_json::json!({})).unwrap();
    assert_eq!(config.binary, "claude");
    assert!(config.model.is_none());
    assert_eq!(config.prompt_timeout_secs, 0);
}
