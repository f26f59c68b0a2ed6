// ABOUTME: Tests for the BackendRegistry priority selection and failover.
// ABOUTME: Validates health-based reselection, close aggregation, and config factories.

use std::sync::Arc;
use valet_agent::backends::mock::MockBackend;
use valet_agent::{
    AgentBackend, BackendCatalog, BackendRegistry, Config, ErrorKind, PromptContext,
};

#[tokio::test]
async fn test_lowest_priority_healthy_backend_is_active() {
    let registry = BackendRegistry::new();
    // Registered out of priority order on purpose
    registry
        .register("second", Arc::new(MockBackend::new()), 2)
        .unwrap();
    registry
        .register("first", Arc::new(MockBackend::new()), 1)
        .unwrap();
    registry
        .register("third", Arc::new(MockBackend::new()), 3)
        .unwrap();

    registry.health_check_all().await;
    assert_eq!(registry.active(), Some("first".to_string()));
}

#[tokio::test]
async fn test_unhealthy_probe_fails_over_to_next_priority() {
    let registry = BackendRegistry::new();
    registry
        .register("primary", Arc::new(MockBackend::new().unhealthy("binary missing")), 0)
        .unwrap();
    registry
        .register("standby", Arc::new(MockBackend::new()), 1)
        .unwrap();

    registry.health_check_all().await;
    assert_eq!(registry.active(), Some("standby".to_string()));

    let status = registry.status();
    let primary = status.iter().find(|s| s.name == "primary").unwrap();
    assert!(!primary.healthy);
    assert!(primary.last_error.contains("binary missing"));
    assert!(!primary.active);
    let standby = status.iter().find(|s| s.name == "standby").unwrap();
    assert!(standby.healthy);
    assert!(standby.active);
}

#[tokio::test]
async fn test_mark_unhealthy_reselects_without_health_check() {
    let registry = BackendRegistry::new();
    registry
        .register("p", Arc::new(MockBackend::new()), 0)
        .unwrap();
    registry
        .register("s", Arc::new(MockBackend::new()), 1)
        .unwrap();
    registry.health_check_all().await;
    assert_eq!(registry.active(), Some("p".to_string()));

    registry.mark_unhealthy("p", "down").unwrap();
    assert_eq!(registry.active(), Some("s".to_string()));

    registry.mark_healthy("p").unwrap();
    assert_eq!(registry.active(), Some("p".to_string()));
}

#[tokio::test]
async fn test_mark_healthy_restores_preferred_backend() {
    let registry = BackendRegistry::new();
    registry
        .register("preferred", Arc::new(MockBackend::new().unhealthy("down")), 0)
        .unwrap();
    registry
        .register("fallback", Arc::new(MockBackend::new()), 5)
        .unwrap();
    registry.health_check_all().await;
    assert_eq!(registry.active(), Some("fallback".to_string()));

    registry.mark_healthy("preferred").unwrap();
    assert_eq!(registry.active(), Some("preferred".to_string()));
}

#[tokio::test]
async fn test_no_healthy_backend_fails_fast() {
    let mock = Arc::new(MockBackend::new().unhealthy("gone"));
    let registry = BackendRegistry::new();
    registry.register("only", mock.clone(), 0).unwrap();
    registry.health_check_all().await;

    let err = registry
        .send_prompt(&PromptContext::new(), "hello")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoHealthyBackend);
    // The backend was never invoked
    assert!(mock.prompts().is_empty());
}

#[tokio::test]
async fn test_prompt_forwards_to_active_backend() {
    let primary = Arc::new(
        MockBackend::new()
            .unhealthy("down")
            .on_prompt("hello")
            .respond_text("from primary"),
    );
    let standby = Arc::new(MockBackend::new().on_prompt("hello").respond_text("from standby"));

    let registry = BackendRegistry::new();
    registry.register("primary", primary.clone(), 0).unwrap();
    registry.register("standby", standby.clone(), 1).unwrap();
    registry.health_check_all().await;

    let text = registry
        .send_prompt(&PromptContext::new(), "hello")
        .await
        .unwrap();
    assert_eq!(text, "from standby");
    assert!(primary.prompts().is_empty());
    assert_eq!(standby.prompts().len(), 1);
}

#[tokio::test]
async fn test_close_joins_errors_and_closes_everything() {
    let failing = Arc::new(MockBackend::new().fail_close("pipe jammed"));
    let succeeding = Arc::new(MockBackend::new());

    let registry = BackendRegistry::new();
    registry.register("broken", failing.clone(), 0).unwrap();
    registry.register("fine", succeeding.clone(), 1).unwrap();

    let err = registry.close_all().await.unwrap_err();
    assert!(err.to_string().contains("broken"));
    assert!(err.to_string().contains("pipe jammed"));
    // The succeeding backend was still closed
    assert!(succeeding.is_closed());
    assert!(failing.is_closed());
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let registry = BackendRegistry::new();
    registry
        .register("dup", Arc::new(MockBackend::new()), 0)
        .unwrap();
    let err = registry
        .register("dup", Arc::new(MockBackend::new()), 1)
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));
}

#[tokio::test]
async fn test_mark_unknown_backend_errors() {
    let registry = BackendRegistry::new();
    assert!(registry.mark_healthy("ghost").is_err());
    assert!(registry.mark_unhealthy("ghost", "why").is_err());
}

#[tokio::test]
async fn test_capability_probe_through_active_backend() {
    let registry = BackendRegistry::new();
    registry
        .register("mock", Arc::new(MockBackend::new()), 0)
        .unwrap();
    registry.health_check_all().await;

    let backend = registry.active_backend().unwrap();
    let switch = backend.model_switch().expect("mock supports model switching");
    switch.set_model("fast-model").unwrap();
    assert_eq!(switch.current_model(), "fast-model");
    assert_eq!(backend.status().model, Some("fast-model".to_string()));
}

#[test]
fn test_catalog_lists_builtin_backends() {
    let catalog = BackendCatalog::default();
    let available = catalog.available();
    assert!(available.contains(&"rpc"));
    assert!(available.contains(&"claude"));
    assert!(available.contains(&"gemini"));
    assert!(available.contains(&"mock"));
}

#[test]
fn test_catalog_unknown_type_errors() {
    let catalog = BackendCatalog::default();
    let err = catalog
        .create("nonexistent", &serde_json::json!({}))
        .err()
        .unwrap();
    assert!(err.to_string().contains("Unknown backend type: nonexistent"));
}

#[tokio::test]
async fn test_registry_from_config() {
    let toml = r#"
[[backends]]
type = "mock"
name = "scripted"
priority = 0

[[backends]]
type = "claude"
priority = 1
binary = "claude"
"#;
    let config = Config::parse(toml).unwrap();
    let catalog = BackendCatalog::default();
    let registry = BackendRegistry::from_config(&catalog, &config).unwrap();

    let status = registry.status();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].name, "scripted");
    assert_eq!(status[0].priority, 0);
    assert_eq!(status[1].name, "claude");
}
