// ABOUTME: Priority-ordered backend registry with health-based failover.
// ABOUTME: Routes prompts to the lowest-priority healthy backend; includes config factories.

use crate::config::Config;
use crate::error::{ErrorKind, PromptError};
use crate::traits::{AgentBackend, PromptContext, StatusSnapshot};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

/// Registry view of one backend, reported by `status()`
#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub name: String,
    pub priority: u32,
    pub healthy: bool,
    pub active: bool,
    pub last_error: String,
}

struct BackendHandle {
    name: String,
    priority: u32,
    healthy: bool,
    last_error: String,
    backend: Arc<dyn AgentBackend>,
}

struct RegistryInner {
    backends: Vec<BackendHandle>,
    active: Option<String>,
}

/// Holds the ordered backend roster and proxies prompts to the active one.
///
/// The active backend is always the lowest-priority-number healthy entry;
/// ties break by registration order because insertion keeps the list sorted.
/// Implements `AgentBackend` itself so a `DispatchQueue` can wrap a whole
/// roster instead of a single backend.
pub struct BackendRegistry {
    inner: RwLock<RegistryInner>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                backends: Vec::new(),
                active: None,
            }),
        }
    }

    /// Build a full roster from a parsed config file
    pub fn from_config(catalog: &BackendCatalog, config: &Config) -> Result<Self> {
        let registry = Self::new();
        for entry in &config.backends {
            let backend = catalog.create(&entry.backend_type, &entry.to_json_value())?;
            registry.register(entry.registry_name(), backend, entry.priority)?;
        }
        Ok(registry)
    }

    /// Insert a backend, keeping the list priority-sorted. New entries are
    /// assumed healthy; the active pointer only moves on the next selection
    /// event (health check or manual mark).
    pub fn register(
        &self,
        name: &str,
        backend: Arc<dyn AgentBackend>,
        priority: u32,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.backends.iter().any(|b| b.name == name) {
            bail!("backend '{}' is already registered", name);
        }
        let handle = BackendHandle {
            name: name.to_string(),
            priority,
            healthy: true,
            last_error: String::new(),
            backend,
        };
        let position = inner
            .backends
            .iter()
            .position(|b| b.priority > priority)
            .unwrap_or(inner.backends.len());
        inner.backends.insert(position, handle);
        tracing::info!(backend = %name, priority, "Registered backend");
        Ok(())
    }

    /// Name of the currently active backend
    pub fn active(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .clone()
    }

    /// The active backend itself, for capability probing at call sites
    pub fn active_backend(&self) -> Option<Arc<dyn AgentBackend>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let name = inner.active.as_deref()?;
        inner
            .backends
            .iter()
            .find(|b| b.name == name)
            .map(|b| Arc::clone(&b.backend))
    }

    /// Probe every backend sequentially, update health flags, reselect.
    pub async fn health_check_all(&self) {
        let roster: Vec<(String, Arc<dyn AgentBackend>)> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner
                .backends
                .iter()
                .map(|b| (b.name.clone(), Arc::clone(&b.backend)))
                .collect()
        };

        let mut results = Vec::with_capacity(roster.len());
        for (name, backend) in roster {
            let result = backend.health_check().await;
            if let Err(reason) = &result {
                tracing::warn!(backend = %name, reason = %reason, "Health check failed");
            }
            results.push((name, result));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for (name, result) in results {
            if let Some(handle) = inner.backends.iter_mut().find(|b| b.name == name) {
                match result {
                    Ok(()) => {
                        handle.healthy = true;
                        handle.last_error.clear();
                    }
                    Err(reason) => {
                        handle.healthy = false;
                        handle.last_error = reason;
                    }
                }
            }
        }
        Self::recompute_active(&mut inner);
    }

    /// Administrative override; reselects immediately
    pub fn mark_unhealthy(&self, name: &str, reason: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let handle = inner
            .backends
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| anyhow!("unknown backend: {}", name))?;
        handle.healthy = false;
        handle.last_error = reason.to_string();
        tracing::warn!(backend = %name, reason = %reason, "Backend marked unhealthy");
        Self::recompute_active(&mut inner);
        Ok(())
    }

    /// Administrative override; reselects immediately
    pub fn mark_healthy(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let handle = inner
            .backends
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| anyhow!("unknown backend: {}", name))?;
        handle.healthy = true;
        handle.last_error.clear();
        Self::recompute_active(&mut inner);
        Ok(())
    }

    /// Per-backend status rows for displays
    pub fn status(&self) -> Vec<BackendStatus> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .backends
            .iter()
            .map(|b| BackendStatus {
                name: b.name.clone(),
                priority: b.priority,
                healthy: b.healthy,
                active: inner.active.as_deref() == Some(b.name.as_str()),
                last_error: b.last_error.clone(),
            })
            .collect()
    }

    /// Close every registered backend regardless of health, joining errors
    /// instead of stopping at the first.
    pub async fn close_all(&self) -> Result<()> {
        let roster: Vec<(String, Arc<dyn AgentBackend>)> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner
                .backends
                .iter()
                .map(|b| (b.name.clone(), Arc::clone(&b.backend)))
                .collect()
        };

        let results = join_all(roster.into_iter().map(|(name, backend)| async move {
            (name, backend.close().await)
        }))
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| format!("{}: {}", name, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("failed to close backends: {}", failures.join("; ")))
        }
    }

    /// Reselection is logged only when the identity changes; steady-state
    /// health checks stay quiet.
    fn recompute_active(inner: &mut RegistryInner) {
        let new_active = inner
            .backends
            .iter()
            .find(|b| b.healthy)
            .map(|b| b.name.clone());
        if new_active != inner.active {
            match &new_active {
                Some(name) => tracing::info!(backend = %name, "Active backend changed"),
                None => tracing::warn!("No healthy backend available"),
            }
            inner.active = new_active;
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBackend for BackendRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    /// Fails fast with NoHealthyBackend before touching any process
    async fn send_prompt(&self, ctx: &PromptContext, text: &str) -> Result<String, PromptError> {
        let backend = self
            .active_backend()
            .ok_or_else(PromptError::no_healthy_backend)?;
        backend.send_prompt(ctx, text).await
    }

    async fn close(&self) -> Result<(), PromptError> {
        self.close_all()
            .await
            .map_err(|e| PromptError::new(ErrorKind::Closed, e.to_string()))
    }

    async fn health_check(&self) -> Result<(), String> {
        self.health_check_all().await;
        match self.active() {
            Some(_) => Ok(()),
            None => Err("no healthy backend".to_string()),
        }
    }

    fn label(&self) -> String {
        match self.active_backend() {
            Some(backend) => backend.label(),
            None => "no active backend".to_string(),
        }
    }

    fn status(&self) -> StatusSnapshot {
        match self.active_backend() {
            Some(backend) => backend.status(),
            None => StatusSnapshot {
                backend: self.name().to_string(),
                ..StatusSnapshot::default()
            },
        }
    }
}

/// Factory function that creates a backend from a JSON config value
pub type BackendFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn AgentBackend>> + Send + Sync>;

/// Maps config `type` strings to backend constructors
pub struct BackendCatalog {
    factories: HashMap<String, BackendFactory>,
}

impl BackendCatalog {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory by type name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn AgentBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a backend by type name with the given config
    pub fn create(&self, name: &str, config: &Value) -> Result<Arc<dyn AgentBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("Unknown backend type: {}", name))?;
        factory(config)
    }

    /// List available type names
    pub fn available(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for BackendCatalog {
    fn default() -> Self {
        use crate::backends::claude_cli::ClaudeCliBackend;
        use crate::backends::gemini_cli::GeminiCliBackend;
        use crate::backends::mock::MockBackend;
        use crate::backends::rpc::RpcBackend;

        Self::new()
            .register("rpc", |config| {
                Ok(Arc::new(RpcBackend::from_json(config)?) as Arc<dyn AgentBackend>)
            })
            .register("claude", |config| {
                Ok(Arc::new(ClaudeCliBackend::from_json(config)?) as Arc<dyn AgentBackend>)
            })
            .register("gemini", |config| {
                Ok(Arc::new(GeminiCliBackend::from_json(config)?) as Arc<dyn AgentBackend>)
            })
            .register("mock", |_config| {
                Ok(Arc::new(MockBackend::new()) as Arc<dyn AgentBackend>)
            })
    }
}
