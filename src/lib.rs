// ABOUTME: Pluggable agent backend orchestration for valet.
// ABOUTME: Backends, process supervision, priority failover, and serialized dispatch.

pub mod backends;
pub mod config;
pub mod error;
pub mod health;
pub mod message;
pub mod queue;
pub mod registry;
pub mod supervisor;
pub mod traits;

pub use config::{BackendConfig, Config, ProcessConfig};
pub use error::{ErrorKind, PromptError};
pub use message::{Message, MessageKind};
pub use queue::{CompletionHandler, DispatchQueue, LongRunningHandler};
pub use registry::{BackendCatalog, BackendRegistry, BackendStatus};
pub use supervisor::ProcessSupervisor;
pub use traits::{AgentBackend, ModelSwitch, ProgressFn, PromptContext, StatusSnapshot};
