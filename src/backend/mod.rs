pub mod cluster;
pub mod command;
pub mod compose;

pub use cluster::ClusterBackend;
pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use compose::ComposeBackend;

use crate::config::{Config, ServiceRegistry};
use crate::error::Result;
use crate::types::{BackendKind, CommandSpec, TargetId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Infrastructure a test run is deployed on. One implementation is chosen at startup.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn registry(&self) -> &ServiceRegistry;

    fn resolve_target(&self, service: &str) -> Result<TargetId> {
        self.registry().resolve(service)
    }

    async fn start(&self, service: &str) -> Result<()>;

    async fn stop(&self, service: &str) -> Result<()>;

    /// Every running unit of the deployment.
    async fn list_running_targets(&self) -> Result<Vec<TargetId>>;

    /// Running units backing one service.
    async fn running_targets_for(&self, service: &str) -> Result<Vec<TargetId>>;

    /// Whether the service's container reports itself as started.
    async fn is_ready(&self, service: &str) -> Result<bool>;

    /// Runs `command` inside the service and returns stdout and stderr combined.
    async fn exec(&self, service: &str, command: &[&str]) -> Result<String>;

    /// Units whose logs are saved to disk: every pod on a cluster, every known container on compose.
    async fn log_targets(&self) -> Result<Vec<TargetId>>;

    /// Complete (non-following) log dump of a target, used when saving logs.
    async fn dump_logs(&self, target: &TargetId) -> Result<String>;

    fn log_command(&self, target: &TargetId, follow: bool, tail_lines: Option<u32>) -> CommandSpec;

    /// Removes the deployment at the end of a run.
    async fn tear_down(&self) -> Result<()>;

    /// Start/stop return before the unit changes state, so callers must poll.
    fn is_async(&self) -> bool {
        self.kind() == BackendKind::Cluster
    }

    /// How long to wait for buffered log output before closing a collector.
    fn log_flush_grace(&self) -> Duration {
        Duration::ZERO
    }

    /// Always tail on compose; cluster logs may be read from the beginning.
    fn force_tail(&self) -> bool {
        self.kind() == BackendKind::Compose
    }
}

/// Builds the backend selected by the config, running commands through `runner`.
pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Arc<dyn Backend> {
    match config.backend {
        BackendKind::Compose => Arc::new(ComposeBackend::new(config, runner)),
        BackendKind::Cluster => Arc::new(ClusterBackend::new(config, runner)),
    }
}
