use super::{Backend, CommandRunner};
use crate::config::{Config, ServiceRegistry};
use crate::error::{Error, Result};
use crate::types::{BackendKind, CommandSpec, TargetId};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// docker compose deployment. start/stop block until the container changed state.
pub struct ComposeBackend {
    registry: ServiceRegistry,
    compose_files: Vec<PathBuf>,
    env: Vec<(String, String)>,
    runner: Arc<dyn CommandRunner>,
}

impl ComposeBackend {
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let mut config = config.clone();
        config.backend = BackendKind::Compose;
        Self {
            registry: ServiceRegistry::new(&config),
            compose_files: config.compose_files.clone(),
            env: config.env_pairs(),
            runner,
        }
    }

    /// Points every target at another compose project.
    pub fn with_project(mut self, project: &str) -> Self {
        self.registry.rebuild(project);
        self
    }

    /// `docker compose -f <file>... -p <project> <params>`
    pub fn compose_command<I, S>(&self, params: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new("docker").arg("compose");
        for file in &self.compose_files {
            spec = spec.arg("-f").arg(file.display().to_string());
        }
        spec.arg("-p")
            .arg(self.registry.project())
            .args(params)
            .envs(&self.env)
    }

    async fn compose(&self, params: Vec<String>) -> Result<String> {
        let spec = self.compose_command(params);
        self.runner.run(&spec).await
    }

    /// Brings the whole project down, dropping volumes.
    pub async fn down(&self) -> Result<()> {
        info!("Tearing down compose project {}", self.registry.project());
        self.compose(vec![
            "down".into(),
            "-t".into(),
            "0".into(),
            "--remove-orphans".into(),
            "--volumes".into(),
        ])
        .await?;
        Ok(())
    }
}

fn non_empty_lines(output: &str) -> Vec<TargetId> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(TargetId::new)
        .collect()
}

#[async_trait]
impl Backend for ComposeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Compose
    }

    fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    async fn start(&self, service: &str) -> Result<()> {
        let unit = self.registry.unit(service)?.to_string();
        info!("Starting compose service {}", unit);
        self.compose(vec!["start".into(), unit]).await?;
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<()> {
        let unit = self.registry.unit(service)?.to_string();
        info!("Stopping compose service {}", unit);
        self.compose(vec!["stop".into(), "-t".into(), "0".into(), unit])
            .await?;
        Ok(())
    }

    async fn list_running_targets(&self) -> Result<Vec<TargetId>> {
        let out = self
            .compose(vec![
                "ps".into(),
                "--status".into(),
                "running".into(),
                "--format".into(),
                "{{.Name}}".into(),
            ])
            .await?;
        Ok(non_empty_lines(&out))
    }

    async fn running_targets_for(&self, service: &str) -> Result<Vec<TargetId>> {
        let unit = self.registry.unit(service)?.to_string();
        let out = self
            .compose(vec![
                "ps".into(),
                "--status".into(),
                "running".into(),
                "--format".into(),
                "{{.Name}}".into(),
                unit,
            ])
            .await?;
        Ok(non_empty_lines(&out))
    }

    async fn is_ready(&self, service: &str) -> Result<bool> {
        Ok(!self.running_targets_for(service).await?.is_empty())
    }

    async fn exec(&self, service: &str, command: &[&str]) -> Result<String> {
        let unit = self.registry.unit(service)?.to_string();
        let mut params = vec!["exec".to_string(), "-T".to_string(), unit];
        params.extend(command.iter().map(|s| s.to_string()));
        let spec = self.compose_command(params);
        debug!("exec: {}", spec);
        let output = self.runner.output(&spec).await?;
        if !output.success() {
            return Err(Error::BackendCommandFailed {
                command: spec.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.combined())
    }

    async fn log_targets(&self) -> Result<Vec<TargetId>> {
        Ok(self.registry.targets().map(|(_, t)| t.clone()).collect())
    }

    async fn dump_logs(&self, target: &TargetId) -> Result<String> {
        let spec = self.log_command(target, false, None);
        let output = self.runner.output(&spec).await?;
        Ok(output.combined())
    }

    fn log_command(&self, target: &TargetId, follow: bool, tail_lines: Option<u32>) -> CommandSpec {
        let mut spec = CommandSpec::new("docker").arg("logs").arg(target.as_str());
        if follow {
            spec = spec.arg("-f");
        }
        if let Some(n) = tail_lines {
            spec = spec.arg(format!("--tail={}", n));
        }
        spec.envs(&self.env)
    }

    async fn tear_down(&self) -> Result<()> {
        self.down().await
    }
}
