use super::{Backend, CommandRunner};
use crate::config::{Config, ServiceRegistry};
use crate::error::{Error, Result};
use crate::types::{BackendKind, CommandSpec, TargetId};
use crate::utils::{sanitize_target, service_selector};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// k3d deployment driven through kubectl. Scaling returns before pods change state.
pub struct ClusterBackend {
    registry: ServiceRegistry,
    context_args: Vec<String>,
    env: Vec<(String, String)>,
    flush_grace: Duration,
    runner: Arc<dyn CommandRunner>,
}

/// Shape of `kubectl get pods -o json`.
#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

pub fn parse_pod_list(json: &str) -> Result<Vec<Pod>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: PodList = serde_json::from_str(json)?;
    Ok(list.items)
}

/// A pod counts as ready once its first container reports `started: true`.
pub fn first_container_started(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .and_then(|cs| cs.started)
        .unwrap_or(false)
}

fn pod_target(pod: &Pod) -> Option<TargetId> {
    pod.metadata
        .name
        .as_ref()
        .map(|name| TargetId::new(format!("pod/{}", name)))
}

impl ClusterBackend {
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let mut config = config.clone();
        config.backend = BackendKind::Cluster;
        Self {
            registry: ServiceRegistry::new(&config),
            context_args: config.kube_context_args(),
            env: config.env_pairs(),
            flush_grace: config.timeouts.cluster_flush_grace(),
            runner,
        }
    }

    /// Switches namespace and context to another project.
    pub fn with_project(mut self, project: &str) -> Self {
        self.registry.rebuild(project);
        self.context_args = vec![
            "-n".to_string(),
            project.to_string(),
            "--context".to_string(),
            format!("k3d-{}", project),
        ];
        self
    }

    /// `kubectl -n <project> --context k3d-<project> <params>`
    pub fn kubectl_command<I, S>(&self, params: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("kubectl")
            .args(self.context_args.iter().cloned())
            .args(params)
            .envs(&self.env)
    }

    async fn kubectl(&self, params: Vec<String>) -> Result<String> {
        let spec = self.kubectl_command(params);
        self.runner.run(&spec).await
    }

    async fn scale(&self, service: &str, replicas: u32) -> Result<()> {
        let unit = self.registry.unit(service)?.to_string();
        info!("Scaling deployment cht-{} to {} replicas", unit, replicas);
        self.kubectl(vec![
            "scale".into(),
            "deployment".into(),
            format!("cht-{}", unit),
            format!("--replicas={}", replicas),
        ])
        .await?;
        Ok(())
    }

    async fn running_pods(&self, service: &str) -> Result<Vec<Pod>> {
        let unit = self.registry.unit(service)?.to_string();
        let out = self
            .kubectl(vec![
                "get".into(),
                "pods".into(),
                "-l".into(),
                service_selector(&unit),
                "--field-selector=status.phase==Running".into(),
                "-o".into(),
                "json".into(),
            ])
            .await?;
        parse_pod_list(&out)
    }
}

#[async_trait]
impl Backend for ClusterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cluster
    }

    fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    async fn start(&self, service: &str) -> Result<()> {
        self.scale(service, 1).await
    }

    async fn stop(&self, service: &str) -> Result<()> {
        self.scale(service, 0).await
    }

    async fn list_running_targets(&self) -> Result<Vec<TargetId>> {
        let out = self
            .kubectl(vec![
                "get".into(),
                "pods".into(),
                "--field-selector=status.phase==Running".into(),
                "-o".into(),
                "json".into(),
            ])
            .await?;
        Ok(parse_pod_list(&out)?.iter().filter_map(pod_target).collect())
    }

    async fn running_targets_for(&self, service: &str) -> Result<Vec<TargetId>> {
        Ok(self
            .running_pods(service)
            .await?
            .iter()
            .filter_map(pod_target)
            .collect())
    }

    async fn is_ready(&self, service: &str) -> Result<bool> {
        let pods = self.running_pods(service).await?;
        let ready = pods.first().map(first_container_started).unwrap_or(false);
        debug!("Readiness of {}: {} ({} running pods)", service, ready, pods.len());
        Ok(ready)
    }

    async fn exec(&self, service: &str, command: &[&str]) -> Result<String> {
        let unit = self.registry.unit(service)?.to_string();
        let mut params = vec![
            "exec".to_string(),
            format!("deployments/cht-{}", unit),
            "--".to_string(),
        ];
        params.extend(command.iter().map(|s| s.to_string()));
        let spec = self.kubectl_command(params);
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
        let out = self
            .kubectl(vec![
                "get".into(),
                "pods".into(),
                "--no-headers".into(),
                "-o".into(),
                "name".into(),
            ])
            .await?;
        Ok(out
            .lines()
            .map(sanitize_target)
            .filter(|l| !l.is_empty())
            .map(TargetId::new)
            .collect())
    }

    async fn dump_logs(&self, target: &TargetId) -> Result<String> {
        let spec = self.log_command(target, false, None);
        let output = self.runner.output(&spec).await?;
        Ok(output.combined())
    }

    fn log_command(&self, target: &TargetId, follow: bool, tail_lines: Option<u32>) -> CommandSpec {
        let mut spec = CommandSpec::new("kubectl").arg("logs").arg(target.as_str());
        if follow {
            spec = spec.arg("-f");
        }
        if let Some(n) = tail_lines {
            spec = spec.arg(format!("--tail={}", n));
        }
        spec.args(self.context_args.iter().cloned()).envs(&self.env)
    }

    async fn tear_down(&self) -> Result<()> {
        // The k3d cluster itself is created and deleted by the surrounding tooling.
        info!(
            "Leaving cluster k3d-{} in place; delete it with k3d",
            self.registry.project()
        );
        Ok(())
    }

    fn log_flush_grace(&self) -> Duration {
        self.flush_grace
    }
}
