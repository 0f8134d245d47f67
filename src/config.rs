use crate::error::{Error, Result};
use crate::types::{BackendKind, TargetId};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PROJECT: &str = "cht-e2e";

/// Run configuration. Every field has a default so an empty file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,
    pub project: String,
    pub compose_files: Vec<PathBuf>,
    pub log_dir: PathBuf,
    /// Symbolic name -> compose service / deployment suffix.
    pub services: BTreeMap<String, String>,
    /// Targets living in another compose project, keyed by symbolic name.
    pub extra_targets: BTreeMap<String, ExtraTarget>,
    /// Extra environment passed to every backend command.
    pub env: BTreeMap<String, String>,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtraTarget {
    pub project: String,
    pub service: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub watch_ms: u64,
    pub collect_safety_secs: u64,
    pub cluster_flush_grace_ms: u64,
    pub stop_poll_attempts: u32,
    pub stop_poll_interval_ms: u64,
    pub start_poll_attempts: u32,
    pub start_poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            watch_ms: 20_000,
            collect_safety_secs: 180,
            cluster_flush_grace_ms: 500,
            stop_poll_attempts: 100,
            stop_poll_interval_ms: 100,
            start_poll_attempts: 100,
            start_poll_interval_ms: 500,
        }
    }
}

impl Timeouts {
    pub fn watch(&self) -> Duration {
        Duration::from_millis(self.watch_ms)
    }

    pub fn collect_safety(&self) -> Duration {
        Duration::from_secs(self.collect_safety_secs)
    }

    pub fn cluster_flush_grace(&self) -> Duration {
        Duration::from_millis(self.cluster_flush_grace_ms)
    }
}

pub fn default_services() -> BTreeMap<String, String> {
    [
        ("haproxy", "haproxy"),
        ("nginx", "nginx"),
        ("couchdb1", "couchdb-1.local"),
        ("couchdb2", "couchdb-2.local"),
        ("couchdb3", "couchdb-3.local"),
        ("api", "api"),
        ("sentinel", "sentinel"),
        ("haproxy-healthcheck", "healthcheck"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        let mut extra_targets = BTreeMap::new();
        extra_targets.insert(
            "upgrade".to_string(),
            ExtraTarget {
                project: "upgrade".to_string(),
                service: "cht-upgrade-service".to_string(),
            },
        );
        Self {
            backend: BackendKind::Compose,
            project: DEFAULT_PROJECT.to_string(),
            compose_files: vec![
                PathBuf::from("tests/cht-core-test.yml"),
                PathBuf::from("tests/cht-couchdb-cluster-test.yml"),
            ],
            log_dir: PathBuf::from("tests/logs"),
            services: default_services(),
            extra_targets,
            env: BTreeMap::new(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(Error::config("project name must not be empty"));
        }
        if let Some((name, _)) = self.services.iter().find(|(_, unit)| unit.trim().is_empty()) {
            return Err(Error::config(format!("service '{}' maps to an empty name", name)));
        }
        Ok(())
    }

    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// `-n <project> --context k3d-<project>`
    pub fn kube_context_args(&self) -> Vec<String> {
        vec![
            "-n".to_string(),
            self.project.clone(),
            "--context".to_string(),
            format!("k3d-{}", self.project),
        ]
    }
}

/// Resolves symbolic service names to backend targets. Read-only once built;
/// `rebuild` swaps in a new project name.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    kind: BackendKind,
    project: String,
    units: BTreeMap<String, String>,
    extra: BTreeMap<String, ExtraTarget>,
    targets: BTreeMap<String, TargetId>,
}

impl ServiceRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self {
            kind: config.backend,
            project: config.project.clone(),
            units: config.services.clone(),
            extra: config.extra_targets.clone(),
            targets: BTreeMap::new(),
        };
        registry.build_targets();
        registry
    }

    pub fn rebuild(&mut self, project: &str) {
        self.project = project.to_string();
        self.build_targets();
    }

    fn build_targets(&mut self) {
        self.targets = self
            .units
            .iter()
            .map(|(name, unit)| (name.clone(), target_for(self.kind, &self.project, unit)))
            .collect();
        // Other compose projects only exist on the compose backend.
        if self.kind == BackendKind::Compose {
            for (name, extra) in &self.extra {
                self.targets.insert(
                    name.clone(),
                    target_for(self.kind, &extra.project, &extra.service),
                );
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// The compose service / deployment suffix for a symbolic name.
    /// Names that are already unit names resolve to themselves.
    pub fn unit(&self, name: &str) -> Result<&str> {
        if let Some(unit) = self.units.get(name) {
            return Ok(unit);
        }
        self.units
            .values()
            .find(|unit| unit.as_str() == name)
            .map(String::as_str)
            .ok_or_else(|| Error::unknown_service(name))
    }

    pub fn resolve(&self, name: &str) -> Result<TargetId> {
        if let Some(target) = self.targets.get(name) {
            return Ok(target.clone());
        }
        let unit = self.unit(name)?;
        Ok(target_for(self.kind, &self.project, unit))
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, &TargetId)> {
        self.targets.iter().map(|(k, v)| (k.as_str(), v))
    }
}

pub fn target_for(kind: BackendKind, project: &str, unit: &str) -> TargetId {
    match kind {
        BackendKind::Compose => TargetId::new(format!("{}-{}-1", project, unit)),
        BackendKind::Cluster => TargetId::new(format!("deployment/cht-{}", unit)),
    }
}
