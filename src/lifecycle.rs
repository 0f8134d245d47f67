//! Start/stop of named services, with readiness polling on asynchronous backends.

use crate::backend::Backend;
use crate::config::{Config, Timeouts};
use crate::error::{Error, Result};
use crate::retry::{Exhausted, Retry};
use crate::types::ServiceState;
use crate::utils::parse_pid;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub stop_poll: Retry,
    pub start_poll: Retry,
}

impl From<&Timeouts> for LifecycleSettings {
    fn from(t: &Timeouts) -> Self {
        Self {
            stop_poll: Retry::new(
                t.stop_poll_attempts,
                Duration::from_millis(t.stop_poll_interval_ms),
            ),
            start_poll: Retry::new(
                t.start_poll_attempts,
                Duration::from_millis(t.start_poll_interval_ms),
            ),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&Timeouts::default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    pub wait_until_ready: bool,
}

pub struct ServiceController {
    backend: Arc<dyn Backend>,
    settings: LifecycleSettings,
    log_dir: PathBuf,
    states: Mutex<HashMap<String, ServiceState>>,
}

impl ServiceController {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            settings: LifecycleSettings::from(&config.timeouts),
            log_dir: config.log_dir.clone(),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Last state this controller moved the service into.
    pub fn state(&self, service: &str) -> Option<ServiceState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(service).copied())
    }

    /// Records `state` and returns the one it replaced.
    fn set_state(&self, service: &str, state: ServiceState) -> Option<ServiceState> {
        debug!("{} -> {:?}", service, state);
        self.states
            .lock()
            .ok()
            .and_then(|mut states| states.insert(service.to_string(), state))
    }

    fn restore_state(&self, service: &str, previous: Option<ServiceState>) {
        debug!("{} back to {:?}", service, previous);
        if let Ok(mut states) = self.states.lock() {
            match previous {
                Some(state) => states.insert(service.to_string(), state),
                None => states.remove(service),
            };
        }
    }

    /// A failing save or stop command puts the service back in its previous state.
    /// Once the command went through, the service stays `Stopping` if polling fails.
    pub async fn stop(&self, service: &str) -> Result<()> {
        self.backend.resolve_target(service)?;
        let previous = self.set_state(service, ServiceState::Stopping);

        let issued = async {
            if self.backend.is_async() {
                // Logs of a scaled-down pod are gone once it is garbage collected.
                self.save_logs().await?;
            }
            self.backend.stop(service).await
        };
        if let Err(e) = issued.await {
            self.restore_state(service, previous);
            return Err(e);
        }

        if self.backend.is_async() {
            let backend = self.backend.clone();
            let polled = self
                .settings
                .stop_poll
                .poll_until(
                    |attempt| {
                        let backend = backend.clone();
                        async move {
                            let running = backend.running_targets_for(service).await?;
                            debug!("{} stop check {}: {} running", service, attempt, running.len());
                            Ok::<_, Error>(running.is_empty())
                        }
                    },
                    Error::is_transient,
                )
                .await;
            match polled {
                Ok(attempt) => debug!("{} stopped after {} checks", service, attempt),
                Err(Exhausted::Fatal(e)) => return Err(e),
                Err(Exhausted::Attempts { attempts, .. }) => warn!(
                    "{} still has running pods after {} checks, proceeding anyway",
                    service, attempts
                ),
            }
        }

        self.set_state(service, ServiceState::Stopped);
        info!("Stopped {}", service);
        Ok(())
    }

    /// A failing start command puts the service back in its previous state.
    /// A readiness timeout leaves it `Starting`, since the start was issued.
    pub async fn start(&self, service: &str, options: StartOptions) -> Result<()> {
        self.backend.resolve_target(service)?;
        let previous = self.set_state(service, ServiceState::Starting);
        if let Err(e) = self.backend.start(service).await {
            self.restore_state(service, previous);
            return Err(e);
        }

        if self.backend.is_async() && options.wait_until_ready {
            self.wait_until_ready(service).await?;
        }

        self.set_state(service, ServiceState::Running);
        info!("Started {}", service);
        Ok(())
    }

    /// Polls until the service's first container reports started.
    pub async fn wait_until_ready(&self, service: &str) -> Result<()> {
        if !self.backend.is_async() {
            // Compose containers are up once `start` returns.
            return Ok(());
        }
        let backend = self.backend.clone();
        let polled = self
            .settings
            .start_poll
            .poll_until(
                |_| {
                    let backend = backend.clone();
                    async move { backend.is_ready(service).await }
                },
                Error::is_transient,
            )
            .await;
        match polled {
            Ok(attempt) => {
                debug!("{} ready after {} checks", service, attempt);
                Ok(())
            }
            Err(Exhausted::Fatal(e)) => Err(e),
            Err(Exhausted::Attempts {
                attempts,
                last_error,
            }) => {
                if let Some(e) = last_error {
                    warn!("Last readiness check of {} failed: {}", service, e);
                }
                Err(Error::ReadinessTimeout {
                    service: service.to_string(),
                    attempts,
                })
            }
        }
    }

    /// Stops services one after another, in the given order.
    pub async fn stop_many(&self, services: &[&str]) -> Result<()> {
        for service in services {
            self.stop(service).await?;
        }
        Ok(())
    }

    pub async fn start_many(&self, services: &[&str], options: StartOptions) -> Result<()> {
        for service in services {
            self.start(service, options).await?;
        }
        Ok(())
    }

    /// Recreates an empty log directory.
    pub async fn prepare_log_dir(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.log_dir).await? {
            tokio::fs::remove_dir_all(&self.log_dir).await?;
        }
        tokio::fs::create_dir_all(&self.log_dir).await?;
        Ok(())
    }

    /// Writes the full log of every unit to `<log_dir>/<unit>.log`, overwriting old files.
    pub async fn save_logs(&self) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.log_dir).await?;
        let mut written = Vec::new();
        for target in self.backend.log_targets().await? {
            let text = self.backend.dump_logs(&target).await?;
            let path = self
                .log_dir
                .join(format!("{}.log", target.log_file_stem()));
            tokio::fs::write(&path, text).await?;
            debug!("Saved logs of {} to {}", target, path.display());
            written.push(path);
        }
        info!(
            "Saved {} log files to {}",
            written.len(),
            self.log_dir.display()
        );
        Ok(written)
    }

    /// Saves logs, then removes the deployment.
    pub async fn tear_down(&self) -> Result<()> {
        self.save_logs().await?;
        self.backend.tear_down().await
    }

    /// Delivers `signal` (e.g. `USR1`) to the newest node process inside the service.
    pub async fn send_signal(&self, service: &str, signal: &str) -> Result<()> {
        let output = self
            .backend
            .exec(service, &["/bin/bash", "-c", "pgrep -n node"])
            .await?;
        let pid = parse_pid(&output).ok_or_else(|| Error::Parse {
            what: format!("pid of node in {}", service),
            message: output.trim().to_string(),
        })?;
        let kill = format!("kill -s {} {}", signal, pid);
        self.backend
            .exec(service, &["/bin/bash", "-c", &kill])
            .await?;
        info!("Sent SIG{} to {} (pid {})", signal, service, pid);
        Ok(())
    }

    pub async fn toggle_sentinel_transitions(&self) -> Result<()> {
        self.send_signal("sentinel", "USR1").await
    }

    pub async fn run_sentinel_tasks(&self) -> Result<()> {
        self.send_signal("sentinel", "USR2").await
    }

    /// Clock of the service's container, read with `date -R`.
    pub async fn service_date(&self, service: &str) -> Result<chrono::DateTime<chrono::Utc>> {
        let output = self.backend.exec(service, &["date", "-R"]).await?;
        chrono::DateTime::parse_from_rfc2822(output.trim())
            .map(|d| d.with_timezone(&chrono::Utc))
            .map_err(|e| Error::Parse {
                what: format!("date of {}", service),
                message: e.to_string(),
            })
    }
}
