use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown service '{name}'")]
    UnknownService { name: String },

    #[error("Command `{command}` failed with exit code {exit_code:?}: {stderr}")]
    BackendCommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// The expected line never showed up. `accumulated_log` holds everything seen after priming.
    #[error("Timed out after {timeout:?} waiting for logs of {target}")]
    WatchTimeout {
        target: String,
        timeout: Duration,
        accumulated_log: String,
    },

    #[error("Log collection for {target} failed: {}", errors.join("; "))]
    CollectionFailed {
        target: String,
        partial_lines: Vec<String>,
        errors: Vec<String>,
        log: String,
    },

    #[error("Service '{service}' was not ready after {attempts} attempts")]
    ReadinessTimeout { service: String, attempts: u32 },

    #[error("Log stream for {target} ended before the first line arrived")]
    StreamEnded { target: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Could not parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{what} is already pending; the previous one was never reverted")]
    AlreadyPending { what: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unknown_service(name: impl Into<String>) -> Self {
        Self::UnknownService { name: name.into() }
    }

    /// Errors worth retrying during readiness polling.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BackendCommandFailed { .. } | Error::Json(_) | Error::Io(_)
        )
    }
}
