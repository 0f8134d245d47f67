use crate::error::{Error, Result};
use crate::types::CommandSpec;
use async_trait::async_trait;
use std::process::Stdio;
use tracing::{debug, error};

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, the way a terminal would interleave them at the end.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Runs a backend command to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Like `output`, but a non-zero exit becomes `BackendCommandFailed`.
    async fn run(&self, spec: &CommandSpec) -> Result<String> {
        let output = self.output(spec).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(Error::BackendCommandFailed {
                command: spec.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    verbose: bool,
}

impl SystemRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.verbose {
            debug!("Running: {}", spec);
        }
        let output = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Spawn {
                command: spec.to_string(),
                reason: e.to_string(),
            })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if self.verbose && !result.success() {
            error!(
                "`{}` exited with {:?}: {}",
                spec,
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}
