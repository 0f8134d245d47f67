//! Level-triggered log collection over a window the caller opens and closes.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::patterns::PatternSet;
use crate::stream::{LogStream, StreamCloser, StreamEvent};
use crate::types::{CommandSpec, LogChunk};
use futures::{FutureExt, StreamExt};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const COLLECT_SAFETY_TIMEOUT: Duration = Duration::from_secs(180);
const DRAIN_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Hard limit on how long the window may stay open.
    pub safety_timeout: Duration,
    /// Pause before closing so the backend can flush buffered output.
    pub flush_grace: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            safety_timeout: COLLECT_SAFETY_TIMEOUT,
            flush_grace: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct Collected {
    matches: Vec<String>,
    errors: Vec<String>,
    log: String,
}

/// An open collection window. `stop` consumes the handle, so it runs at most once.
pub struct CollectorHandle {
    target: String,
    flush_grace: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Collected>>,
    closer: StreamCloser,
}

impl CollectorHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Closes the window and returns every matching line seen since priming, in order.
    pub async fn stop(mut self) -> Result<Vec<String>> {
        if !self.flush_grace.is_zero() {
            tokio::time::sleep(self.flush_grace).await;
        }
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        let collected = match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| Collected {
                errors: vec![format!("collector task failed: {}", e)],
                ..Default::default()
            }),
            None => Collected::default(),
        };
        self.closer.close();

        if !collected.errors.is_empty() {
            warn!(
                "Collecting logs of {} failed: {}",
                self.target,
                collected.errors.join("; ")
            );
            return Err(Error::CollectionFailed {
                target: self.target.clone(),
                partial_lines: collected.matches,
                errors: collected.errors,
                log: collected.log,
            });
        }

        info!(
            "Collected {} matching lines from {}",
            collected.matches.len(),
            self.target
        );
        Ok(collected.matches)
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.closer.close();
    }
}

/// Opens a collection window on a service's log. Returns once the priming line arrived.
pub async fn collect(
    backend: &dyn Backend,
    service: &str,
    patterns: PatternSet,
    options: CollectOptions,
) -> Result<CollectorHandle> {
    let target = backend.resolve_target(service)?;
    let spec = backend.log_command(&target, true, Some(1));
    let options = CollectOptions {
        flush_grace: options.flush_grace.max(backend.log_flush_grace()),
        ..options
    };
    collect_command(&spec, target.as_str(), patterns, options).await
}

/// Same as [`collect`] for an already built log command.
pub async fn collect_command(
    spec: &CommandSpec,
    target: &str,
    patterns: PatternSet,
    options: CollectOptions,
) -> Result<CollectorHandle> {
    let deadline = Instant::now() + options.safety_timeout;
    let mut stream = LogStream::open(spec, target)?;
    let closer = stream.closer();
    let mut collected = Collected::default();

    // Errors before priming are kept and reported when the window is closed.
    let primed = match tokio::time::timeout_at(deadline, prime(&mut stream, &mut collected)).await
    {
        Ok(Ok(priming)) => {
            debug!("Collector on {} primed with: {}", target, priming.text);
            true
        }
        Ok(Err(e)) => {
            collected.errors.push(e.to_string());
            false
        }
        Err(_) => {
            collected
                .errors
                .push("Timed out waiting for first log line".to_string());
            stream.close();
            false
        }
    };

    let (stop_tx, stop_rx) = oneshot::channel();
    info!("Collecting {} from {}", patterns.describe(), target);
    let task = tokio::spawn(run_collect(
        stream, patterns, deadline, stop_rx, collected, !primed,
    ));

    Ok(CollectorHandle {
        target: target.to_string(),
        flush_grace: options.flush_grace,
        stop_tx: Some(stop_tx),
        task: Some(task),
        closer,
    })
}

/// Waits for the first chunk. An exit or read error seen on the way is an
/// out-of-band failure even if the priming line follows it.
async fn prime(stream: &mut LogStream, collected: &mut Collected) -> Result<LogChunk> {
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Chunk(chunk) => return Ok(chunk),
            other => absorb(collected, &PatternSet::empty(), other),
        }
    }
    Err(Error::StreamEnded {
        target: stream.target().to_string(),
    })
}

async fn run_collect(
    mut stream: LogStream,
    patterns: PatternSet,
    deadline: Instant,
    mut stop_rx: oneshot::Receiver<()>,
    mut collected: Collected,
    mut ended: bool,
) -> Collected {
    let target = stream.target().to_string();

    loop {
        tokio::select! {
            event = stream.next(), if !ended => match event {
                Some(event) => absorb(&mut collected, &patterns, event),
                None => ended = true,
            },
            _ = &mut stop_rx => {
                // Lines already read count as part of the window.
                let mut budget = DRAIN_LIMIT;
                while budget > 0
                    && !ended
                    && let Some(Some(event)) = stream.next().now_or_never()
                {
                    absorb(&mut collected, &patterns, event);
                    budget -= 1;
                }
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                collected
                    .errors
                    .push(format!("Collector safety timeout elapsed for {}", target));
                break;
            }
        }
    }

    stream.close();
    collected
}

fn absorb(collected: &mut Collected, patterns: &PatternSet, event: StreamEvent) {
    match event {
        StreamEvent::Chunk(chunk) => {
            collected.log.push_str(&chunk.text);
            collected.log.push('\n');
            collected
                .matches
                .extend(patterns.matching_lines(&chunk.text).map(str::to_string));
        }
        StreamEvent::Error(e) => collected.errors.push(e),
        StreamEvent::Exited(code) => collected
            .errors
            .push(format!("log process exited with code {:?}", code)),
    }
}
