//! Edge-triggered log watches: resolve on the first matching line or fail at the deadline.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::patterns::PatternSet;
use crate::stream::{LogStream, StreamCloser, StreamEvent};
use crate::types::{CommandSpec, LogChunk};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Deadline measured from the moment the watch is armed.
    pub timeout: Duration,
    /// Start from the last line instead of the whole log. Ignored on backends that always tail.
    pub tail: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WATCH_TIMEOUT,
            tail: true,
        }
    }
}

impl WatchOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A line matched one of the patterns.
    Matched(String),
    /// No patterns were given and this line arrived.
    Activity(String),
    Cancelled,
}

type Settlement = Arc<Mutex<Option<oneshot::Sender<Result<WatchOutcome>>>>>;

/// Settles the watch if nobody has yet. Returns whether this call did it.
fn settle(slot: &Settlement, outcome: Result<WatchOutcome>) -> bool {
    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
            true
        }
        None => false,
    }
}

fn is_settled(slot: &Settlement) -> bool {
    match slot.lock() {
        Ok(guard) => guard.is_none(),
        Err(poisoned) => poisoned.into_inner().is_none(),
    }
}

/// One in-flight watch. Dropping an unsettled handle cancels it.
pub struct WatchHandle {
    target: String,
    result: Option<oneshot::Receiver<Result<WatchOutcome>>>,
    canceller: WatchCanceller,
}

/// Cancels a watch from anywhere; cloning shares the same watch.
#[derive(Clone)]
pub struct WatchCanceller {
    target: String,
    settlement: Settlement,
    closer: StreamCloser,
}

impl WatchCanceller {
    /// Settles the watch as cancelled and closes its log process.
    /// No effect once the watch has settled.
    pub fn cancel(&self) {
        if settle(&self.settlement, Ok(WatchOutcome::Cancelled)) {
            debug!("Watch on {} cancelled", self.target);
        }
        self.closer.close();
    }

    pub fn is_settled(&self) -> bool {
        is_settled(&self.settlement)
    }
}

impl WatchHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> WatchCanceller {
        self.canceller.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.canceller.is_settled()
    }

    /// Resolves once the log process behind this watch has exited.
    pub async fn process_exited(&self) {
        self.canceller.closer.wait_exited().await;
    }

    /// Waits for the watch to settle.
    pub async fn wait(mut self) -> Result<WatchOutcome> {
        let Some(rx) = self.result.take() else {
            return Ok(WatchOutcome::Cancelled);
        };
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::StreamEnded {
                target: self.target.clone(),
            }),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if !self.canceller.is_settled() {
            self.canceller.cancel();
        }
    }
}

/// Watches a service's log. Returns once the priming line arrived, so the caller
/// can trigger the awaited event right after.
pub async fn watch(
    backend: &dyn Backend,
    service: &str,
    patterns: PatternSet,
    options: WatchOptions,
) -> Result<WatchHandle> {
    let target = backend.resolve_target(service)?;
    let tail = (options.tail || backend.force_tail()).then_some(1);
    let spec = backend.log_command(&target, true, tail);
    watch_command(&spec, target.as_str(), patterns, options).await
}

/// Same as [`watch`] for an already built log command.
pub async fn watch_command(
    spec: &CommandSpec,
    target: &str,
    patterns: PatternSet,
    options: WatchOptions,
) -> Result<WatchHandle> {
    let deadline = Instant::now() + options.timeout;
    let mut stream = LogStream::open(spec, target)?;

    match tokio::time::timeout_at(deadline, wait_for_priming(&mut stream)).await {
        Ok(Ok(priming)) => {
            debug!("Watch on {} primed with: {}", target, priming.text);
        }
        Ok(Err(e)) => {
            stream.close();
            return Err(e);
        }
        Err(_) => {
            stream.close();
            warn!("No log line from {} before the watch deadline", target);
            return Err(Error::WatchTimeout {
                target: target.to_string(),
                timeout: options.timeout,
                accumulated_log: String::new(),
            });
        }
    }

    let (tx, rx) = oneshot::channel();
    let settlement: Settlement = Arc::new(Mutex::new(Some(tx)));
    let canceller = WatchCanceller {
        target: target.to_string(),
        settlement: settlement.clone(),
        closer: stream.closer(),
    };

    info!(
        "Watching {} for {}",
        target,
        if patterns.is_empty() {
            "any output".to_string()
        } else {
            patterns.describe()
        }
    );
    tokio::spawn(run_watch(
        stream,
        patterns,
        deadline,
        options.timeout,
        settlement,
    ));

    Ok(WatchHandle {
        target: target.to_string(),
        result: Some(rx),
        canceller,
    })
}

/// Consumes events until the first chunk, which is discarded by the caller.
async fn wait_for_priming(stream: &mut LogStream) -> Result<LogChunk> {
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Chunk(chunk) => return Ok(chunk),
            StreamEvent::Error(e) => debug!("{}: {}", stream.target(), e),
            // Readers may still hold buffered lines; the stream ends when they are done.
            StreamEvent::Exited(code) => {
                debug!("Log process for {} exited early ({:?})", stream.target(), code)
            }
        }
    }
    Err(Error::StreamEnded {
        target: stream.target().to_string(),
    })
}

async fn run_watch(
    mut stream: LogStream,
    patterns: PatternSet,
    deadline: Instant,
    timeout: Duration,
    settlement: Settlement,
) {
    let target = stream.target().to_string();
    let mut accumulated = String::new();
    let mut ended = false;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let error = Error::WatchTimeout {
                    target: target.clone(),
                    timeout,
                    accumulated_log: accumulated.clone(),
                };
                if settle(&settlement, Err(error)) {
                    warn!(
                        "Found logs {:?} for {}, none matched {}",
                        accumulated,
                        target,
                        patterns.describe()
                    );
                }
                break;
            }
            event = stream.next(), if !ended => {
                if is_settled(&settlement) {
                    break;
                }
                match event {
                    Some(StreamEvent::Chunk(chunk)) => {
                        accumulated.push_str(&chunk.text);
                        accumulated.push('\n');
                        let outcome = if patterns.is_empty() {
                            Some(WatchOutcome::Activity(chunk.text))
                        } else {
                            patterns
                                .first_match(&chunk.text)
                                .map(|line| WatchOutcome::Matched(line.to_string()))
                        };
                        if let Some(outcome) = outcome {
                            if settle(&settlement, Ok(outcome)) {
                                debug!("Watch on {} resolved", target);
                            }
                            break;
                        }
                    }
                    Some(StreamEvent::Error(e)) => debug!("{}: {}", target, e),
                    Some(StreamEvent::Exited(code)) => {
                        debug!("Log process for {} exited ({:?}) while watching", target, code)
                    }
                    None => ended = true,
                }
            }
        }
    }

    stream.close();
}

/// Several watches armed together and awaited as one.
#[derive(Default)]
pub struct WatchGroup {
    handles: Vec<WatchHandle>,
}

impl WatchGroup {
    pub fn new(handles: Vec<WatchHandle>) -> Self {
        Self { handles }
    }

    pub fn push(&mut self, handle: WatchHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn cancel_all(&self) {
        for handle in &self.handles {
            handle.cancel();
        }
    }

    /// Waits for every watch; the first failure cancels the rest.
    pub async fn wait_all(self) -> Result<Vec<WatchOutcome>> {
        futures::future::try_join_all(self.handles.into_iter().map(WatchHandle::wait)).await
    }
}
