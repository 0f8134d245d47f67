//! Log-following subprocess exposed as a stream of line chunks.
//!
//! One process per `LogStream`. Two reader tasks forward stdout and stderr
//! lines into a shared channel and a wait task owns the `Child`, so closing the
//! stream never has to hold a lock across an `.await`.

use crate::error::{Error, Result};
use crate::types::{CommandSpec, LogChunk, StreamSource};
use futures::Stream;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

/// Time a process gets to exit after SIGINT before it is killed.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(LogChunk),
    /// Reading one of the pipes failed.
    Error(String),
    /// The process ended; `None` when it was killed by a signal.
    Exited(Option<i32>),
}

pub struct LogStream {
    target: String,
    events: ReceiverStream<StreamEvent>,
    closer: StreamCloser,
}

/// Cloneable handle that terminates the process behind a `LogStream`.
#[derive(Clone)]
pub struct StreamCloser {
    inner: Arc<CloserInner>,
}

struct CloserInner {
    target: String,
    pid: Option<u32>,
    closed: AtomicBool,
    readers: Mutex<Vec<AbortHandle>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
}

impl LogStream {
    /// Spawns `spec` and starts forwarding its output.
    pub fn open(spec: &CommandSpec, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        debug!("Opening log stream for {}: {}", target, spec);

        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Spawn {
                command: spec.to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let handle = tokio::spawn(read_lines(stdout, StreamSource::Stdout, tx.clone()));
            readers.push(handle.abort_handle());
        }
        if let Some(stderr) = child.stderr.take() {
            let handle = tokio::spawn(read_lines(stderr, StreamSource::Stderr, tx.clone()));
            readers.push(handle.abort_handle());
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        tokio::spawn(wait_for_exit(child, target.clone(), kill_rx, tx, exited_tx));

        Ok(Self {
            closer: StreamCloser {
                inner: Arc::new(CloserInner {
                    target: target.clone(),
                    pid,
                    closed: AtomicBool::new(false),
                    readers: Mutex::new(readers),
                    kill_tx: Mutex::new(Some(kill_tx)),
                    exited: exited_rx,
                }),
            },
            events: ReceiverStream::new(rx),
            target,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    pub fn close(&self) {
        self.closer.close();
    }
}

impl Stream for LogStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.closer.close();
    }
}

impl StreamCloser {
    /// Stops both readers, then interrupts the process. Safe to call repeatedly.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing log stream for {}", inner.target);

        // Aborting the readers drops the pipe ends, so no further chunk is forwarded.
        if let Ok(mut readers) = inner.readers.lock() {
            for reader in readers.drain(..) {
                reader.abort();
            }
        }

        interrupt(inner.pid);

        if let Ok(mut kill_tx) = inner.kill_tx.lock()
            && let Some(tx) = kill_tx.take()
        {
            let _ = tx.send(());
        }
    }

    /// Resolves once the process has been reaped.
    pub async fn wait_exited(&self) {
        let mut exited = self.inner.exited.clone();
        let _ = exited.wait_for(|done| *done).await;
    }
}

#[cfg(unix)]
fn interrupt(pid: Option<u32>) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => trace!("Sent SIGINT to {}", pid),
        // Already gone
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!("Failed to interrupt log process {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: Option<u32>) {
    // The wait task kills the child once it receives the close request.
}

async fn read_lines<R>(reader: R, source: StreamSource, tx: mpsc::Sender<StreamEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                trace!("{:?}: {}", source, line);
                if tx
                    .send(StreamEvent::Chunk(LogChunk::new(source, line)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(format!("{:?} read error: {}", source, e)))
                    .await;
                break;
            }
        }
    }
    trace!("{:?} reader finished", source);
}

async fn wait_for_exit(
    mut child: Child,
    target: String,
    kill_rx: oneshot::Receiver<()>,
    tx: mpsc::Sender<StreamEvent>,
    exited: watch::Sender<bool>,
) {
    let code = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => {
                debug!("Log process for {} exited: {}", target, status);
                status.code()
            }
            Err(e) => {
                warn!("Error waiting for log process of {}: {}", target, e);
                None
            }
        },
        _ = kill_rx => {
            match tokio::time::timeout(INTERRUPT_GRACE, child.wait()).await {
                Ok(Ok(status)) => status.code(),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill log process of {}: {}", target, e);
                    }
                    child.wait().await.ok().and_then(|s| s.code())
                }
            }
        }
    };

    let _ = exited.send(true);
    let _ = tx.send(StreamEvent::Exited(code)).await;
}
