use backon::{ConstantBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempts: u32,
    pub delay: Duration,
}

/// Why a bounded loop stopped without success.
#[derive(Debug)]
pub enum Exhausted<E> {
    /// Every attempt ran; carries the last error, if the last attempt produced one.
    Attempts { attempts: u32, last_error: Option<E> },
    /// The operation returned an error it marked as not worth retrying.
    Fatal(E),
}

/// A single poll that did not succeed.
enum Polled<E> {
    NotYet,
    Failed(E),
}

impl Retry {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// At least one attempt always runs.
    fn total(&self) -> u32 {
        self.attempts.max(1)
    }

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.total() as usize - 1)
    }

    /// Re-issues the whole operation until it succeeds or the attempts run out.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total = self.total();
        let mut attempt = 0;
        (|| {
            attempt += 1;
            op(attempt)
        })
        .retry(self.backoff())
        .notify(|_, delay| debug!("Attempt failed, retrying in {:?} ({} attempts)", delay, total))
        .await
    }

    /// Polls `check` until it reports `true`. Errors for which `is_transient`
    /// holds count as a failed attempt; any other error stops the loop.
    pub async fn poll_until<E, F, Fut>(
        &self,
        mut check: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<u32, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let mut attempt = 0;
        let polled = (|| {
            attempt += 1;
            let current = attempt;
            let pending = check(current);
            async move {
                match pending.await {
                    Ok(true) => Ok(current),
                    Ok(false) => Err(Polled::NotYet),
                    Err(e) => Err(Polled::Failed(e)),
                }
            }
        })
        .retry(self.backoff())
        .when(|p: &Polled<E>| match p {
            Polled::NotYet => true,
            Polled::Failed(e) => is_transient(e),
        })
        .await;

        match polled {
            Ok(attempt) => Ok(attempt),
            Err(Polled::NotYet) => Err(Exhausted::Attempts {
                attempts: self.total(),
                last_error: None,
            }),
            Err(Polled::Failed(e)) if is_transient(&e) => Err(Exhausted::Attempts {
                attempts: self.total(),
                last_error: Some(e),
            }),
            Err(Polled::Failed(e)) => Err(Exhausted::Fatal(e)),
        }
    }
}
