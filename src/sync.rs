//! Makes asynchronous side effects look synchronous: arm a watch for the
//! confirmation line, apply the mutation, then wait for the line.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::patterns::PatternSet;
use crate::watcher::{self, WatchGroup, WatchOptions};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

pub const SETTINGS_UPDATED: &str = "Settings updated";
pub const SENTINEL_SETTINGS_LOADED: &str = "Reminder messages allowed between";
pub const SERVICE_WORKER_GENERATED: &str = "Service worker generated successfully";

/// Logged by the api once a saved form needs no further processing.
pub fn form_processed_pattern(form_id: &str) -> String {
    format!(
        r#"Form with ID "{}" does not need to be updated"#,
        regex::escape(form_id)
    )
}

/// Which service confirms that new settings are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettingsChannel {
    #[default]
    Api,
    Sentinel,
}

/// A log line expected from a service once a mutation has been applied.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub service: String,
    pub patterns: PatternSet,
    pub options: WatchOptions,
}

impl Confirmation {
    pub fn new(service: impl Into<String>, patterns: PatternSet) -> Self {
        Self {
            service: service.into(),
            patterns,
            options: WatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(channel: SettingsChannel) -> Result<Self> {
        Ok(match channel {
            SettingsChannel::Api => Self::new("api", PatternSet::new([SETTINGS_UPDATED])?),
            SettingsChannel::Sentinel => {
                Self::new("sentinel", PatternSet::new([SENTINEL_SETTINGS_LOADED])?)
            }
        })
    }

    pub fn form_processed(form_id: &str) -> Result<Self> {
        Ok(Self::new(
            "api",
            PatternSet::new([form_processed_pattern(form_id)])?,
        ))
    }
}

/// Result of a mutation that can turn out to be a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied<T> {
    Changed(T),
    /// Nothing changed, so no confirmation will be logged.
    Unchanged(T),
}

impl<T> Applied<T> {
    pub fn into_inner(self) -> T {
        match self {
            Applied::Changed(v) | Applied::Unchanged(v) => v,
        }
    }
}

/// Acknowledgement used when no confirmation line is watched, e.g. a reload prompt in a UI.
pub type Acknowledge<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// `'a` borrows the backend; `'f` is whatever the fallback acknowledgement borrows.
pub struct SyncedMutation<'a, 'f> {
    backend: &'a dyn Backend,
    confirmations: Vec<Confirmation>,
    fallback: Option<Acknowledge<'f>>,
}

impl<'a> SyncedMutation<'a, 'static> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            confirmations: Vec::new(),
            fallback: None,
        }
    }
}

impl<'a, 'f> SyncedMutation<'a, 'f> {
    pub fn confirm_with(mut self, confirmation: Confirmation) -> Self {
        self.confirmations.push(confirmation);
        self
    }

    pub fn confirm_all(mut self, confirmations: impl IntoIterator<Item = Confirmation>) -> Self {
        self.confirmations.extend(confirmations);
        self
    }

    /// Runs after the mutation when nothing is watched.
    pub fn acknowledge_with<'g>(self, ack: Acknowledge<'g>) -> SyncedMutation<'a, 'g> {
        SyncedMutation {
            backend: self.backend,
            confirmations: self.confirmations,
            fallback: Some(ack),
        }
    }

    pub async fn run<T, F>(self, mutation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.run_conditional(async { mutation.await.map(Applied::Changed) })
            .await
    }

    /// Like `run`; an `Unchanged` result cancels the watches instead of awaiting them.
    pub async fn run_conditional<T, F>(self, mutation: F) -> Result<T>
    where
        F: Future<Output = Result<Applied<T>>>,
    {
        if self.confirmations.is_empty() {
            let value = mutation.await?.into_inner();
            if let Some(ack) = self.fallback {
                ack().await?;
            }
            return Ok(value);
        }

        let group = arm(self.backend, self.confirmations).await?;
        match mutation.await {
            Err(e) => {
                group.cancel_all();
                Err(e)
            }
            Ok(Applied::Unchanged(value)) => {
                debug!("Mutation changed nothing, cancelling {} watches", group.len());
                group.cancel_all();
                Ok(value)
            }
            Ok(Applied::Changed(value)) => {
                group.wait_all().await?;
                Ok(value)
            }
        }
    }
}

/// Arms one watch per confirmation. A failure part-way drops, and so cancels, the ones already armed.
async fn arm(backend: &dyn Backend, confirmations: Vec<Confirmation>) -> Result<WatchGroup> {
    let mut group = WatchGroup::default();
    for c in confirmations {
        let handle = watcher::watch(backend, &c.service, c.patterns, c.options).await?;
        group.push(handle);
    }
    Ok(group)
}

/// Holds a value that must be reverted before the next one is stored,
/// such as the settings in place before a test changed them.
pub struct RevertSlot<T> {
    what: &'static str,
    value: Mutex<Option<T>>,
}

impl<T> RevertSlot<T> {
    pub const fn new(what: &'static str) -> Self {
        Self {
            what,
            value: Mutex::new(None),
        }
    }

    pub fn store(&self, value: T) -> Result<()> {
        let mut slot = self.value.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return Err(Error::AlreadyPending {
                what: self.what.to_string(),
            });
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn take(&self) -> Option<T> {
        self.value.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    pub fn is_pending(&self) -> bool {
        self.value
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}
