//! Watch and collect helpers bound to a backend and the configured timeouts.

use crate::backend::Backend;
use crate::collector::{self, CollectOptions, CollectorHandle};
use crate::config::Timeouts;
use crate::error::Result;
use crate::patterns::PatternSet;
use crate::watcher::{self, WatchHandle, WatchOptions};
use std::sync::Arc;

#[derive(Clone)]
pub struct LogTail {
    backend: Arc<dyn Backend>,
    timeouts: Timeouts,
}

impl LogTail {
    pub fn new(backend: Arc<dyn Backend>, timeouts: Timeouts) -> Self {
        Self { backend, timeouts }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn watch_options(&self, tail: bool) -> WatchOptions {
        WatchOptions {
            timeout: self.timeouts.watch(),
            tail,
        }
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            safety_timeout: self.timeouts.collect_safety(),
            ..Default::default()
        }
    }

    pub async fn watch<I, S>(&self, service: &str, patterns: I, tail: bool) -> Result<WatchHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = PatternSet::new(patterns)?;
        watcher::watch(
            self.backend.as_ref(),
            service,
            patterns,
            self.watch_options(tail),
        )
        .await
    }

    pub async fn collect<I, S>(&self, service: &str, patterns: I) -> Result<CollectorHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = PatternSet::new(patterns)?;
        collector::collect(
            self.backend.as_ref(),
            service,
            patterns,
            self.collect_options(),
        )
        .await
    }

    pub async fn watch_api<I, S>(&self, patterns: I) -> Result<WatchHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.watch("api", patterns, true).await
    }

    /// With `tail` false the cluster backend scans sentinel's whole log.
    pub async fn watch_sentinel<I, S>(&self, tail: bool, patterns: I) -> Result<WatchHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.watch("sentinel", patterns, tail).await
    }

    pub async fn collect_api<I, S>(&self, patterns: I) -> Result<CollectorHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.collect("api", patterns).await
    }

    pub async fn collect_sentinel<I, S>(&self, patterns: I) -> Result<CollectorHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.collect("sentinel", patterns).await
    }

    pub async fn collect_haproxy<I, S>(&self, patterns: I) -> Result<CollectorHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.collect("haproxy", patterns).await
    }
}
