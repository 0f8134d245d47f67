//! Service orchestration and log synchronization for end-to-end test runs.
//!
//! A [`backend::Backend`] starts and stops named services on docker compose or a k3d
//! cluster. [`watcher::watch`] waits for a log line, [`collector::collect`] gathers
//! matching lines over a window, and [`sync::SyncedMutation`] combines a watch with
//! the mutation that should produce the line.

pub mod backend;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod patterns;
pub mod retry;
pub mod stream;
pub mod sync;
pub mod tail;
pub mod types;
pub mod utils;
pub mod watcher;


pub use backend::Backend;
pub use collector::{CollectOptions, CollectorHandle, collect};
pub use config::{Config, ServiceRegistry};
pub use error::{Error, Result};
pub use lifecycle::{ServiceController, StartOptions};
pub use patterns::PatternSet;
pub use sync::{Confirmation, RevertSlot, SyncedMutation};
pub use tail::LogTail;
pub use types::{BackendKind, LogChunk, TargetId};
pub use watcher::{WatchHandle, WatchOptions, WatchOutcome, watch};
