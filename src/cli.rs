use crate::types::BackendKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tailsync")]
#[command(about = "Start, stop and wait on the logs of end-to-end test services")]
pub struct Cli {
    /// YAML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend (compose or cluster); overrides the config file
    #[arg(short = 'b', long, global = true)]
    pub backend: Option<BackendKind>,

    /// Compose project / cluster namespace; overrides the config file
    #[arg(short = 'p', long, global = true)]
    pub project: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print the target every service resolves to
    Targets {
        /// List the units that are running right now instead
        #[arg(long)]
        running: bool,
    },

    /// Start a service
    Start {
        services: Vec<String>,
        /// Poll until the service reports started (cluster only)
        #[arg(short, long)]
        wait: bool,
    },

    /// Stop a service
    Stop { services: Vec<String> },

    /// Wait until a service logs a line matching any of the patterns
    Watch {
        service: String,
        /// Regular expressions; none means any new line
        patterns: Vec<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Scan the whole log instead of the last line (cluster only)
        #[arg(long)]
        no_tail: bool,
    },

    /// Print the matching lines a service logs during the next N seconds
    Collect {
        service: String,
        #[arg(required = true)]
        patterns: Vec<String>,
        #[arg(short, long, default_value_t = 10)]
        duration_secs: u64,
    },

    /// Send a signal (e.g. USR1) to the node process of a service
    Signal { service: String, signal: String },

    /// Run a command inside a service
    Exec {
        service: String,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Write the log of every unit to the log directory
    SaveLogs {
        /// Empty the log directory first
        #[arg(long)]
        clean: bool,
    },

    /// Print the clock of a service's container
    Date { service: String },

    /// Save logs and remove the deployment
    TearDown,
}
