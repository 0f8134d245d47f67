use clap::Parser;
use crossterm::style::Stylize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tailsync::backend::{self, SystemRunner};
use tailsync::cli::{Cli, Command};
use tailsync::lifecycle::{ServiceController, StartOptions};
use tailsync::utils::get_color;
use tailsync::{Config, LogTail, WatchOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let runner = Arc::new(SystemRunner::new(cli.verbose));
    let backend = backend::from_config(&config, runner);
    let controller = ServiceController::new(backend.clone(), &config);
    let tail = LogTail::new(backend.clone(), config.timeouts.clone());

    match cli.command {
        Command::Targets { running: false } => {
            for (name, target) in backend.registry().targets() {
                println!("{:<24} {}", name, target);
            }
        }
        Command::Targets { running: true } => {
            for target in backend.list_running_targets().await? {
                println!("{}", target);
            }
        }
        Command::Start { services, wait } => {
            let services: Vec<&str> = services.iter().map(String::as_str).collect();
            controller
                .start_many(
                    &services,
                    StartOptions {
                        wait_until_ready: wait,
                    },
                )
                .await?;
        }
        Command::Stop { services } => {
            let services: Vec<&str> = services.iter().map(String::as_str).collect();
            controller.stop_many(&services).await?;
        }
        Command::Watch {
            service,
            patterns,
            timeout_ms,
            no_tail,
        } => {
            let mut options = tail.watch_options(!no_tail);
            if let Some(ms) = timeout_ms {
                options.timeout = Duration::from_millis(ms);
            }
            let patterns = tailsync::PatternSet::new(&patterns)?;
            let handle = tailsync::watch(backend.as_ref(), &service, patterns, options).await?;
            let canceller = handle.canceller();

            let outcome = tokio::select! {
                outcome = handle.wait() => outcome?,
                _ = tokio::signal::ctrl_c() => {
                    canceller.cancel();
                    WatchOutcome::Cancelled
                }
            };
            match outcome {
                WatchOutcome::Matched(line) | WatchOutcome::Activity(line) => {
                    print_line(&service, &line)
                }
                WatchOutcome::Cancelled => warn!("Watch on {} cancelled", service),
            }
        }
        Command::Collect {
            service,
            patterns,
            duration_secs,
        } => {
            let handle = tail.collect(&service, &patterns).await?;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted, closing collector"),
            }
            for line in handle.stop().await? {
                print_line(&service, &line);
            }
        }
        Command::Signal { service, signal } => {
            controller.send_signal(&service, &signal).await?;
        }
        Command::Exec { service, command } => {
            let command: Vec<&str> = command.iter().map(String::as_str).collect();
            let output = backend.exec(&service, &command).await?;
            print!("{}", output);
        }
        Command::SaveLogs { clean } => {
            if clean {
                controller.prepare_log_dir().await?;
            }
            for path in controller.save_logs().await? {
                println!("{}", path.display());
            }
        }
        Command::Date { service } => {
            println!("{}", controller.service_date(&service).await?.to_rfc3339());
        }
        Command::TearDown => controller.tear_down().await?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?,
        None => Config::default(),
    };
    if let Some(kind) = cli.backend {
        config.backend = kind;
    }
    if let Some(project) = &cli.project {
        config.project = project.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_line(service: &str, line: &str) {
    let prefix = format!("[{}]", service).with(get_color(service));
    println!("{} {}", prefix, line);
}
