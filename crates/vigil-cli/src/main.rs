use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use vigil_core::{
    CancelToken, Classification, Monitor, MonitorError, MonitorEvent, Resource, StartStatus,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "File and directory integrity monitor", long_about = None)]
struct Cli {
    /// Registry database file (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a file or directory for monitoring
    Add { path: PathBuf },
    /// Remove a registered resource
    Remove { path: PathBuf },
    /// List registered resources
    List {
        #[arg(long)]
        json: bool,
    },
    /// Recompute and store baselines for all resources
    Update,
    /// Verify all resources against their baselines
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Run the background check until a violation or Ctrl-C
    Watch {
        /// Check interval, e.g. 30s, 5m, 1h (bare number = seconds)
        #[arg(long, default_value = "10s")]
        interval: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let monitor = Arc::new(Monitor::open(&db_path(cli.db)?)?);

    match cli.command {
        Commands::Add { path } => add(&monitor, &path),
        Commands::Remove { path } => remove(&monitor, &path),
        Commands::List { json } => list(&monitor, json),
        Commands::Update => update(monitor).await,
        Commands::Check { json } => check(monitor, json).await,
        Commands::Watch { interval } => watch(&monitor, &interval).await,
    }
}

fn db_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }
    let dirs = directories::ProjectDirs::from("dev", "vigil", "vigil")
        .ok_or_else(|| anyhow!("could not determine a data directory"))?;
    std::fs::create_dir_all(dirs.data_dir())?;
    Ok(dirs.data_dir().join("vigil.db"))
}

fn add(monitor: &Monitor, path: &std::path::Path) -> Result<()> {
    match monitor.add_resource(path) {
        Ok(resource) => {
            println!("registered {} ({})", resource.path, resource.kind.as_str());
            Ok(())
        }
        Err(MonitorError::DuplicatePath(path)) => {
            println!("{path} is already registered");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn remove(monitor: &Monitor, path: &std::path::Path) -> Result<()> {
    if monitor.remove_resource(path)? {
        println!("removed {}", path.display());
    } else {
        println!("{} is not registered", path.display());
    }
    Ok(())
}

fn list(monitor: &Monitor, json: bool) -> Result<()> {
    let resources = monitor.list_resources()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&resources)?);
        return Ok(());
    }
    if resources.is_empty() {
        println!("no resources registered");
        return Ok(());
    }
    print_table(&resources, None);
    Ok(())
}

async fn update(monitor: Arc<Monitor>) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let count =
        tokio::task::spawn_blocking(move || monitor.update_baselines(&cancel)).await??;
    println!("baselines updated for {count} resource(s)");
    Ok(())
}

async fn check(monitor: Arc<Monitor>, json: bool) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let runner = monitor.clone();
    let results = tokio::task::spawn_blocking(move || runner.check_integrity(&cancel)).await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let resources = monitor.list_resources()?;
    if resources.is_empty() {
        println!("no resources registered");
        return Ok(());
    }
    print_table(&resources, Some(&results));

    let failed = results.values().filter(|c| **c == Classification::Failed).count();
    if failed > 0 {
        println!("\nINTEGRITY VIOLATION: {failed} resource(s) failed verification");
    }
    Ok(())
}

async fn watch(monitor: &Monitor, interval: &str) -> Result<()> {
    let interval = parse_interval(interval)?;
    let (tx, mut rx) = mpsc::channel(16);

    match monitor.start_background_check(interval, tx)? {
        StartStatus::Started => info!("background check running, Ctrl-C to stop"),
        StartStatus::AlreadyRunning => return Err(anyhow!("background check already running")),
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                monitor.stop_background_check();
            }
            event = rx.recv() => match event {
                Some(MonitorEvent::CycleCompleted { results }) => {
                    println!("cycle complete: {} resource(s) verified", results.len());
                }
                Some(MonitorEvent::ViolationDetected { count, paths }) => {
                    println!("INTEGRITY VIOLATION: {count} resource(s) failed verification");
                    for path in paths {
                        println!("  {path}");
                    }
                }
                Some(MonitorEvent::SchedulerStopped { reason }) => {
                    println!("background check stopped ({})", reason.as_str());
                    break;
                }
                None => break,
            }
        }
    }
    Ok(())
}

/// Token cancelled by the first Ctrl-C, shared with a batch run
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    cancel
}

/// Parse an interval like `30`, `30s`, `5m` or `1h` into a duration
fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| anyhow!("invalid interval: {s}"))?;
    let seconds = match unit.trim() {
        "s" | "sec" => value,
        "m" | "min" => value * 60,
        "h" | "hr" => value * 3600,
        other => return Err(anyhow!("unknown interval unit: {other}")),
    };
    Ok(Duration::from_secs(seconds))
}

fn status_mark(classification: Option<&Classification>) -> &'static str {
    match classification {
        Some(Classification::Passed) => "\u{2714}",
        Some(Classification::Failed) => "\u{2718}",
        Some(Classification::Unavailable) => "N/A",
        Some(Classification::NoHash) => "?",
        None => "",
    }
}

fn print_table(
    resources: &[Resource],
    results: Option<&std::collections::HashMap<String, Classification>>,
) {
    println!(
        "{:<6} {:<40} {:<20} {:<10} {:<20} {:<20}",
        "status", "path", "name", "kind", "added", "baseline"
    );
    for resource in resources {
        let mark = status_mark(results.and_then(|r| r.get(&resource.path)));
        let added = resource.added_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let baseline = resource
            .baseline_checked_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<40} {:<20} {:<10} {:<20} {:<20}",
            mark,
            resource.path,
            resource.name,
            resource.kind.as_str(),
            added,
            baseline
        );
    }
}
