//! CLI module - command-line interface for pagesync

/// Clap argument definitions
mod args;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::debug;

use pagesync_core::config::{GlobalConfig, WorkspaceConfig, parse_remote_url};
use pagesync_core::engine::{RunSummary, SyncEngine};
use pagesync_core::error::SyncError;
use pagesync_core::fs::RealFileSystem;
use pagesync_core::reconcile::{Op, Resolution};
use pagesync_core::remote::{HttpRemote, RateLimiter, RateLimiterConfig, RemoteClient};
use pagesync_core::state::StateStore;
use pagesync_core::watcher::{WatchDaemon, WatchOptions};
use pagesync_core::workspace::{Workspace, WorkspaceLock};

pub use args::Cli;
use args::{Commands, ResolveChoice};

/// Exit code when a run completes but conflicts need resolution.
const EXIT_CONFLICTS: i32 = 1;
/// Exit code for usage errors and invalid local state.
const EXIT_USAGE: i32 = 2;
/// Exit code for remote or authentication failures.
const EXIT_REMOTE: i32 = 3;
/// Exit code for state corruption.
const EXIT_CORRUPT: i32 = 4;

/// Main entry point for the CLI. Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let workspace_dir = cli
        .workspace
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let result = match cli.command {
        Commands::Init { remote_url, path } => {
            handle_init(&remote_url, path.unwrap_or(workspace_dir))
        }
        Commands::Pull { force } => handle_run(&workspace_dir, RunKind::Pull { force }).await,
        Commands::Push { force } => handle_run(&workspace_dir, RunKind::Push { force }).await,
        Commands::Sync => handle_run(&workspace_dir, RunKind::Sync).await,
        Commands::Status => handle_status(&workspace_dir).await,
        Commands::Resolve { path, choice } => {
            handle_resolve(&workspace_dir, &path, &choice).await
        }
        Commands::Watch { interval, debounce } => {
            handle_watch(&workspace_dir, interval, debounce).await
        }
        Commands::List => handle_list(),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &SyncError) -> i32 {
    match err {
        SyncError::StateCorrupt(_) => EXIT_CORRUPT,
        SyncError::Auth(_)
        | SyncError::NoToken
        | SyncError::Http(_)
        | SyncError::RemoteStatus { .. }
        | SyncError::RemoteExhausted { .. }
        | SyncError::RemoteNotFound(_)
        | SyncError::RemoteTimeout(_) => EXIT_REMOTE,
        _ => EXIT_USAGE,
    }
}

enum RunKind {
    Pull { force: bool },
    Push { force: bool },
    Sync,
}

type Engine = SyncEngine<RealFileSystem>;

/// Open the workspace, take its lock, and build the engine stack.
///
/// The lock guard must stay alive for the whole run.
fn open_engine(workspace_dir: &PathBuf) -> Result<(Engine, WorkspaceLock), SyncError> {
    let fs = RealFileSystem;
    let workspace = Workspace::open(&fs, workspace_dir)?;
    let lock = WorkspaceLock::acquire(&workspace)?;
    let store = StateStore::load(fs, workspace.state_path())?;

    let token = GlobalConfig::load()?.token()?;
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
    let remote: Arc<dyn RemoteClient> = Arc::new(HttpRemote::new(
        &workspace.config.remote_base_url,
        &token,
        limiter,
    )?);
    debug!(root = %workspace.root.display(), "workspace opened");
    Ok((SyncEngine::new(fs, workspace, store, remote), lock))
}

fn handle_init(remote_url: &str, path: PathBuf) -> Result<i32, SyncError> {
    let root_id = parse_remote_url(remote_url)?;
    let workspace = Workspace::init(&RealFileSystem, &path, WorkspaceConfig::new(&root_id))?;

    let mut global = GlobalConfig::load()?;
    global.register_workspace(&workspace.root);
    global.save()?;

    println!(
        "Initialized workspace at {} (remote root {root_id})",
        workspace.root.display()
    );
    println!("Run 'pagesync pull' to fetch the remote tree.");
    Ok(0)
}

async fn handle_run(workspace_dir: &PathBuf, kind: RunKind) -> Result<i32, SyncError> {
    let (mut engine, _lock) = open_engine(workspace_dir)?;
    let summary = match kind {
        RunKind::Pull { force } => engine.pull(force).await?,
        RunKind::Push { force } => engine.push(force).await?,
        RunKind::Sync => engine.sync().await?,
    };
    print_summary(&summary);

    let unresolved = engine.unresolved_paths();
    if !unresolved.is_empty() {
        println!("Unresolved entries:");
        for path in &unresolved {
            println!("  {path}");
        }
        println!("Use 'pagesync resolve <path> --keep-local|--keep-remote|--keep-both'.");
        return Ok(EXIT_CONFLICTS);
    }
    if summary.failed > 0 {
        return Ok(EXIT_REMOTE);
    }
    Ok(0)
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} synced, {} conflicted, {} failed",
        summary.succeeded, summary.conflicted, summary.failed
    );
    for err in &summary.errors {
        eprintln!("  {}: {}", err.path, err.message);
    }
}

async fn handle_status(workspace_dir: &PathBuf) -> Result<i32, SyncError> {
    let (engine, _lock) = open_engine(workspace_dir)?;
    let report = engine.status().await?;

    if report.is_clean() {
        println!("Workspace is in sync.");
        return Ok(0);
    }

    for action in &report.actions {
        let label = match action.op {
            Op::CreateRemote => "create remote",
            Op::CreateLocal => "create local",
            Op::AdoptBoth => "adopt",
            Op::Push => "push",
            Op::Pull => "pull",
            Op::DeleteRemote => "delete remote",
            Op::DeleteLocal => "delete local",
            Op::DeleteState => "forget",
            Op::MarkConflict(_) => "conflict",
            Op::MarkDeletedLocal => "deleted locally, changed remotely",
            Op::MarkDeletedRemote => "deleted remotely, changed locally",
        };
        println!("{label:>34}  {}", action.path);
    }
    if !report.unresolved.is_empty() {
        println!("Unresolved entries:");
        for path in &report.unresolved {
            println!("  {path}");
        }
    }
    println!(
        "{} pending action(s), {} unresolved",
        report.actions.len(),
        report.unresolved.len()
    );
    Ok(0)
}

async fn handle_resolve(
    workspace_dir: &PathBuf,
    path: &str,
    choice: &ResolveChoice,
) -> Result<i32, SyncError> {
    let resolution = if choice.keep_local {
        Resolution::KeepLocal
    } else if choice.keep_remote {
        Resolution::KeepRemote
    } else {
        Resolution::KeepBoth
    };

    let (mut engine, _lock) = open_engine(workspace_dir)?;
    engine.resolve(path, resolution).await?;
    println!("Resolved {path}");
    Ok(0)
}

async fn handle_watch(
    workspace_dir: &PathBuf,
    interval: Option<u64>,
    debounce: Option<u64>,
) -> Result<i32, SyncError> {
    let (engine, _lock) = open_engine(workspace_dir)?;
    let config = &engine.workspace().config;
    let options = WatchOptions {
        interval: Duration::from_secs(interval.unwrap_or(config.poll_interval_secs)),
        debounce: Duration::from_secs(debounce.unwrap_or(config.debounce_secs)),
    };

    let mut daemon = WatchDaemon::new(engine, options);
    let stop = daemon.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    daemon.run().await?;
    Ok(0)
}

fn handle_list() -> Result<i32, SyncError> {
    let global = GlobalConfig::load()?;
    if global.workspaces.is_empty() {
        println!("No workspaces configured. Run 'pagesync init <remote-url>'.");
        return Ok(0);
    }
    for root in &global.workspaces {
        match Workspace::open(&RealFileSystem, root) {
            Ok(ws) => println!("{}  (remote root {})", root.display(), ws.config.remote_root_id),
            Err(_) => println!("{}  (missing)", root.display()),
        }
    }
    Ok(0)
}
