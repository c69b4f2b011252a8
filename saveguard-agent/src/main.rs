//! SaveGuard - Main entry point
//!
//! Watches a game save file, keeps timestamped backups and mirrors the save
//! folder to a remote repository.

use anyhow::Result;
use clap::{Parser, Subcommand};
use saveguard_agent::config::{self, Config, DEFAULT_CONFIG_FILE};
use saveguard_agent::daemon::pid::{self, PidFile};
use saveguard_agent::daemon::shutdown::ShutdownCoordinator;
use saveguard_agent::utils::{self, LogSink, TracingSink};
use saveguard_agent::{BackupStore, RemoteSync, SyncEvent, SyncOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the save file until interrupted
    Run,

    /// List local backups, newest first
    List {
        /// Print JSON instead of one line per backup
        #[arg(long)]
        json: bool,
    },

    /// Overwrite the live save with a backup (refused while `run` is active)
    Restore {
        /// Backup timestamp as printed by `list` (yyyy.MM.dd_HH.mm)
        timestamp: String,

        /// Restore even if a pid file says a monitor is running
        #[arg(long)]
        force: bool,
    },

    /// Detect the map name from the save folder
    DetectMap {
        /// Write the detected map name and default backup path to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let log: Arc<dyn LogSink> = Arc::new(TracingSink);

    match args.command {
        None if !config.watch.auto_start => {
            tracing::info!("Auto-start is disabled. Use `saveguard run` to start monitoring.");
            Ok(())
        }
        None | Some(Command::Run) => run(config, log).await,
        Some(Command::List { json }) => list(&config, log.as_ref(), json),
        Some(Command::Restore { timestamp, force }) => {
            restore(&config, log.as_ref(), &timestamp, force)
        }
        Some(Command::DetectMap { save }) => detect_map(config, args.config, save),
    }
}

async fn run(config: Config, log: Arc<dyn LogSink>) -> Result<()> {
    tracing::info!("Starting saveguard v{}", env!("CARGO_PKG_VERSION"));

    let target = config.watch_target(log.as_ref())?;
    let pid_file = PidFile::create(&target.backup_dir)?;
    tracing::debug!("Wrote pid file {}", pid_file.path().display());

    let detector = config.watch.detector.build(config.poll_interval(), log.clone());
    let mut orchestrator = SyncOrchestrator::new(target.clone(), detector, log.clone())
        .with_keep_backups(config.watch.keep_backups);

    let remote = match config.remote_token() {
        Some(token) => match RemoteSync::github(
            &config.remote.api_url,
            token,
            &target.base_name,
            &config.remote.clone_root,
            log.clone(),
        ) {
            Ok(remote) => Some(remote),
            Err(e) => {
                tracing::warn!("Remote sync disabled: {}", e);
                None
            }
        },
        None => {
            tracing::info!("No remote token configured, remote sync disabled");
            None
        }
    };

    let state = orchestrator.start(remote).await?;
    tracing::info!("Monitoring {} ({:?})", target.live_file().display(), state);

    // Create shutdown coordinator
    let shutdown = ShutdownCoordinator::new();

    let mut events = orchestrator.subscribe();
    let token = shutdown.token();
    let reporter = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(SyncEvent::RemotePushFailed { escalated: true, error }) => {
                    tracing::warn!("Remote push needs attention, retrying on next change: {}", error);
                }
                Ok(event) => tracing::debug!("Sync event: {:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} sync events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Wait for shutdown signal
    shutdown.wait_for_signal().await?;

    orchestrator.stop().await;
    let _ = reporter.await;
    drop(pid_file);

    tracing::info!("Shutdown complete");
    Ok(())
}

fn list(config: &Config, log: &dyn LogSink, json: bool) -> Result<()> {
    let target = config.watch_target(log)?;
    let backups = BackupStore::for_target(&target).list_backups()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups in {}", target.backup_dir.display());
    }
    for record in backups {
        println!("{}\t{}", record.timestamp, record.label);
    }
    Ok(())
}

fn restore(config: &Config, log: &dyn LogSink, timestamp: &str, force: bool) -> Result<()> {
    let target = config.watch_target(log)?;
    if force {
        tracing::warn!("Restoring without checking for a running monitor");
    } else {
        pid::ensure_no_monitor(&target.backup_dir)?;
    }
    let restored = BackupStore::for_target(&target).restore_backup(timestamp, &target.source_dir)?;
    tracing::info!("Backup {} restored to {}", timestamp, restored.display());
    Ok(())
}

fn detect_map(mut config: Config, config_path: Option<PathBuf>, save: bool) -> Result<()> {
    let map_name = config::detect_map_name(config.save_dir()?, &config.watch.extension)?;
    println!("{}", map_name);

    if save {
        if config.watch.backup_path.is_none() {
            config.watch.backup_path = Some(config::default_backup_dir(&map_name)?);
        }
        config.watch.map_name = Some(map_name);

        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        config.save_to_file(&path)?;
        tracing::info!("Saved configuration to {}", path.display());
    }
    Ok(())
}
