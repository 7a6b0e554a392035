//! CLI entry point for the SC2 replay uploader
//!
//! Parses command line arguments, loads the config file and either runs the
//! watcher until Ctrl+C or performs a one-off maintenance command.

use clap::{Parser, Subcommand};
use sc2_rsu::config::{default_config_path, default_scan_root, ConfigError};
use sc2_rsu::{
    character_id, enumerate_accounts, find_replays_root, group_toons, init_logging, region_name,
    valid_api_key, AccountPlayer, Config, Daemon, DaemonError, Sc2ReplayStatsClient,
    ToonEnablement,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Watches StarCraft II replay folders and uploads new replays to sc2replaystats
#[derive(Parser, Debug)]
#[command(name = "sc2-rsu")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of config and RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch for new replays and upload them (default)
    Run,
    /// Search for StarCraft II replays roots
    FindRoot {
        /// Directory to search (platform default if omitted)
        scan_root: Option<PathBuf>,
    },
    /// List discovered accounts and toons
    Accounts,
    /// Enable or disable uploads for a toon (`<account>/<toon>`)
    Toggle { toon: String },
    /// Validate and save the sc2replaystats API key
    SetKey { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);

    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging, args.verbose) {
        eprintln!("{}", e);
    }

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, config_path).await,
        Command::FindRoot { scan_root } => find_root(&config, scan_root),
        Command::Accounts => accounts(&config).await,
        Command::Toggle { toon } => toggle(&config_path, &toon),
        Command::SetKey { key } => set_key(&config_path, &key),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Config as stored on disk, without environment overrides, for editing.
fn load_for_edit(path: &Path) -> Result<Config, ConfigError> {
    match Config::load_from_file(path) {
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        other => other,
    }
}

async fn run(config: Config, config_path: PathBuf) -> Result<(), DaemonError> {
    let daemon = match Daemon::new(config, Some(config_path.clone())) {
        Err(DaemonError::InvalidApiKey) => {
            eprintln!(
                "No valid API key in {}. Set one with `sc2-rsu set-key <key>`.",
                config_path.display()
            );
            return Err(DaemonError::InvalidApiKey);
        }
        other => other?,
    };

    let root = match daemon.resolve_replays_root() {
        Ok(root) => root,
        Err(DaemonError::AmbiguousReplaysRoot(candidates)) => {
            let root = choose_root(&candidates)
                .await
                .ok_or(DaemonError::AmbiguousReplaysRoot(candidates))?;
            daemon.set_replays_root(&root)?;
            root
        }
        Err(e) => return Err(e),
    };
    info!(root = %root.display(), "using replays root");

    let watcher = daemon.start()?;
    let server = daemon.start_status_server();
    let reporter = tokio::spawn(report_progress(
        daemon.registry().clone(),
        daemon.pipeline().subscribe_notices(),
    ));

    println!(
        "Watching {} replay folder(s) under {}. Press Ctrl+C to stop.",
        daemon.watched_paths().len(),
        root.display()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
    }

    daemon.shutdown();
    reporter.abort();
    let _ = watcher.await;
    if let Some(server) = server {
        let _ = server.await;
    }
    Ok(())
}

/// Ask the user to pick one of several replays roots on stdin.
async fn choose_root(candidates: &[PathBuf]) -> Option<PathBuf> {
    println!("Found several StarCraft II replays roots:");
    for (i, candidate) in candidates.iter().enumerate() {
        println!("  [{}] {}", i + 1, candidate.display());
    }
    print!("Choose one [1-{}]: ", candidates.len());
    let _ = std::io::stdout().flush();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines.next_line().await.ok()??;
    let choice: usize = line.trim().parse().ok()?;

    candidates.get(choice.checked_sub(1)?).cloned()
}

/// Print registry changes and advisory notices as they happen.
async fn report_progress(
    registry: sc2_rsu::UploadRegistry,
    mut notices: tokio::sync::broadcast::Receiver<sc2_rsu::Notice>,
) {
    let mut events = registry.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(record) = registry.get(event.index).await {
                        println!("[{}] {}: {}", event.index, record.map_name, record.status);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => break,
            },
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("warning: {}: {}", notice.path.display(), notice.message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => break,
            },
        }
    }
}

fn find_root(config: &Config, scan_root: Option<PathBuf>) -> Result<(), DaemonError> {
    let scan_root = scan_root
        .or_else(|| config.replays.scan_root.clone())
        .unwrap_or_else(default_scan_root);

    let candidates = find_replays_root(&scan_root, &config.replays.multiplayer_suffix)?;
    if candidates.is_empty() {
        return Err(DaemonError::NoReplaysRoot(scan_root));
    }

    for candidate in candidates {
        println!("{}", candidate.display());
    }
    Ok(())
}

async fn accounts(config: &Config) -> Result<(), DaemonError> {
    let root = config
        .replays
        .root
        .clone()
        .ok_or_else(|| DaemonError::NoReplaysRoot(PathBuf::new()))?;
    let ids = enumerate_accounts(&root, &config.replays.multiplayer_suffix)?;

    // Player names are a nicety; skip them without a usable key
    let players = if valid_api_key(&config.api.key) {
        match Sc2ReplayStatsClient::new(&config.api)?.account_players().await {
            Ok(players) => players,
            Err(e) => {
                warn!(error = %e, "could not fetch account players");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    for group in group_toons(&ids) {
        println!("Account {}", group.account);
        for toon in &group.toons {
            let id = format!("{}/{}", group.account, toon);
            let state = if config.toon_enabled(&id) { "enabled" } else { "disabled" };
            match player_label(&players, toon) {
                Some(label) => println!("  {} ({}, {}) {}", toon, region_name(toon), label, state),
                None => println!("  {} ({}) {}", toon, region_name(toon), state),
            }
        }
    }
    Ok(())
}

fn player_label(players: &[AccountPlayer], toon: &str) -> Option<String> {
    let character = character_id(toon)?;
    players
        .iter()
        .find(|p| p.player.character_id == character)
        .map(|p| p.player.battle_tag())
}

fn toggle(config_path: &Path, toon: &str) -> Result<(), DaemonError> {
    let mut config = load_for_edit(config_path)?;
    let root = config
        .replays
        .root
        .clone()
        .ok_or_else(|| DaemonError::NoReplaysRoot(PathBuf::new()))?;

    let toons = enumerate_accounts(&root, &config.replays.multiplayer_suffix)?;
    let enablement = ToonEnablement::new();
    enablement.reset(&toons, config.toons.as_deref());

    let enabled = enablement
        .toggle(toon)
        .ok_or_else(|| DaemonError::UnknownToon(toon.to_string()))?;

    if config.set_toons(enablement.allow_list().as_deref()) {
        config.save(config_path)?;
    }
    println!("{} {}", toon, if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn set_key(config_path: &Path, key: &str) -> Result<(), DaemonError> {
    let key = key.trim();
    if !valid_api_key(key) {
        return Err(DaemonError::InvalidApiKey);
    }

    let mut config = load_for_edit(config_path)?;
    config.api.key = key.to_string();
    config.save(config_path)?;
    println!("API key saved to {}", config_path.display());
    Ok(())
}
