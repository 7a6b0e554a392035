//! Daemon composition root.
//!
//! Owns the configuration, the upload registry, toon enablement, the upload
//! pipeline and the active directory watcher. One long-lived task consumes
//! watcher events and spawns a pipeline run per created replay.

use crate::accounts::{discover_watch_paths, ToonEnablement};
use crate::client::{valid_api_key, ClientError, Sc2ReplayStatsClient, UploadClient};
use crate::config::{default_scan_root, Config, ConfigError};
use crate::pipeline::{PipelineSettings, UploadPipeline};
use crate::registry::UploadRegistry;
use crate::scan::{find_replays_root, toon_replay_dir, ScanError};
use crate::status_server::{run_status_server, StatusState};
use crate::watcher::{DirectoryWatcher, WatchError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Replay discovery failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("No StarCraft II replays root found under {0}")]
    NoReplaysRoot(PathBuf),

    #[error("Found {} possible replays roots; pick one", .0.len())]
    AmbiguousReplaysRoot(Vec<PathBuf>),

    #[error("Replays root is not a directory: {0}")]
    InvalidReplaysRoot(PathBuf),

    #[error("Invalid sc2replaystats API key")]
    InvalidApiKey,

    #[error("Unknown toon: {0}")]
    UnknownToon(String),
}

/// A watcher plus the handle that tells its consumer loop to stop.
struct ActiveWatch {
    watcher: DirectoryWatcher,
    _closed: oneshot::Sender<()>,
}

/// Daemon state containing all runtime components
pub struct Daemon {
    config: Mutex<Config>,
    /// Where to persist config changes; `None` keeps them in memory
    config_path: Option<PathBuf>,
    registry: UploadRegistry,
    enablement: ToonEnablement,
    pipeline: UploadPipeline,
    active: Mutex<Option<ActiveWatch>>,
    shutdown: watch::Sender<bool>,
}

impl Daemon {
    /// Initialize the daemon against the sc2replaystats API.
    ///
    /// Fails with [`DaemonError::InvalidApiKey`] when the configured key is
    /// malformed.
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self, DaemonError> {
        if !valid_api_key(&config.api.key) {
            return Err(DaemonError::InvalidApiKey);
        }

        let client = Arc::new(Sc2ReplayStatsClient::new(&config.api)?);
        Ok(Self::with_client(config, config_path, client))
    }

    /// Initialize the daemon with any upload client and no key check.
    pub fn with_client(
        config: Config,
        config_path: Option<PathBuf>,
        client: Arc<dyn UploadClient>,
    ) -> Self {
        let registry = UploadRegistry::new();
        let pipeline = UploadPipeline::new(
            client,
            registry.clone(),
            PipelineSettings::from(&config.upload),
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            config: Mutex::new(config),
            config_path,
            registry,
            enablement: ToonEnablement::new(),
            pipeline,
            active: Mutex::new(None),
            shutdown,
        }
    }

    fn config_guard(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_guard(&self) -> MutexGuard<'_, Option<ActiveWatch>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> Config {
        self.config_guard().clone()
    }

    pub fn registry(&self) -> &UploadRegistry {
        &self.registry
    }

    pub fn enablement(&self) -> &ToonEnablement {
        &self.enablement
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.pipeline
    }

    pub fn status_state(&self) -> StatusState {
        StatusState {
            registry: self.registry.clone(),
            enablement: self.enablement.clone(),
        }
    }

    /// Directories currently registered with the watcher.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.active_guard()
            .as_ref()
            .map(|active| active.watcher.watched())
            .unwrap_or_default()
    }

    fn persist(&self, config: &Config) -> Result<(), DaemonError> {
        if let Some(path) = &self.config_path {
            config.save(path)?;
            debug!(path = %path.display(), "saved config");
        }
        Ok(())
    }

    /// Resolve the replays root, discovering it when unset.
    ///
    /// A configured root is used as is. Otherwise the scan root is searched
    /// and a single candidate is saved. Several candidates are returned in
    /// [`DaemonError::AmbiguousReplaysRoot`] for the caller to choose from.
    pub fn resolve_replays_root(&self) -> Result<PathBuf, DaemonError> {
        let (root, scan_root, suffix) = {
            let config = self.config_guard();
            (
                config.replays.root.clone(),
                config.replays.scan_root.clone(),
                config.replays.multiplayer_suffix.clone(),
            )
        };

        if let Some(root) = root {
            if root.is_dir() {
                return Ok(root);
            }
            return Err(DaemonError::InvalidReplaysRoot(root));
        }

        let scan_root = scan_root.unwrap_or_else(default_scan_root);
        info!(scan_root = %scan_root.display(), "searching for replays root");
        let mut candidates = find_replays_root(&scan_root, &suffix)?;

        match candidates.len() {
            0 => Err(DaemonError::NoReplaysRoot(scan_root)),
            1 => {
                let root = candidates.remove(0);
                self.set_replays_root(&root)?;
                Ok(root)
            }
            _ => Err(DaemonError::AmbiguousReplaysRoot(candidates)),
        }
    }

    /// Point the daemon at a new replays root, restarting the watcher if running.
    pub fn set_replays_root(&self, root: &Path) -> Result<(), DaemonError> {
        if !root.is_dir() {
            return Err(DaemonError::InvalidReplaysRoot(root.to_path_buf()));
        }

        let config = {
            let mut config = self.config_guard();
            config.replays.root = Some(root.to_path_buf());
            config.clone()
        };
        self.persist(&config)?;
        info!(root = %root.display(), "replays root set");

        if self.active_guard().is_some() {
            self.start()?;
        }
        Ok(())
    }

    /// Discover toons and (re)start the watcher on the enabled ones.
    ///
    /// Any previous watcher is dropped; its in-flight uploads keep running.
    /// Starting again after [`Daemon::shutdown`] re-arms the daemon.
    /// Returns the handle of the new consumer loop.
    pub fn start(&self) -> Result<JoinHandle<()>, DaemonError> {
        let config = self.config();
        let paths = discover_watch_paths(
            config.replays.root.as_deref(),
            &config.replays.multiplayer_suffix,
            config.toons.as_deref(),
            &self.enablement,
        )?;

        if self.shutdown.send_replace(false) {
            debug!("restarting after shutdown");
        }

        let (watcher, events) = DirectoryWatcher::start(&paths, &config.replays.replay_suffix)?;
        let (closed_tx, closed_rx) = oneshot::channel();

        // Replacing the old watch closes its consumer loop
        *self.active_guard() = Some(ActiveWatch {
            watcher,
            _closed: closed_tx,
        });
        info!(directories = paths.len(), "watching for replays");

        Ok(tokio::spawn(consume_events(
            events,
            self.pipeline.clone(),
            closed_rx,
            self.shutdown.subscribe(),
        )))
    }

    /// Flip uploads for one toon and apply it to the running watcher.
    ///
    /// Returns the new enabled flag. When the watcher rejects the change the
    /// flag is restored and the error returned; nothing is saved.
    pub fn toggle_toon(&self, toon: &str) -> Result<bool, DaemonError> {
        let enabled = self
            .enablement
            .toggle(toon)
            .ok_or_else(|| DaemonError::UnknownToon(toon.to_string()))?;

        let root = self.config_guard().replays.root.clone();
        if let (Some(root), Some(active)) = (root, self.active_guard().as_mut()) {
            let dir = toon_replay_dir(&root, toon);
            let result = if enabled {
                active.watcher.add(&dir)
            } else {
                active.watcher.remove(&dir)
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_benign() => debug!(error = %e, "watch set already up to date"),
                Err(e) => {
                    warn!(toon, error = %e, "failed to update watch set");
                    self.enablement.set(toon, !enabled);
                    return Err(e.into());
                }
            }
        }

        let allow_list = self.enablement.allow_list();
        let config = {
            let mut config = self.config_guard();
            if !config.set_toons(allow_list.as_deref()) {
                return Ok(enabled);
            }
            config.clone()
        };
        self.persist(&config)?;

        info!(toon, enabled, "toon uploads toggled");
        Ok(enabled)
    }

    /// Spawn the status server when enabled in the config.
    pub fn start_status_server(&self) -> Option<JoinHandle<()>> {
        let settings = self.config_guard().status_server.clone();
        if !settings.enabled {
            return None;
        }

        let state = self.status_state();
        let mut shutdown = self.shutdown.subscribe();
        Some(tokio::spawn(async move {
            let signal = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = run_status_server(&settings.bind, state, signal).await {
                error!(error = %e, "status server failed");
            }
        }))
    }

    /// Stop watching and abort in-flight uploads.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.active_guard().take();
        info!("daemon shut down");
    }
}

/// Consume created replays until the watch closes or the daemon shuts down.
///
/// A closed watch detaches running uploads so they finish on their own;
/// shutdown aborts them.
async fn consume_events(
    mut events: mpsc::Receiver<PathBuf>,
    pipeline: UploadPipeline,
    mut closed: oneshot::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();

    if *shutdown.borrow() {
        return;
    }

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                workers.abort_all();
                break;
            }
            event = events.recv() => match event {
                Some(path) => {
                    info!(path = %path.display(), "new replay detected");
                    let pipeline = pipeline.clone();
                    workers.spawn(async move {
                        pipeline.run(path).await;
                    });
                }
                None => {
                    workers.detach_all();
                    break;
                }
            },
            _ = &mut closed => {
                workers.detach_all();
                break;
            }
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
        }
    }

    debug!("event loop stopped");
}
