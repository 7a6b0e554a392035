//! Filesystem watcher for replay directories.
//!
//! Wraps `notify::RecommendedWatcher` and bridges creation events for
//! replay files into a tokio channel. Only creations matter: the game
//! writes each replay as a new file, so writes, renames and removals are
//! dropped.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Historical extension match used by older uploaders. It also admits the
/// game's own backup files, so it is opt-in through configuration.
pub const LOOSE_REPLAY_SUFFIX: &str = "eplay";

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error("already watching {0}")]
    AlreadyWatched(PathBuf),

    #[error("not watching {0}")]
    NotWatched(PathBuf),

    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to create filesystem watcher: {0}")]
    Init(#[source] notify::Error),
}

impl WatchError {
    /// Errors a caller may log and carry on from.
    pub fn is_benign(&self) -> bool {
        matches!(self, WatchError::AlreadyWatched(_) | WatchError::NotWatched(_))
    }
}

/// Whether `path`'s file name ends with `suffix`, ignoring ASCII case.
pub fn matches_replay_suffix(path: &Path, suffix: &str) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy();

    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Paths of newly created replays carried by `event`.
pub fn created_replays(event: &Event, suffix: &str) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_)) {
        return Vec::new();
    }

    event
        .paths
        .iter()
        .filter(|path| matches_replay_suffix(path, suffix))
        .cloned()
        .collect()
}

/// Callback handed to notify: forwards created replays into `tx`.
///
/// Watcher errors are logged and the stream carries on.
fn forward_created(
    tx: mpsc::Sender<PathBuf>,
    suffix: String,
) -> impl FnMut(Result<Event, notify::Error>) + Send + 'static {
    move |res| match res {
        Ok(event) => {
            for path in created_replays(&event, &suffix) {
                debug!(path = %path.display(), "replay created");
                // Runs on notify's own thread, outside the runtime
                if tx.blocking_send(path).is_err() {
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e, "filesystem watcher error"),
    }
}

/// A running watch over a set of directories.
///
/// Dropping it stops notify's background thread, which closes the event
/// stream returned by [`DirectoryWatcher::start`].
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    watched: BTreeSet<PathBuf>,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("watched", &self.watched)
            .finish()
    }
}

impl DirectoryWatcher {
    /// Start watching `paths` (non-recursively) for replays ending in `suffix`.
    ///
    /// # Returns
    /// * The watcher handle and a receiver of created replay paths
    /// * `Err(WatchError)` if a path is missing or cannot be registered
    pub fn start(
        paths: &[PathBuf],
        suffix: &str,
    ) -> Result<(Self, mpsc::Receiver<PathBuf>), WatchError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            forward_created(tx, suffix.to_string()),
            notify::Config::default(),
        )
        .map_err(WatchError::Init)?;

        let mut handle = Self {
            watcher,
            watched: BTreeSet::new(),
        };

        for path in paths {
            handle.add(path)?;
        }

        Ok((handle, rx))
    }

    /// Begin watching another directory.
    pub fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.watched.contains(path) {
            return Err(WatchError::AlreadyWatched(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(WatchError::MissingPath(path.to_path_buf()));
        }

        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Notify {
                path: path.to_path_buf(),
                source,
            })?;
        self.watched.insert(path.to_path_buf());
        debug!(path = %path.display(), "watching directory");
        Ok(())
    }

    /// Stop watching a directory.
    pub fn remove(&mut self, path: &Path) -> Result<(), WatchError> {
        if !self.watched.remove(path) {
            return Err(WatchError::NotWatched(path.to_path_buf()));
        }

        self.watcher
            .unwatch(path)
            .map_err(|source| WatchError::Notify {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "stopped watching directory");
        Ok(())
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.iter().cloned().collect()
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }
}
