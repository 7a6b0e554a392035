//! Scanner module for discovering replay directories.
//!
//! StarCraft II stores replays as `<root>/<account>/<toon>/Replays/Multiplayer`.
//! Discovery walks a tree looking for directories whose path ends with the
//! multiplayer suffix, then strips path segments to recover either the
//! account/toon ids or the root itself.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Default suffix for replay directories.
///
/// Matching is a plain string suffix, so `NotMultiplayer` matches as well.
pub const MULTIPLAYER_SUFFIX: &str = "Multiplayer";

/// Segments between an account/toon directory and its multiplayer replays.
pub const REPLAY_SUBDIRS: [&str; 2] = ["Replays", "Multiplayer"];

/// Errors that can occur while scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The walk hit an error that is not an access denial (or access errors are not ignored).
    #[error("failed to scan {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Whether a walk error is an access/permission denial.
fn is_access_error(err: &walkdir::Error) -> bool {
    if let Some(io_err) = err.io_error() {
        if io_err.kind() == io::ErrorKind::PermissionDenied {
            return true;
        }
    }

    let message = err.to_string().to_lowercase();
    message.contains("access denied")
        || message.contains("access is denied")
        || message.contains("permission denied")
}

/// Recursively finds directories under `root` whose full path ends with `suffix`.
///
/// Results come back in walk order (lexical per directory). With
/// `ignore_access_errors`, unreadable subtrees are skipped instead of
/// aborting the scan. Symlinks are not followed, and no other loop
/// protection exists, so very large trees can take a long time.
pub fn find_directories_by_suffix(
    root: &Path,
    suffix: &str,
    ignore_access_errors: bool,
) -> Result<Vec<PathBuf>, ScanError> {
    let mut results = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if ignore_access_errors && is_access_error(&err) => {
                trace!(error = %err, "skipping unreadable subtree");
                continue;
            }
            Err(source) => {
                return Err(ScanError::Walk {
                    root: root.to_path_buf(),
                    source,
                })
            }
        };

        if entry.file_type().is_dir() && entry.path().to_string_lossy().ends_with(suffix) {
            results.push(entry.into_path());
        }
    }

    Ok(results)
}

/// Removes `strip` segments from a path string.
///
/// Positive values strip from the end, negative values strip from the start
/// (which always produces a relative path). Stripping as many segments as
/// the path has yields `/` for absolute paths and an empty string otherwise.
/// A single trailing separator is ignored.
pub fn strip_path_parts(path: &str, strip: isize) -> String {
    if path.is_empty() {
        return String::new();
    }

    let sep = MAIN_SEPARATOR;
    let absolute = path.starts_with(sep);
    let path = path.strip_suffix(sep).unwrap_or(path);
    let parts: Vec<&str> = path.split(sep).collect();
    let count = strip.unsigned_abs();

    if strip < 0 {
        if parts.len() <= count {
            return String::new();
        }
        return parts[count..].join(&sep.to_string());
    }

    if strip > 0 {
        if parts.len() <= count {
            return if absolute { sep.to_string() } else { String::new() };
        }

        let joined = parts[..parts.len() - count].join(&sep.to_string());
        if absolute && !joined.starts_with(sep) {
            return format!("{}{}", sep, joined);
        }
        return joined;
    }

    path.to_string()
}

/// Lists the `<account>/<toon>` ids found under a replays root.
///
/// Every `.../<account>/<toon>/Replays/Multiplayer` directory contributes
/// one id; duplicates are dropped and discovery order is kept.
pub fn enumerate_accounts(replays_root: &Path, suffix: &str) -> Result<Vec<String>, ScanError> {
    debug!(root = %replays_root.display(), "searching for accounts in replays directory");
    let paths = find_directories_by_suffix(replays_root, suffix, true)?;

    let mut seen = HashSet::new();
    let mut accounts = Vec::new();

    for path in paths {
        let toon_dir = PathBuf::from(strip_path_parts(&path.to_string_lossy(), 2));

        let Ok(relative) = toon_dir.strip_prefix(replays_root) else {
            continue;
        };

        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if id.is_empty() || !seen.insert(id.clone()) {
            continue;
        }

        debug!(account = %id, "found candidate account");
        accounts.push(id);
    }

    debug!(count = accounts.len(), "finished scanning for accounts");
    Ok(accounts)
}

/// Lists directories under `scan_root` that look like a replays root.
///
/// A candidate is whatever sits four segments above a multiplayer replay
/// directory. Choosing between several candidates is left to the caller.
pub fn find_replays_root(scan_root: &Path, suffix: &str) -> Result<Vec<PathBuf>, ScanError> {
    debug!(scan_root = %scan_root.display(), "searching for replays root");
    let paths = find_directories_by_suffix(scan_root, suffix, true)?;

    let mut seen = HashSet::new();
    let mut roots = Vec::new();

    for path in paths {
        let candidate = strip_path_parts(&path.to_string_lossy(), 4);
        if candidate.is_empty() || candidate == MAIN_SEPARATOR.to_string() {
            continue;
        }

        if seen.insert(candidate.clone()) {
            debug!(candidate = %candidate, "found candidate replays root");
            roots.push(PathBuf::from(candidate));
        }
    }

    Ok(roots)
}

/// Absolute multiplayer replay directory of a toon.
pub fn toon_replay_dir(replays_root: &Path, toon: &str) -> PathBuf {
    let mut dir = replays_root.to_path_buf();
    dir.extend(toon.split('/').filter(|part| !part.is_empty()));
    dir.extend(REPLAY_SUBDIRS);
    dir
}
