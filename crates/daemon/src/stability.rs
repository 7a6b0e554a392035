//! Stability checking for freshly created replay files.
//!
//! The game client writes a replay after the match ends, so a file that
//! appears in a watched directory may still be growing. We sample its size
//! until growth stops before handing it to the uploader. This is a size
//! heuristic only: a pause in writing that later resumes can be reported
//! as stable.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Smallest size a replay can have before it is considered for stability.
pub const MIN_REPLAY_SIZE: u64 = 256;

/// Outcome of comparing one size sample against the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityResult {
    /// Size did not grow since the previous accepted sample.
    Stable,
    /// Size grew; the new size becomes the previous sample.
    Growing,
    /// Size is at or below the minimum; the sample is ignored.
    BelowMinimum,
}

#[derive(Debug, Error)]
pub enum StabilityError {
    #[error("{path} disappeared before it finished writing")]
    Disappeared { path: PathBuf },

    #[error("{path} did not stabilize within {waited:?}")]
    TimedOut { path: PathBuf, waited: Duration },

    #[error("failed to read metadata for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Classify a size sample.
///
/// This is a pure function extracted for property testing.
#[inline]
pub fn assess_sample(previous: u64, current: u64, minimum: u64) -> StabilityResult {
    if current <= minimum {
        StabilityResult::BelowMinimum
    } else if current > previous {
        StabilityResult::Growing
    } else {
        StabilityResult::Stable
    }
}

/// Wait until `path` stops growing and return its size at that moment.
///
/// # Arguments
/// * `path` - File to sample
/// * `minimum_size` - Samples at or below this size are ignored
/// * `poll_interval` - Delay before each sample
/// * `max_wait` - Upper bound on the whole wait
///
/// # Returns
/// * `Ok(size)` once a sample above the minimum is not larger than the previous one
/// * `Err(StabilityError::Disappeared)` if the file is removed while waiting
/// * `Err(StabilityError::TimedOut)` if it never settles within `max_wait`
pub async fn wait_for_stable(
    path: &Path,
    minimum_size: u64,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<u64, StabilityError> {
    let started = Instant::now();
    let mut previous = 0u64;

    loop {
        sleep(poll_interval).await;

        let current = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StabilityError::Disappeared {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(StabilityError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        match assess_sample(previous, current, minimum_size) {
            StabilityResult::Stable => return Ok(current),
            StabilityResult::Growing => {
                trace!(path = %path.display(), size = current, "replay still growing");
                previous = current;
            }
            StabilityResult::BelowMinimum => {}
        }

        let waited = started.elapsed();
        if waited >= max_wait {
            return Err(StabilityError::TimedOut {
                path: path.to_path_buf(),
                waited,
            });
        }
    }
}
