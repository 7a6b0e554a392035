//! Per-file upload pipeline.
//!
//! Each detected replay runs through an explicit state machine:
//! wait for the file to settle, submit it, then poll until the server has
//! processed it. Submit and processing failures are retried with
//! exponential backoff, re-checking stability before every attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::client::{parse_duplicate, ClientError, UploadClient};
use crate::config::UploadConfig;
use crate::registry::{UploadRecord, UploadRegistry, UploadStatus};
use crate::stability::wait_for_stable;

const NOTICE_CAPACITY: usize = 64;

/// Timing and retry knobs for the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub stability_poll_interval: Duration,
    pub min_replay_size: u64,
    pub max_stability_wait: Duration,
    pub status_poll_interval: Duration,
    pub max_poll_duration: Duration,
}

impl From<&UploadConfig> for PipelineSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
            stability_poll_interval: config.stability_poll_interval(),
            min_replay_size: config.min_replay_size,
            max_stability_wait: config.max_stability_wait(),
            status_poll_interval: config.status_poll_interval(),
            max_poll_duration: config.max_poll_duration(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

/// Advisory, non-fatal message about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("replay {queue_id} still processing after {waited:?}")]
    TimedOut { queue_id: String, waited: Duration },
}

/// Delay before the attempt following `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

/// Poll `queue_id` until the server reports a replay id.
///
/// # Arguments
/// * `client` - Service to poll
/// * `queue_id` - Id returned by the submission
/// * `interval` - Delay before each poll
/// * `max_duration` - Give up after this long
///
/// # Returns
/// * `Ok(replay_id)` once processed, including `Duplicate Replay: <id>` errors
/// * `Err(PollError::Client)` on the first client or processing error
/// * `Err(PollError::TimedOut)` if the replay is still queued after `max_duration`
pub async fn poll_until_resolved(
    client: &dyn UploadClient,
    queue_id: &str,
    interval: Duration,
    max_duration: Duration,
) -> Result<String, PollError> {
    let started = Instant::now();

    loop {
        sleep(interval).await;

        match client.check_status(queue_id).await {
            Ok(Some(replay_id)) => return Ok(replay_id),
            Ok(None) => debug!(queue_id, "replay still processing"),
            Err(ClientError::Processing(message)) => {
                return match parse_duplicate(&message) {
                    Some(replay_id) => {
                        debug!(queue_id, replay_id, "replay was already uploaded");
                        Ok(replay_id.to_string())
                    }
                    None => Err(ClientError::Processing(message).into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        let waited = started.elapsed();
        if waited >= max_duration {
            return Err(PollError::TimedOut {
                queue_id: queue_id.to_string(),
                waited,
            });
        }
    }
}

/// States of one file's run through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    AwaitStable { attempt: u32 },
    Submit { attempt: u32 },
    Poll { attempt: u32, queue_id: String },
    Backoff { attempt: u32, failed: UploadStatus },
    Done(UploadStatus),
}

/// Runs replays through stability, submission and status polling.
#[derive(Clone)]
pub struct UploadPipeline {
    client: Arc<dyn UploadClient>,
    registry: UploadRegistry,
    settings: PipelineSettings,
    notices: broadcast::Sender<Notice>,
}

impl UploadPipeline {
    pub fn new(
        client: Arc<dyn UploadClient>,
        registry: UploadRegistry,
        settings: PipelineSettings,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            client,
            registry,
            settings,
            notices,
        }
    }

    pub fn registry(&self) -> &UploadRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Advisory notices for per-file failures.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, path: &Path, message: String) {
        let _ = self.notices.send(Notice {
            path: path.to_path_buf(),
            message,
        });
    }

    /// Run one detected replay to a final status.
    ///
    /// The record is appended in `Pending` before anything else happens and
    /// is left in its last state once the run ends.
    pub async fn run(&self, path: PathBuf) -> UploadStatus {
        let index = self.registry.append(UploadRecord::new(path.clone())).await;
        let mut step = Step::AwaitStable { attempt: 1 };

        loop {
            step = match step {
                Step::AwaitStable { attempt } => self.await_stable(index, &path, attempt).await,
                Step::Submit { attempt } => self.submit(index, &path, attempt).await,
                Step::Poll { attempt, queue_id } => {
                    self.poll(index, &path, attempt, &queue_id).await
                }
                Step::Backoff { attempt, failed } => {
                    if attempt >= self.settings.max_attempts {
                        warn!(path = %path.display(), attempts = attempt, status = %failed, "giving up on replay");
                        Step::Done(failed)
                    } else {
                        let delay = backoff_delay(self.settings.backoff_base, attempt);
                        debug!(path = %path.display(), attempt, ?delay, "retrying after backoff");
                        sleep(delay).await;
                        Step::AwaitStable {
                            attempt: attempt + 1,
                        }
                    }
                }
                Step::Done(status) => return status,
            };
        }
    }

    async fn await_stable(&self, index: usize, path: &Path, attempt: u32) -> Step {
        let result = wait_for_stable(
            path,
            self.settings.min_replay_size,
            self.settings.stability_poll_interval,
            self.settings.max_stability_wait,
        )
        .await;

        match result {
            Ok(size) => {
                debug!(path = %path.display(), size, "replay is stable");
                Step::Submit { attempt }
            }
            Err(e) => {
                // Nothing to retry against
                warn!(path = %path.display(), error = %e, "abandoning replay");
                let message = e.to_string();
                self.registry
                    .update(index, |record| {
                        record.status = UploadStatus::UploadFailed;
                        record.error = Some(message.clone());
                    })
                    .await;
                self.notify(path, message);
                Step::Done(UploadStatus::UploadFailed)
            }
        }
    }

    async fn submit(&self, index: usize, path: &Path, attempt: u32) -> Step {
        self.registry
            .update(index, |record| {
                record.status = UploadStatus::Uploading;
                record.attempts = attempt;
            })
            .await;
        info!(path = %path.display(), attempt, "uploading replay");

        match self.client.submit(path).await {
            Ok(queue_id) => {
                self.registry
                    .update(index, |record| {
                        record.status = UploadStatus::Processing;
                        record.queue_id = queue_id.clone();
                        record.error = None;
                    })
                    .await;
                Step::Poll { attempt, queue_id }
            }
            Err(e) => {
                warn!(path = %path.display(), attempt, error = %e, "upload failed");
                let message = format!("upload failed: {}", e);
                self.registry
                    .update(index, |record| {
                        record.status = UploadStatus::UploadFailed;
                        record.error = Some(message.clone());
                    })
                    .await;
                self.notify(path, message);
                Step::Backoff {
                    attempt,
                    failed: UploadStatus::UploadFailed,
                }
            }
        }
    }

    async fn poll(&self, index: usize, path: &Path, attempt: u32, queue_id: &str) -> Step {
        let result = poll_until_resolved(
            self.client.as_ref(),
            queue_id,
            self.settings.status_poll_interval,
            self.settings.max_poll_duration,
        )
        .await;

        match result {
            Ok(replay_id) => {
                info!(path = %path.display(), queue_id, replay_id = %replay_id, "replay processed");
                self.registry
                    .update(index, |record| {
                        record.status = UploadStatus::Succeeded;
                        record.replay_id = replay_id;
                    })
                    .await;
                Step::Done(UploadStatus::Succeeded)
            }
            Err(e) => {
                warn!(path = %path.display(), queue_id, attempt, error = %e, "processing failed");
                let message = e.to_string();
                self.registry
                    .update(index, |record| {
                        record.status = UploadStatus::ProcessingFailed;
                        record.error = Some(message.clone());
                    })
                    .await;
                self.notify(path, message);
                Step::Backoff {
                    attempt,
                    failed: UploadStatus::ProcessingFailed,
                }
            }
        }
    }
}
