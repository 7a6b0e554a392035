//! Upload registry: the session's append-only list of upload records.
//!
//! Records are kept in discovery order and addressed by index. Every
//! append or update is broadcast to subscribers so a presentation layer can
//! re-render on each mutation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, RwLock};

/// Capacity of the registry event channel. Slow subscribers lag rather than
/// block the pipeline.
const EVENT_CAPACITY: usize = 256;

/// Status of one upload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Record created, waiting for the file to settle.
    Pending,
    /// File is being submitted.
    Uploading,
    /// Submission failed.
    UploadFailed,
    /// Submitted; the server is processing it.
    Processing,
    /// The server failed to process the replay.
    ProcessingFailed,
    /// Processed and stored by the server.
    Succeeded,
}

impl Default for UploadStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::UploadFailed => "upload_failed",
            UploadStatus::Processing => "processing",
            UploadStatus::ProcessingFailed => "processing_failed",
            UploadStatus::Succeeded => "succeeded",
        }
    }

    /// Whether the status ends an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::UploadFailed | UploadStatus::ProcessingFailed | UploadStatus::Succeeded
        )
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replay submission tracked for the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub path: PathBuf,
    pub map_name: String,
    /// Empty until a submission succeeds.
    pub queue_id: String,
    /// Empty until processing completes.
    pub replay_id: String,
    pub status: UploadStatus,
    pub attempts: u32,
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub updated_at: u64,
}

impl UploadRecord {
    pub fn new(path: PathBuf) -> Self {
        let now = current_timestamp_ms();
        Self {
            map_name: map_name_from_path(&path),
            path,
            queue_id: String::new(),
            replay_id: String::new(),
            status: UploadStatus::Pending,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Broadcast after every append or update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEvent {
    pub index: usize,
    pub status: UploadStatus,
}

/// Shared, insertion-ordered list of upload records.
#[derive(Debug, Clone)]
pub struct UploadRegistry {
    records: Arc<RwLock<Vec<UploadRecord>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for UploadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    /// Append a record and return its index.
    pub async fn append(&self, record: UploadRecord) -> usize {
        let status = record.status;
        let index = {
            let mut records = self.records.write().await;
            records.push(record);
            records.len() - 1
        };
        // No subscribers is fine
        let _ = self.events.send(RegistryEvent { index, status });
        index
    }

    /// Apply `f` to the record at `index`. Returns false for an unknown index.
    pub async fn update<F>(&self, index: usize, f: F) -> bool
    where
        F: FnOnce(&mut UploadRecord),
    {
        let status = {
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(index) else {
                return false;
            };
            f(record);
            record.updated_at = current_timestamp_ms();
            record.status
        };
        let _ = self.events.send(RegistryEvent { index, status });
        true
    }

    pub async fn set_status(&self, index: usize, status: UploadStatus) -> bool {
        self.update(index, |record| record.status = status).await
    }

    pub async fn get(&self, index: usize) -> Option<UploadRecord> {
        self.records.read().await.get(index).cloned()
    }

    pub async fn snapshot(&self) -> Vec<UploadRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

/// Display name of a replay: the file name without its extension.
pub fn map_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Current time in milliseconds since the Unix epoch.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_map_name_is_file_stem(name in "[A-Za-z0-9 ]{1,24}") {
            let path = PathBuf::from("/replays").join(format!("{}.SC2Replay", name));
            prop_assert_eq!(map_name_from_path(&path), name);
        }
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(UploadStatus::Pending.to_string(), "pending");
        assert_eq!(UploadStatus::UploadFailed.as_str(), "upload_failed");
        assert_eq!(UploadStatus::ProcessingFailed.as_str(), "processing_failed");
        assert_eq!(
            serde_json::to_string(&UploadStatus::Succeeded).unwrap(),
            "\"succeeded\""
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(!UploadStatus::Processing.is_terminal());
        assert!(UploadStatus::UploadFailed.is_terminal());
        assert!(UploadStatus::ProcessingFailed.is_terminal());
        assert!(UploadStatus::Succeeded.is_terminal());
    }

    #[test]
    fn test_new_record() {
        let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;
        let record = UploadRecord::new(PathBuf::from("/r/Ever Dream LE.SC2Replay"));
        let after = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;

        assert!(record.created_at >= before && record.created_at <= after);
        assert_eq!(record.updated_at, record.created_at);
        assert_eq!(record.map_name, "Ever Dream LE");
        assert_eq!(record.status, UploadStatus::Pending);
        assert!(record.queue_id.is_empty());
        assert!(record.replay_id.is_empty());
        assert_eq!(record.attempts, 0);
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let registry = UploadRegistry::new();
        let a = registry.append(UploadRecord::new(PathBuf::from("/a.SC2Replay"))).await;
        let b = registry.append(UploadRecord::new(PathBuf::from("/b.SC2Replay"))).await;

        assert_eq!((a, b), (0, 1));
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].map_name, "a");
        assert_eq!(snapshot[1].map_name, "b");
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_broadcasts_events() {
        let registry = UploadRegistry::new();
        let mut events = registry.subscribe();

        let index = registry.append(UploadRecord::new(PathBuf::from("/a.SC2Replay"))).await;
        assert!(registry.set_status(index, UploadStatus::Uploading).await);
        assert!(
            registry
                .update(index, |r| {
                    r.status = UploadStatus::Processing;
                    r.queue_id = "q1".to_string();
                })
                .await
        );

        assert_eq!(events.recv().await.unwrap().status, UploadStatus::Pending);
        assert_eq!(events.recv().await.unwrap().status, UploadStatus::Uploading);
        assert_eq!(events.recv().await.unwrap().status, UploadStatus::Processing);
        assert_eq!(registry.get(index).await.unwrap().queue_id, "q1");
    }

    #[tokio::test]
    async fn test_update_unknown_index() {
        let registry = UploadRegistry::new();
        assert!(!registry.set_status(3, UploadStatus::Succeeded).await);
        assert!(registry.get(3).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let registry = UploadRegistry::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .append(UploadRecord::new(PathBuf::from(format!("/{}.SC2Replay", i))))
                    .await
            }));
        }

        let mut indices = Vec::new();
        for handle in handles {
            indices.push(handle.await.unwrap());
        }
        indices.sort_unstable();

        assert_eq!(indices, (0..16).collect::<Vec<_>>());
    }
}
