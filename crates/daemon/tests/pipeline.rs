mod common;

use common::{replays_tree, MockClient, StatusReply};
use sc2_rsu::{Config, Daemon, PipelineSettings, UploadPipeline, UploadRegistry, UploadStatus};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        stability_poll_interval: Duration::from_millis(250),
        max_stability_wait: Duration::from_secs(3600),
        ..PipelineSettings::default()
    }
}

fn replay_file(dir: &TempDir, name: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, vec![0u8; 1024]).unwrap();
    path
}

#[tokio::test]
async fn new_replay_is_uploaded_and_processed() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("StarCraft II").join("Accounts");
    let dirs = replays_tree(&root, &["123456789/2-S2-1-987654"]);

    let mut config = Config::default();
    config.replays.root = Some(root.clone());
    config.upload.stability_poll_interval_ms = 20;
    config.upload.status_poll_interval_ms = 20;

    let client = Arc::new(MockClient::succeeding("31337"));
    let daemon = Daemon::with_client(config, None, client.clone());
    let mut events = daemon.registry().subscribe();

    let handle = daemon.start().unwrap();
    assert_eq!(daemon.watched_paths(), dirs);

    fs::write(dirs[0].join("Test.SC2Replay"), vec![7u8; 1024]).unwrap();

    let mut statuses = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            statuses.push(event.status);
            if event.status == UploadStatus::Succeeded {
                break;
            }
        }
    })
    .await
    .expect("replay was not processed in time");

    assert_eq!(
        statuses,
        vec![
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Processing,
            UploadStatus::Succeeded,
        ]
    );

    let records = daemon.registry().snapshot().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].map_name, "Test");
    assert_eq!(records[0].queue_id, "queue-1");
    assert_eq!(records[0].replay_id, "31337");
    assert_eq!(client.submit_times().len(), 1);

    daemon.shutdown();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_submit_is_retried_with_backoff() {
    let temp_dir = TempDir::new().unwrap();
    let path = replay_file(&temp_dir, "Retry.SC2Replay");

    let client = Arc::new(MockClient::failing_submit());
    let pipeline = UploadPipeline::new(client.clone(), UploadRegistry::new(), fast_settings());
    let mut notices = pipeline.subscribe_notices();

    let status = pipeline.run(path.clone()).await;

    assert_eq!(status, UploadStatus::UploadFailed);
    let submits = client.submit_times();
    assert_eq!(submits.len(), 3);

    let first_gap = submits[1] - submits[0];
    let second_gap = submits[2] - submits[1];
    assert!(first_gap >= Duration::from_secs(3), "first gap {:?}", first_gap);
    assert!(first_gap < Duration::from_secs(6), "first gap {:?}", first_gap);
    assert!(second_gap >= Duration::from_secs(6), "second gap {:?}", second_gap);
    assert!(second_gap < Duration::from_secs(12), "second gap {:?}", second_gap);

    let record = pipeline.registry().get(0).await.unwrap();
    assert_eq!(record.status, UploadStatus::UploadFailed);
    assert_eq!(record.attempts, 3);
    assert!(record.queue_id.is_empty());

    for _ in 0..3 {
        assert_eq!(notices.recv().await.unwrap().path, path);
    }
}

#[tokio::test(start_paused = true)]
async fn duplicate_replay_counts_as_success() {
    let temp_dir = TempDir::new().unwrap();
    let path = replay_file(&temp_dir, "Dup.SC2Replay");

    let client = Arc::new(MockClient::with_status(StatusReply::Failed(
        "Duplicate Replay: abc123".to_string(),
    )));
    let pipeline = UploadPipeline::new(client.clone(), UploadRegistry::new(), fast_settings());

    let status = pipeline.run(path).await;

    assert_eq!(status, UploadStatus::Succeeded);
    let record = pipeline.registry().get(0).await.unwrap();
    assert_eq!(record.replay_id, "abc123");
    assert_eq!(client.submit_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn processing_failure_is_retried_then_left_failed() {
    let temp_dir = TempDir::new().unwrap();
    let path = replay_file(&temp_dir, "Broken.SC2Replay");

    let client = Arc::new(MockClient::with_status(StatusReply::Failed(
        "Replay could not be parsed".to_string(),
    )));
    let pipeline = UploadPipeline::new(client.clone(), UploadRegistry::new(), fast_settings());

    let status = pipeline.run(path).await;

    assert_eq!(status, UploadStatus::ProcessingFailed);
    assert_eq!(client.submit_times().len(), 3);
    assert_eq!(client.status_checks(), 3);

    let record = pipeline.registry().get(0).await.unwrap();
    assert_eq!(record.status, UploadStatus::ProcessingFailed);
    assert_eq!(record.queue_id, "queue-3");
    assert!(record.error.unwrap().contains("could not be parsed"));
}

#[tokio::test(start_paused = true)]
async fn polling_gives_up_after_max_duration() {
    let temp_dir = TempDir::new().unwrap();
    let path = replay_file(&temp_dir, "Slow.SC2Replay");

    let settings = PipelineSettings {
        max_attempts: 1,
        max_poll_duration: Duration::from_secs(30),
        ..fast_settings()
    };
    let client = Arc::new(MockClient::with_status(StatusReply::Pending));
    let pipeline = UploadPipeline::new(client.clone(), UploadRegistry::new(), settings);

    let status = pipeline.run(path).await;

    assert_eq!(status, UploadStatus::ProcessingFailed);
    assert_eq!(client.status_checks(), 30);
}
