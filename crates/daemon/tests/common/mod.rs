//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sc2_rsu::{toon_replay_dir, ClientError, UploadClient};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::time::Instant;

/// Canned behaviour for [`MockClient`].
#[derive(Debug, Clone)]
pub enum StatusReply {
    Done(String),
    Pending,
    Failed(String),
}

/// Upload client that records calls and answers from a script.
pub struct MockClient {
    submit_ok: bool,
    reply: StatusReply,
    submits: Mutex<Vec<Instant>>,
    status_checks: Mutex<u32>,
}

impl MockClient {
    pub fn succeeding(replay_id: &str) -> Self {
        Self::new(true, StatusReply::Done(replay_id.to_string()))
    }

    pub fn failing_submit() -> Self {
        Self::new(false, StatusReply::Pending)
    }

    pub fn with_status(reply: StatusReply) -> Self {
        Self::new(true, reply)
    }

    fn new(submit_ok: bool, reply: StatusReply) -> Self {
        Self {
            submit_ok,
            reply,
            submits: Mutex::new(Vec::new()),
            status_checks: Mutex::new(0),
        }
    }

    pub fn submit_times(&self) -> Vec<Instant> {
        self.submits.lock().unwrap().clone()
    }

    pub fn status_checks(&self) -> u32 {
        *self.status_checks.lock().unwrap()
    }
}

#[async_trait]
impl UploadClient for MockClient {
    async fn submit(&self, _path: &Path) -> Result<String, ClientError> {
        let attempt = {
            let mut submits = self.submits.lock().unwrap();
            submits.push(Instant::now());
            submits.len()
        };

        if self.submit_ok {
            Ok(format!("queue-{}", attempt))
        } else {
            Err(ClientError::MissingField("replay_queue_id"))
        }
    }

    async fn check_status(&self, _queue_id: &str) -> Result<Option<String>, ClientError> {
        *self.status_checks.lock().unwrap() += 1;
        match &self.reply {
            StatusReply::Done(id) => Ok(Some(id.clone())),
            StatusReply::Pending => Ok(None),
            StatusReply::Failed(message) => Err(ClientError::Processing(message.clone())),
        }
    }
}

/// `<root>/<account>/<toon>/Replays/Multiplayer` for each toon, created empty.
pub fn replays_tree(root: &Path, toons: &[&str]) -> Vec<PathBuf> {
    toons
        .iter()
        .map(|toon| {
            let dir = toon_replay_dir(root, toon);
            std::fs::create_dir_all(&dir).unwrap();
            dir
        })
        .collect()
}
