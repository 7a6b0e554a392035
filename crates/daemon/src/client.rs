//! sc2replaystats API client.
//!
//! The pipeline only depends on the [`UploadClient`] trait; the reqwest-backed
//! [`Sc2ReplayStatsClient`] is the production implementation.

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiConfig;

/// Multipart field carrying the replay bytes.
pub const REPLAY_FILE_FIELD: &str = "replay_file";

/// Form field identifying the uploading client.
pub const UPLOAD_METHOD_FIELD: &str = "upload_method";

/// Oldest timestamp an API key may carry (2010-01-01T00:00:00Z).
pub const MIN_KEY_TIMESTAMP: i64 = 1_262_304_000;

const KEY_TOKEN_LEN: usize = 40;

const DUPLICATE_PREFIX: &str = "Duplicate Replay";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sc2replaystats returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The server reported that it could not process a replay.
    #[error("replay processing failed: {0}")]
    Processing(String),

    #[error("response is missing `{0}`")]
    MissingField(&'static str),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remote service the upload pipeline talks to.
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// Submit a replay file, returning the server's queue id.
    async fn submit(&self, path: &Path) -> Result<String, ClientError>;

    /// Check a queued replay. `Ok(None)` means it is still processing.
    async fn check_status(&self, queue_id: &str) -> Result<Option<String>, ClientError>;
}

/// Check that `key` looks like an sc2replaystats API key.
///
/// A key is three `;`-separated parts: two 40-character tokens and a
/// 32-bit decimal Unix timestamp no earlier than 2010-01-01.
pub fn valid_api_key(key: &str) -> bool {
    let parts: Vec<&str> = key.split(';').collect();

    if parts.len() != 3 || parts[0].len() != KEY_TOKEN_LEN || parts[1].len() != KEY_TOKEN_LEN {
        return false;
    }

    match parts[2].parse::<i32>() {
        Ok(ts) => i64::from(ts) >= MIN_KEY_TIMESTAMP,
        Err(_) => false,
    }
}

/// Value sent as `upload_method`: a fixed prefix plus the host OS.
pub fn client_identifier() -> String {
    format!("sc2-rsu-{}", std::env::consts::OS)
}

/// Replay id carried by a `Duplicate Replay: <id>` processing error.
pub fn parse_duplicate(message: &str) -> Option<&str> {
    if !message.starts_with(DUPLICATE_PREFIX) {
        return None;
    }

    let parts: Vec<&str> = message.split(": ").collect();
    match parts.as_slice() {
        [_, id] if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// A server-side player (toon) record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    #[serde(rename = "players_id")]
    pub id: u64,
    #[serde(rename = "players_name")]
    pub name: String,
    pub battle_net_url: String,
    pub battle_tag_name: String,
    pub battle_tag_id: u64,
    #[serde(rename = "character_link_id")]
    pub character_id: u64,
    #[serde(rename = "players_replays_url")]
    pub replays_url: String,
}

impl Player {
    /// `Name#1234` friends tag.
    pub fn battle_tag(&self) -> String {
        format!("{}#{}", self.battle_tag_name, self.battle_tag_id)
    }
}

/// A player linked to the API key's account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountPlayer {
    #[serde(rename = "players_id")]
    pub id: u64,
    pub default: u64,
    pub player: Player,
}

/// reqwest-backed client for the sc2replaystats API.
#[derive(Debug, Clone)]
pub struct Sc2ReplayStatsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    web_url: String,
}

impl Sc2ReplayStatsClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key: config.key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            web_url: config.web_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, slug: &str) -> String {
        format!("{}/{}", self.base_url, slug)
    }

    /// Web page of a processed replay.
    pub fn replay_url(&self, replay_id: &str) -> String {
        format!("{}/replay/{}", self.web_url, replay_id)
    }

    /// Players linked to the account that owns the API key.
    pub async fn account_players(&self) -> Result<Vec<AccountPlayer>, ClientError> {
        let resp = self
            .http
            .get(self.url("account/players"))
            .header("Authorization", &self.api_key)
            .send()
            .await?;

        let body = checked_body(resp).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn replay_part(path: &Path) -> Result<multipart::Part, ClientError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")?)
    }
}

#[async_trait]
impl UploadClient for Sc2ReplayStatsClient {
    async fn submit(&self, path: &Path) -> Result<String, ClientError> {
        let form = multipart::Form::new()
            .part(REPLAY_FILE_FIELD, Self::replay_part(path).await?)
            .text(UPLOAD_METHOD_FIELD, client_identifier());

        let resp = self
            .http
            .post(self.url("replay"))
            .header("Authorization", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let body = checked_body(resp).await?;
        let json: Value = serde_json::from_str(&body)?;

        let queue_id = string_field(&json, "replay_queue_id")
            .ok_or(ClientError::MissingField("replay_queue_id"))?;
        debug!(path = %path.display(), queue_id = %queue_id, "replay queued");
        Ok(queue_id)
    }

    async fn check_status(&self, queue_id: &str) -> Result<Option<String>, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("replay/status/{}", queue_id)))
            .header("Authorization", &self.api_key)
            .send()
            .await?;

        let body = checked_body(resp).await?;
        let json: Value = serde_json::from_str(&body)?;

        if let Some(error) = string_field(&json, "error") {
            return Err(ClientError::Processing(error));
        }

        Ok(string_field(&json, "replay_id"))
    }
}

/// Body of a 200 response, or a `Status` error carrying the body text.
async fn checked_body(resp: reqwest::Response) -> Result<String, ClientError> {
    let status = resp.status();
    let body = resp.text().await?;

    if status != StatusCode::OK {
        return Err(ClientError::Status { status, body });
    }

    Ok(body)
}

/// Read a JSON field as a non-empty string. Numbers are stringified.
fn string_field(json: &Value, key: &str) -> Option<String> {
    match json.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn token(c: char) -> String {
        std::iter::repeat(c).take(KEY_TOKEN_LEN).collect()
    }

    proptest! {
        #[test]
        fn prop_valid_keys_accepted(
            a in "[a-f0-9]{40}",
            b in "[a-f0-9]{40}",
            ts in MIN_KEY_TIMESTAMP..=(i32::MAX as i64),
        ) {
            let key = format!("{};{};{}", a, b, ts);
            prop_assert!(valid_api_key(&key));
        }

        #[test]
        fn prop_wrong_token_length_rejected(a in "[a-f0-9]{0,39}", ts in MIN_KEY_TIMESTAMP..=(i32::MAX as i64)) {
            let key = format!("{};{};{}", a, token('b'), ts);
            prop_assert!(!valid_api_key(&key));
        }

        #[test]
        fn prop_old_timestamps_rejected(ts in (i32::MIN as i64)..MIN_KEY_TIMESTAMP) {
            let key = format!("{};{};{}", token('a'), token('b'), ts);
            prop_assert!(!valid_api_key(&key));
        }
    }

    #[test]
    fn test_valid_api_key_examples() {
        let good = format!("{};{};1700000000", token('a'), token('b'));
        assert!(valid_api_key(&good));

        let boundary = format!("{};{};1262304000", token('a'), token('b'));
        assert!(valid_api_key(&boundary));

        assert!(!valid_api_key(""));
        assert!(!valid_api_key(&format!("{};{}", token('a'), token('b'))));
        assert!(!valid_api_key(&format!("{};{};1700000000;x", token('a'), token('b'))));
        assert!(!valid_api_key(&format!("{};{};1700000000", token('a'), "short")));
        assert!(!valid_api_key(&format!("{};{};soon", token('a'), token('b'))));
        assert!(!valid_api_key(&format!("{};{};1262303999", token('a'), token('b'))));
        // Does not fit in 32 bits
        assert!(!valid_api_key(&format!("{};{};99999999999", token('a'), token('b'))));
    }

    #[test]
    fn test_client_identifier() {
        let id = client_identifier();
        assert!(id.starts_with("sc2-rsu-"));
        assert_eq!(id, format!("sc2-rsu-{}", std::env::consts::OS));
    }

    #[test]
    fn test_parse_duplicate() {
        assert_eq!(parse_duplicate("Duplicate Replay: abc123"), Some("abc123"));
        assert_eq!(parse_duplicate("Duplicate Replay"), None);
        assert_eq!(parse_duplicate("Duplicate Replay: a: b"), None);
        assert_eq!(parse_duplicate("Parse error: abc123"), None);
    }

    #[test]
    fn test_string_field() {
        let value = json!({"a": "x", "b": 42, "c": "", "d": null});
        assert_eq!(string_field(&value, "a"), Some("x".to_string()));
        assert_eq!(string_field(&value, "b"), Some("42".to_string()));
        assert_eq!(string_field(&value, "c"), None);
        assert_eq!(string_field(&value, "d"), None);
        assert_eq!(string_field(&value, "missing"), None);
    }

    #[test]
    fn test_account_players_decode() {
        let body = r#"[{
            "players_id": 7,
            "default": 1,
            "player": {
                "players_id": 7,
                "players_name": "Serral",
                "battle_net_url": "https://starcraft2.com/profile/2/1/987654",
                "battle_tag_name": "Serral",
                "battle_tag_id": 1234,
                "character_link_id": 987654,
                "updated_at": "2020-01-01T00:00:00Z"
            }
        }]"#;

        let players: Vec<AccountPlayer> = serde_json::from_str(body).unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].player.battle_tag(), "Serral#1234");
        assert_eq!(players[0].player.character_id, 987654);
    }

    #[test]
    fn test_replay_url_and_trailing_slash() {
        let config = ApiConfig {
            base_url: "http://localhost:1/".to_string(),
            web_url: "https://sc2replaystats.com/".to_string(),
            ..ApiConfig::default()
        };
        let client = Sc2ReplayStatsClient::new(&config).unwrap();

        assert_eq!(client.url("replay"), "http://localhost:1/replay");
        assert_eq!(
            client.replay_url("123"),
            "https://sc2replaystats.com/replay/123"
        );
    }
}
