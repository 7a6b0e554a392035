//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name used when no explicit config path is given
pub const CONFIG_FILE_NAME: &str = "sc2-rsu.toml";

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to access config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Where replays live and how they are recognised
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplaysConfig {
    /// The `Accounts` directory holding `<account>/<toon>/Replays/Multiplayer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Where to start searching when `root` is unset (platform default if None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_root: Option<PathBuf>,
    /// Suffix a created file must carry to be treated as a replay
    #[serde(default = "default_replay_suffix")]
    pub replay_suffix: String,
    /// Suffix identifying multiplayer replay directories during discovery
    #[serde(default = "default_multiplayer_suffix")]
    pub multiplayer_suffix: String,
}

fn default_replay_suffix() -> String {
    ".SC2Replay".to_string()
}

fn default_multiplayer_suffix() -> String {
    "Multiplayer".to_string()
}

impl Default for ReplaysConfig {
    fn default() -> Self {
        Self {
            root: None,
            scan_root: None,
            replay_suffix: default_replay_suffix(),
            multiplayer_suffix: default_multiplayer_suffix(),
        }
    }
}

/// Remote service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// sc2replaystats API key (`<token>;<token>;<unix time>`)
    #[serde(default)]
    pub key: String,
    /// Base URL of the JSON API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Base URL of the website, used to link processed replays
    #[serde(default = "default_web_url")]
    pub web_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.sc2replaystats.com".to_string()
}

fn default_web_url() -> String {
    "https://sc2replaystats.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            base_url: default_base_url(),
            web_url: default_web_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Retry, polling and stability tuning for the upload pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Maximum number of submit attempts per replay
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, doubled after every failure
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Delay between processing status checks
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    /// Give up polling a queued replay after this long
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,
    /// Delay between file size samples
    #[serde(default = "default_stability_poll_interval_ms")]
    pub stability_poll_interval_ms: u64,
    /// Files must be larger than this before they can be considered complete
    #[serde(default = "default_min_replay_size")]
    pub min_replay_size: u64,
    /// Abandon a file that has not settled after this long
    #[serde(default = "default_max_stability_wait_secs")]
    pub max_stability_wait_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    3
}

fn default_status_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_secs() -> u64 {
    600
}

fn default_stability_poll_interval_ms() -> u64 {
    250
}

fn default_min_replay_size() -> u64 {
    256
}

fn default_max_stability_wait_secs() -> u64 {
    120
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            max_poll_secs: default_max_poll_secs(),
            stability_poll_interval_ms: default_stability_poll_interval_ms(),
            min_replay_size: default_min_replay_size(),
            max_stability_wait_secs: default_max_stability_wait_secs(),
        }
    }
}

impl UploadConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_secs(self.max_poll_secs)
    }

    pub fn stability_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stability_poll_interval_ms)
    }

    pub fn max_stability_wait(&self) -> Duration {
        Duration::from_secs(self.max_stability_wait_secs)
    }
}

/// Read-only HTTP status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_status_bind")]
    pub bind: String,
}

fn default_status_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for StatusServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_status_bind(),
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Toons allowed to upload (`<account>/<toon>`).
    ///
    /// Absent means every toon; an empty list means none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toons: Option<Vec<String>>,
    #[serde(default)]
    pub replays: ReplaysConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub status_server: StatusServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// - SC2RSU_API_KEY -> api.key
    /// - SC2RSU_REPLAYS_ROOT -> replays.root
    /// - SC2RSU_LOG_LEVEL -> logging.level
    /// - SC2RSU_STATUS_BIND -> status_server.bind (also enables the server)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SC2RSU_API_KEY") {
            if !val.is_empty() {
                self.api.key = val;
            }
        }

        if let Ok(val) = env::var("SC2RSU_REPLAYS_ROOT") {
            if !val.is_empty() {
                self.replays.root = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("SC2RSU_LOG_LEVEL") {
            if !val.is_empty() {
                self.logging.level = val;
            }
        }

        if let Ok(val) = env::var("SC2RSU_STATUS_BIND") {
            if !val.is_empty() {
                self.status_server.bind = val;
                self.status_server.enabled = true;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Serialize to TOML and write it atomically (temp file + rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Whether uploads are enabled for a toon under the persisted allow-list
    pub fn toon_enabled(&self, toon: &str) -> bool {
        match &self.toons {
            None => true,
            Some(toons) => toons.iter().any(|t| t == toon),
        }
    }

    /// Replace the allow-list with `toons`, keeping existing order where possible.
    ///
    /// `None` lifts the allow-list. Returns whether anything changed, so
    /// callers can skip a needless save.
    pub fn set_toons(&mut self, toons: Option<&[String]>) -> bool {
        let Some(toons) = toons else {
            return self.toons.take().is_some();
        };

        let mut changed = self.toons.is_none();
        let current = self.toons.get_or_insert_with(Vec::new);

        for toon in toons {
            if !current.contains(toon) {
                current.push(toon.clone());
                changed = true;
            }
        }

        let before = current.len();
        current.retain(|t| toons.contains(t));
        changed |= current.len() != before;

        changed
    }
}

/// Default location of the config file: `<user config dir>/sc2-rsu/sc2-rsu.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sc2-rsu")
        .join(CONFIG_FILE_NAME)
}

/// Platform default directory to search for the replays root
pub fn default_scan_root() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("C:\\Users"))
    } else if cfg!(target_os = "linux") {
        PathBuf::from("/home")
    } else {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
    }
}
