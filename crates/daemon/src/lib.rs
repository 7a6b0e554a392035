//! SC2 replay uploader
//!
//! Finds StarCraft II account replay folders, watches them for new replays,
//! waits for each file to finish writing, then uploads it to sc2replaystats
//! and polls until the server has processed it.

pub mod accounts;
pub mod client;
pub mod daemon;
pub mod pipeline;
pub mod registry;
pub mod scan;
pub mod stability;
pub mod status_server;
pub mod telemetry;
pub mod watcher;

pub use accounts::{
    character_id, discover_watch_paths, group_toons, region_name, watch_paths, AccountGroup,
    ToonEnablement,
};
pub use client::{
    client_identifier, parse_duplicate, valid_api_key, AccountPlayer, ClientError, Player,
    Sc2ReplayStatsClient, UploadClient,
};
pub use daemon::{Daemon, DaemonError};
pub use pipeline::{
    backoff_delay, poll_until_resolved, Notice, PipelineSettings, PollError, UploadPipeline,
};
pub use registry::{map_name_from_path, RegistryEvent, UploadRecord, UploadRegistry, UploadStatus};
pub use scan::{
    enumerate_accounts, find_directories_by_suffix, find_replays_root, strip_path_parts,
    toon_replay_dir, ScanError,
};
pub use sc2_rsu_config as config;
pub use sc2_rsu_config::Config;
pub use stability::{assess_sample, wait_for_stable, StabilityError, StabilityResult, MIN_REPLAY_SIZE};
pub use status_server::{create_status_router, run_status_server, ServerError, StatusState};
pub use telemetry::{init_logging, TelemetryError};
pub use watcher::{DirectoryWatcher, WatchError, LOOSE_REPLAY_SUFFIX};
