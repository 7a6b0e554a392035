//! Configuration module for the SC2 replay uploader
//!
//! Handles loading configuration from TOML files, environment variable overrides,
//! and writing user changes (API key, replays root, toon allow-list) back to disk.

pub mod config;

pub use config::*;
