use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Everything an encore client can be configured with.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub playback: PlaybackConfig,
    pub server: ServerConfig,
}

/// Where local state lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Holds the catalog database and the blob cache. Must be absolute.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = match crate::project_dirs() {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => std::env::temp_dir().join("encore"),
        };
        Self { data_dir }
    }
}

impl StorageConfig {
    /// SQLite file holding catalog records and the search index.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("library.sqlite")
    }

    /// Directory of complete downloaded tracks.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Directory for working files of downloads in progress.
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on a one-shot catalog listing, in seconds.
    pub listing_timeout_secs: u64,
    pub backoff: BackoffConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { listing_timeout_secs: 300, backoff: BackoffConfig::default() }
    }
}

impl SyncConfig {
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }
}

/// Reconnect policy for the catalog sync stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: u32,
    /// Give up after this many failed attempts; retry forever if unset.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_ms: 500, max_ms: 60_000, multiplier: 2, max_attempts: None }
    }
}

impl BackoffConfig {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Chunks of a download to wait for before decoding starts.
    pub ready_chunks: u32,
    /// Interval between position reports, in milliseconds.
    pub tick_interval_ms: u64,
    /// Initial volume, `0.0..=1.0`.
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { ready_chunks: 3, tick_interval_ms: 200, volume: 1.0 }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// The remote catalog and blob server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: "localhost:80".to_string() }
    }
}
