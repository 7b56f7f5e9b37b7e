use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// GTFS-realtime VehiclePositions feed URL. Required.
    pub vehicle_positions_url: String,
    /// GTFS-realtime TripUpdates feed URL. Required.
    pub trip_updates_url: String,
    /// API key sent as `x-api-key` on both realtime feed requests.
    #[serde(default)]
    pub realtime_api_key: String,
    /// One or more GTFS static schedule ZIP URLs, merged at load time.
    pub static_catalog_urls: Vec<String>,
    /// `redis://...` URL for the live state store. Falls back to an
    /// in-process store when unset or unreachable at startup.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "Config::default_bind_host")]
    pub bind_host: String,
    #[serde(default = "Config::default_bind_port")]
    pub bind_port: u16,

    /// IANA timezone used for local-hour-dependent calculations (load
    /// factor buckets, stats `hour`/`weekday` fields).
    #[serde(default = "Config::default_timezone")]
    pub timezone: String,

    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,

    #[serde(default = "Config::default_stats_file")]
    pub stats_file: String,

    /// Realtime poll loop interval, in seconds. 10-15s is the sane range;
    /// default 10s.
    #[serde(default = "Config::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Stats Snapshotter collection interval, in seconds. Default 300s (5m).
    #[serde(default = "Config::default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn default_bind_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_bind_port() -> u16 {
        3000
    }

    fn default_timezone() -> String {
        "Europe/Dublin".to_string()
    }

    fn default_stats_file() -> String {
        "data/stats.jsonl".to_string()
    }

    fn default_poll_interval_secs() -> u64 {
        10
    }

    fn default_stats_interval_secs() -> u64 {
        300
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vehicle_positions_url: String::new(),
            trip_updates_url: String::new(),
            realtime_api_key: String::new(),
            static_catalog_urls: Vec::new(),
            redis_url: None,
            bind_host: Config::default_bind_host(),
            bind_port: Config::default_bind_port(),
            timezone: Config::default_timezone(),
            cors_origins: Vec::new(),
            cors_permissive: false,
            stats_file: Config::default_stats_file(),
            poll_interval_secs: Config::default_poll_interval_secs(),
            stats_interval_secs: Config::default_stats_interval_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(String),
    #[error("failed to parse config: {0}")]
    ParseError(String),
}
