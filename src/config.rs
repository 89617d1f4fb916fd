//! Configuration management for beamsync

use crate::cache::CachingStateReader;
use crate::error::{Result, SyncError};
use crate::sync::MAX_BATCH;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub beam: BeamConfig,
    #[serde(default)]
    pub txpool: TxPoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
    #[serde(default)]
    pub request_threshold: u32,
    #[serde(default = "default_idle_interval", deserialize_with = "human_duration")]
    pub idle_interval: Duration,
    #[serde(default = "default_request_timeout", deserialize_with = "human_duration")]
    pub request_timeout: Duration,
    /// Batches unanswered for this long are forgotten by the feed.
    #[serde(default = "default_in_flight_timeout", deserialize_with = "human_duration")]
    pub in_flight_timeout: Duration,
    #[serde(default = "default_max_resolution_steps")]
    pub max_resolution_steps: usize,
    #[serde(default = "default_max_parked_batches")]
    pub max_parked_batches: usize,
    #[serde(default = "default_max_peer_failures")]
    pub max_peer_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            request_threshold: 0,
            idle_interval: default_idle_interval(),
            request_timeout: default_request_timeout(),
            in_flight_timeout: default_in_flight_timeout(),
            max_resolution_steps: default_max_resolution_steps(),
            max_parked_batches: default_max_parked_batches(),
            max_peer_failures: default_max_peer_failures(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeamConfig {
    #[serde(default = "default_processing_timeout", deserialize_with = "human_duration")]
    pub processing_timeout: Duration,
    #[serde(default = "default_block_channel_capacity")]
    pub block_channel_capacity: usize,
    #[serde(default = "default_state_cache_capacity")]
    pub state_cache_capacity: usize,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            processing_timeout: default_processing_timeout(),
            block_channel_capacity: default_block_channel_capacity(),
            state_cache_capacity: default_state_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxPoolConfig {
    #[serde(default)]
    pub min_gas_price: u64,
    #[serde(default = "default_max_nonce_gap")]
    pub max_nonce_gap: u64,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            min_gas_price: 0,
            max_nonce_gap: default_max_nonce_gap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Reject values the sync engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_batch_size == 0 || self.sync.max_batch_size > MAX_BATCH {
            return Err(SyncError::Config(format!(
                "sync.max_batch_size must be between 1 and {}",
                MAX_BATCH
            )));
        }
        if self.sync.in_flight_timeout <= self.sync.request_timeout {
            return Err(SyncError::Config(
                "sync.in_flight_timeout must exceed sync.request_timeout".to_string(),
            ));
        }
        if self.sync.max_resolution_steps == 0 {
            return Err(SyncError::Config(
                "sync.max_resolution_steps must be at least 1".to_string(),
            ));
        }
        if self.sync.max_peer_failures == 0 {
            return Err(SyncError::Config(
                "sync.max_peer_failures must be at least 1".to_string(),
            ));
        }
        if self.beam.block_channel_capacity == 0 {
            return Err(SyncError::Config(
                "beam.block_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from `path`, falling back to defaults when the file is
/// absent or empty.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let config_str = match fs::read_to_string(path.as_ref()) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let config: Config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    config.validate()?;
    Ok(config)
}

fn human_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn default_max_batch_size() -> u32 {
    MAX_BATCH
}

fn default_idle_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_in_flight_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_resolution_steps() -> usize {
    4096
}

fn default_max_parked_batches() -> usize {
    1024
}

fn default_max_peer_failures() -> u32 {
    3
}

fn default_processing_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_block_channel_capacity() -> usize {
    16
}

fn default_state_cache_capacity() -> usize {
    CachingStateReader::DEFAULT_CAPACITY
}

fn default_max_nonce_gap() -> u64 {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.sync.max_batch_size, MAX_BATCH);
        assert_eq!(config.sync.idle_interval, Duration::from_millis(200));
        assert_eq!(config.txpool.max_nonce_gap, 16);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_parses_durations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[sync]\nmax_batch_size = 64\nrequest_timeout = \"1s 500ms\"\n\n[beam]\nprocessing_timeout = \"2m\""
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sync.max_batch_size, 64);
        assert_eq!(config.sync.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.beam.processing_timeout, Duration::from_secs(120));
        assert_eq!(config.beam.block_channel_capacity, 16);
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nmax_batch_size = 512").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_in_flight_timeout_must_outlast_requests() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nrequest_timeout = \"5s\"\nin_flight_timeout = \"5s\"").unwrap();
        assert!(matches!(load_config(file.path()), Err(SyncError::Config(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nrequest_timeout = \"5s\"\nin_flight_timeout = \"1m\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sync.in_flight_timeout, Duration::from_secs(60));
    }
}
