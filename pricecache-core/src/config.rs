//! TOML configuration for the cache, reconciler and Yahoo source.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! cache_dir = ".cache"
//! fetch_timeout_secs = 60
//! prune_superseded = true
//!
//! [yahoo]
//! max_retries = 3
//! base_delay_ms = 500
//! timeout_secs = 30
//! breaker_cooldown_secs = 1800
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceCacheConfig {
    /// Directory holding cache entries.
    pub cache_dir: PathBuf,
    /// Upper bound on a single source call; `0` waits indefinitely.
    pub fetch_timeout_secs: Option<u64>,
    /// Delete entries made redundant by an extended entry.
    pub prune_superseded: bool,
    pub yahoo: YahooConfig,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache"),
            fetch_timeout_secs: Some(60),
            prune_superseded: true,
            yahoo: YahooConfig::default(),
        }
    }
}

impl PriceCacheConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YahooConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
            breaker_cooldown_secs: 30 * 60,
        }
    }
}

impl YahooConfig {
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}
