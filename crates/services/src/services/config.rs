//! Runtime configuration for the sync layer.
//!
//! Read from `sync.toml` in the per-user config directory. Every field has a
//! default, so a missing file or a partial one is fine.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "sync.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on any single remote call. `0` disables the bound.
    pub remote_timeout_secs: u64,
    /// How many change-event ids are remembered for deduplication.
    pub dedup_capacity: usize,
    pub resubscribe_attempts: usize,
    pub resubscribe_min_delay_ms: u64,
    pub resubscribe_max_delay_ms: u64,
    pub draft_autoflush_ms: Option<u64>,
    pub attachment_bucket: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout_secs: 30,
            dedup_capacity: 10_000,
            resubscribe_attempts: 5,
            resubscribe_min_delay_ms: 250,
            resubscribe_max_delay_ms: 10_000,
            draft_autoflush_ms: None,
            attachment_bucket: "task-attachments".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no sync config, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the per-user config directory, falling back to defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match utils::path::config_file(CONFIG_FILE_NAME) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Apply `SYNC_REMOTE_TIMEOUT_SECS` and `SYNC_DEDUP_CAPACITY` when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("SYNC_REMOTE_TIMEOUT_SECS") {
            match raw.trim().parse() {
                Ok(secs) => self.remote_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "ignoring invalid SYNC_REMOTE_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = lookup("SYNC_DEDUP_CAPACITY") {
            match raw.trim().parse() {
                Ok(cap) if cap > 0 => self.dedup_capacity = cap,
                _ => warn!(value = %raw, "ignoring invalid SYNC_DEDUP_CAPACITY"),
            }
        }
        self
    }

    pub fn remote_timeout(&self) -> Option<Duration> {
        (self.remote_timeout_secs > 0).then(|| Duration::from_secs(self.remote_timeout_secs))
    }

    pub fn draft_autoflush(&self) -> Option<Duration> {
        self.draft_autoflush_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.remote_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.attachment_bucket, "task-attachments");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "remote_timeout_secs = 0\ndraft_autoflush_ms = 500\n").unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.remote_timeout(), None);
        assert_eq!(config.draft_autoflush(), Some(Duration::from_millis(500)));
        assert_eq!(config.dedup_capacity, 10_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "dedup_capacity = \"lots\"").unwrap();
        assert!(matches!(SyncConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn overrides_replace_only_valid_values() {
        let config = SyncConfig::default().with_overrides(|key| match key {
            "SYNC_REMOTE_TIMEOUT_SECS" => Some("5".to_string()),
            "SYNC_DEDUP_CAPACITY" => Some("zero".to_string()),
            _ => None,
        });
        assert_eq!(config.remote_timeout_secs, 5);
        assert_eq!(config.dedup_capacity, 10_000);
    }
}
