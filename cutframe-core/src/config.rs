//! Player configuration (`<config dir>/cutframe/player.json`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame_buffer::DEFAULT_CAPACITY;
use crate::prefetch::PrefetchSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Frames held ahead of the playback position
    pub buffer_capacity: usize,
    pub poll_interval_ms: u64,
    pub prefetch_backoff_ms: u64,
    pub decode_retry_ms: u64,
    pub max_consecutive_decode_errors: u32,
    /// Reject closest-frame matches further away than this; `null` accepts any
    pub match_tolerance_ms: Option<i64>,
    pub worker_join_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            poll_interval_ms: 16,
            prefetch_backoff_ms: 5,
            decode_retry_ms: 10,
            max_consecutive_decode_errors: 50,
            match_tolerance_ms: None,
            worker_join_timeout_ms: 2000,
        }
    }
}

impl PlayerConfig {
    /// Load from the default location, or defaults when there is no file.
    pub fn load() -> Result<Self, ConfigError> {
        match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config.validated())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Clamp values that would stall or spin the pipeline.
    pub fn validated(mut self) -> Self {
        if self.buffer_capacity == 0 {
            warn!("buffer_capacity 0 is not usable, using 1");
            self.buffer_capacity = 1;
        }
        if self.poll_interval_ms == 0 {
            warn!("poll_interval_ms 0 would spin, using 1");
            self.poll_interval_ms = 1;
        }
        self.prefetch_backoff_ms = self.prefetch_backoff_ms.max(1);
        self.max_consecutive_decode_errors = self.max_consecutive_decode_errors.max(1);
        if let Some(tolerance) = self.match_tolerance_ms {
            if tolerance < 0 {
                warn!("Negative match_tolerance_ms {}, using 0", tolerance);
                self.match_tolerance_ms = Some(0);
            }
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }

    pub fn prefetch_settings(&self) -> PrefetchSettings {
        PrefetchSettings {
            backoff: Duration::from_millis(self.prefetch_backoff_ms),
            decode_retry: Duration::from_millis(self.decode_retry_ms),
            max_consecutive_errors: self.max_consecutive_decode_errors,
        }
    }
}

pub fn config_file_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("cutframe");
    path.push("player.json");
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.buffer_capacity, 200);
        assert_eq!(config.poll_interval(), Duration::from_millis(16));
        assert_eq!(config.match_tolerance_ms, None);
        assert_eq!(config.worker_join_timeout(), Duration::from_secs(2));
        assert_eq!(config.prefetch_settings().max_consecutive_errors, 50);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        std::fs::write(&path, r#"{ "buffer_capacity": 64, "match_tolerance_ms": 40 }"#).unwrap();

        let config = PlayerConfig::load_from(&path).unwrap();
        assert_eq!(config.buffer_capacity, 64);
        assert_eq!(config.match_tolerance_ms, Some(40));
        assert_eq!(config.poll_interval_ms, 16);
    }

    #[test]
    fn test_validation_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        std::fs::write(
            &path,
            r#"{ "buffer_capacity": 0, "poll_interval_ms": 0, "match_tolerance_ms": -5 }"#,
        )
        .unwrap();

        let config = PlayerConfig::load_from(&path).unwrap();
        assert_eq!(config.buffer_capacity, 1);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.match_tolerance_ms, Some(0));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("player.json");
        let config = PlayerConfig {
            buffer_capacity: 90,
            worker_join_timeout_ms: 500,
            ..PlayerConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(PlayerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            PlayerConfig::load_from(&missing),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            PlayerConfig::load_from(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }
}
