//! Store configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::wal::WalConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// WAL directory. `None` keeps everything in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub wal: WalConfig,

    /// Capacity of the writer's command queue
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    /// Per-observer notification buffer
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,

    /// Name of the category created on first startup
    #[serde(default = "default_category_name")]
    pub default_category_name: String,

    /// Write a snapshot and drop older segments after this many commits
    #[serde(default)]
    pub compact_every: Option<u64>,
}

fn default_command_buffer() -> usize {
    256
}

fn default_observer_buffer() -> usize {
    64
}

fn default_category_name() -> String {
    "Shortcuts".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            wal: WalConfig::default(),
            command_buffer: default_command_buffer(),
            observer_buffer: default_observer_buffer(),
            default_category_name: default_category_name(),
            compact_every: None,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> StoreResult<Self> {
        let config: StoreConfig =
            toml::from_str(contents).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults when it is missing.
    pub fn load(path: &Path) -> StoreResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml_str(&contents)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.command_buffer == 0 {
            return Err(StoreError::Config("command_buffer must be at least 1".into()));
        }
        if self.observer_buffer == 0 {
            return Err(StoreError::Config("observer_buffer must be at least 1".into()));
        }
        if self.wal.max_segment_size < 64 {
            return Err(StoreError::Config("wal.max_segment_size is too small".into()));
        }
        if self.compact_every == Some(0) {
            return Err(StoreError::Config("compact_every must be at least 1".into()));
        }
        if self.default_category_name.trim().is_empty() {
            return Err(StoreError::Config("default_category_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::SyncMode;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert!(config.data_dir.is_none());
        assert_eq!(config.default_category_name, "Shortcuts");
        assert_eq!(config.wal.sync_mode, SyncMode::Immediate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/shortcuts"
            compact_every = 500

            [wal]
            sync_mode = "batched"
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/shortcuts")));
        assert_eq!(config.compact_every, Some(500));
        assert_eq!(config.wal.sync_mode, SyncMode::Batched);
        assert_eq!(config.wal.max_segment_size, 64 * 1024 * 1024);
        assert_eq!(config.observer_buffer, 64);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = StoreConfig::from_toml_str("command_buffer = 0").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
        assert!(StoreConfig::from_toml_str("observer_buffer = \"lots\"").is_err());
    }

    #[test]
    fn test_load_missing_config() {
        let config = StoreConfig::load(Path::new("/nonexistent/path/store.toml")).unwrap();
        assert!(config.data_dir.is_none());
    }
}
