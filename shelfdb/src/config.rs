use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store configuration, consumed once when the store opens.
///
/// ```yaml
/// storage:
///   file: db/data.db
/// write_mode: queued
/// watchers: true
/// watch_workers: 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub storage: Storage,
    pub write_mode: WriteMode,
    /// Whether `watch` registrations are accepted and delivered.
    pub watchers: bool,
    /// Read by external inspector tooling; the store itself ignores it.
    pub inspector: bool,
    /// Size of the watch delivery pool in queued mode.
    pub watch_workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// All writes go through one background writer thread.
    Queued,
    /// Writes run on the caller's thread and watchers fire inline.
    Sync,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            storage: Storage::File(PathBuf::from("db/data.db")),
            write_mode: WriteMode::Queued,
            watchers: true,
            inspector: false,
            watch_workers: 5,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig {
            storage: Storage::Memory,
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            storage: Storage::File(path.into()),
            ..Default::default()
        }
    }

    /// Parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.storage, Storage::File(PathBuf::from("db/data.db")));
        assert_eq!(config.write_mode, WriteMode::Queued);
        assert!(config.watchers);
        assert!(!config.inspector);
        assert_eq!(config.watch_workers, 5);
    }

    #[test]
    fn test_yaml_memory_sync() {
        let config = StoreConfig::from_yaml_str("storage: memory\nwrite_mode: sync\nwatchers: false\n").unwrap();
        assert_eq!(config.storage, Storage::Memory);
        assert_eq!(config.write_mode, WriteMode::Sync);
        assert!(!config.watchers);
        assert_eq!(config.watch_workers, 5);
    }

    #[test]
    fn test_yaml_file_storage() {
        let config =
            StoreConfig::from_yaml_str("storage:\n  file: /tmp/shelf/data.db\ninspector: true\nwatch_workers: 2\n")
                .unwrap();
        assert_eq!(config.storage, Storage::File(PathBuf::from("/tmp/shelf/data.db")));
        assert!(config.inspector);
        assert_eq!(config.watch_workers, 2);
    }

    #[test]
    fn test_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("shelf.yaml");
        std::fs::write(&path, "write_mode: sync\n").unwrap();
        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.write_mode, WriteMode::Sync);
    }

    #[test]
    fn test_bad_yaml() {
        assert!(StoreConfig::from_yaml_str("write_mode: sideways\n").is_err());
    }
}
