//! courier.toml configuration handling
//!
//! ```toml
//! data_dir = "/var/lib/node/wnode"
//!
//! [storage]
//! sync_writes = true
//! snapshot_ops_threshold = 10000
//! ```

use anyhow::{Context, Result};
use courier_kv::StorageOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Store directory; `--data-dir` takes precedence
    pub data_dir: Option<PathBuf>,

    /// Disk engine options
    pub storage: StorageOptions,
}

impl CourierConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Config file if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Directory to operate on: the flag wins over the file
    pub fn resolve_data_dir(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        flag.or_else(|| self.data_dir.clone())
            .context("No store directory: pass --data-dir or set data_dir in the config file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("courier.toml");
        std::fs::write(
            &path,
            "data_dir = \"/tmp/wnode\"\n\n[storage]\nsync_writes = false\n",
        )
        .unwrap();

        let config = CourierConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/wnode")));
        assert!(!config.storage.sync_writes);
        assert_eq!(
            config.storage.snapshot_ops_threshold,
            StorageOptions::default().snapshot_ops_threshold
        );
    }

    #[test]
    fn test_flag_overrides_file() {
        let config = CourierConfig {
            data_dir: Some(PathBuf::from("/from/file")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_data_dir(Some(PathBuf::from("/from/flag"))).unwrap(),
            PathBuf::from("/from/flag")
        );
        assert_eq!(config.resolve_data_dir(None).unwrap(), PathBuf::from("/from/file"));
        assert!(CourierConfig::default().resolve_data_dir(None).is_err());
    }

    #[test]
    fn test_unknown_file_is_error() {
        let missing = Path::new("/nonexistent/courier.toml");
        assert!(CourierConfig::load_or_default(Some(missing)).is_err());
        assert!(CourierConfig::load_or_default(None).is_ok());
    }
}
