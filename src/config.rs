use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dedup::KeepStrategy;
use crate::error::{Error, Result};
use crate::hasher::{HashAlgorithm, HashMode, Hasher, DEFAULT_QUICK_WINDOW, DEFAULT_SMART_THRESHOLD_MB};
use crate::scanner::ScanOptions;
use crate::walker::default_exclude_dirs;

const DATA_DIR_NAME: &str = ".tidyfs";

/// User configuration. Every field has a default, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub exclude_dirs: BTreeSet<String>,
    pub include_hidden: bool,
    pub hash_algorithm: HashAlgorithm,
    pub hash_mode: HashMode,
    pub smart_threshold_mb: u64,
    pub quick_window_bytes: u64,
    pub keep_strategy: KeepStrategy,
    pub verify_before_delete: bool,
    pub use_cache: bool,
    pub parallel_hashing: bool,
    pub threads: Option<usize>,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude_dirs: default_exclude_dirs(),
            include_hidden: false,
            hash_algorithm: HashAlgorithm::Sha256,
            hash_mode: HashMode::Full,
            smart_threshold_mb: DEFAULT_SMART_THRESHOLD_MB,
            quick_window_bytes: DEFAULT_QUICK_WINDOW,
            keep_strategy: KeepStrategy::Newest,
            verify_before_delete: true,
            use_cache: true,
            parallel_hashing: true,
            threads: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load a JSON config file, filling unspecified fields with defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Config = serde_json::from_str(&text).map_err(|e| {
            Error::InvalidArgument(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else `<data_dir>/config.json` when it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let implicit = Self::default().data_dir().join("config.json");
        if implicit.is_file() {
            Self::load(&implicit)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.quick_window_bytes < 2 {
            return Err(Error::InvalidArgument(
                "quick_window_bytes must be at least 2".to_string(),
            ));
        }
        if self.threads == Some(0) {
            return Err(Error::InvalidArgument(
                "threads must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DATA_DIR_NAME),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn operation_log_path(&self) -> PathBuf {
        self.data_dir().join("operations.json")
    }

    pub fn hasher(&self) -> Hasher {
        Hasher::new(self.hash_algorithm, self.hash_mode)
            .with_quick_window(self.quick_window_bytes)
            .with_smart_threshold_mb(self.smart_threshold_mb)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            include_hidden: self.include_hidden,
            use_cache: self.use_cache,
            hasher: self.hasher(),
            parallel: self.parallel_hashing,
            threads: self.threads,
            exclude_dirs: self.exclude_dirs.clone(),
            show_progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.exclude_dirs.contains("node_modules"));
        assert!(config.exclude_dirs.contains("venv"));
        assert_eq!(config.exclude_dirs.len(), 6);
        assert_eq!(config.smart_threshold_mb, 100);
        assert_eq!(config.quick_window_bytes, 1024 * 1024);
        assert!(config.verify_before_delete);
        assert_eq!(config.keep_strategy, KeepStrategy::Newest);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "hash_algorithm": "md5", "keep_strategy": "shortest_path", "data_dir": "/tmp/tfs" }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Md5);
        assert_eq!(config.keep_strategy, KeepStrategy::ShortestPath);
        assert!(config.use_cache);
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/tfs/cache"));
        assert_eq!(
            config.operation_log_path(),
            PathBuf::from("/tmp/tfs/operations.json")
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "keep_stratgey": "oldest" }"#).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_zero_threads_is_rejected() {
        let config = Config {
            threads: Some(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
