//! Configuration types for EmberDB

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the database file
    pub data_dir: PathBuf,

    /// Number of frames in the buffer pool
    #[serde(default = "default_buffer_pool_pages")]
    pub buffer_pool_pages: usize,

    /// K value for the LRU-K replacer
    #[serde(default = "default_replacer_k")]
    pub replacer_k: usize,

    /// Fsync the database file after flushing all pages
    #[serde(default)]
    pub sync_on_flush: bool,
}

fn default_buffer_pool_pages() -> usize {
    1024
}

fn default_replacer_k() -> usize {
    2
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_pages: default_buffer_pool_pages(),
            replacer_k: default_replacer_k(),
            sync_on_flush: false,
        }
    }
}

impl StorageConfig {
    /// Validate the configuration and return any errors.
    /// Fatal errors are returned as `Err(Vec<String>)`.
    /// Warnings are logged but do not cause failure.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.buffer_pool_pages == 0 {
            errors.push("buffer_pool_pages must be > 0".to_string());
        }

        if self.replacer_k == 0 {
            errors.push("replacer_k must be > 0".to_string());
        }

        if self.replacer_k > self.buffer_pool_pages {
            errors.push(format!(
                "replacer_k ({}) must not exceed buffer_pool_pages ({})",
                self.replacer_k, self.buffer_pool_pages
            ));
        }

        // Warnings (logged but not fatal)
        if !self.data_dir.exists() {
            tracing::warn!("data_dir {:?} does not exist yet (will be created)", self.data_dir);
        }
        if self.buffer_pool_pages < 16 {
            tracing::warn!(
                "buffer_pool_pages = {} is very small; expect heavy eviction churn",
                self.buffer_pool_pages
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StorageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_pool_pages, 1024);
        assert_eq!(config.replacer_k, 2);
        assert!(!config.sync_on_flush);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = StorageConfig {
            buffer_pool_pages: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("buffer_pool_pages")));
    }

    #[test]
    fn test_k_exceeding_pool_rejected() {
        let config = StorageConfig {
            buffer_pool_pages: 4,
            replacer_k: 8,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("replacer_k")));
    }
}
