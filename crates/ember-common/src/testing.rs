//! Testing utilities and fixtures

use std::path::PathBuf;
use tempfile::TempDir;

/// Test context with automatic cleanup
pub struct TestContext {
    pub temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("test.db")
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Test fixtures for common scenarios
pub mod fixtures {
    /// Generate a deterministic byte pattern for page round-trip tests.
    ///
    /// The same seed always yields the same bytes, so a page written with
    /// `page_pattern(seed, len)` can be verified after eviction and re-read.
    pub fn page_pattern(seed: u64, len: usize) -> Vec<u8> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut result = Vec::with_capacity(len);
        for i in 0..len {
            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            i.hash(&mut hasher);
            result.push(hasher.finish() as u8);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_context() {
        let ctx = TestContext::new();
        assert!(ctx.path().exists());
        assert!(ctx.db_path().to_str().unwrap().contains("test.db"));
    }

    #[test]
    fn test_page_pattern_deterministic() {
        let a = fixtures::page_pattern(42, 128);
        let b = fixtures::page_pattern(42, 128);
        let c = fixtures::page_pattern(43, 128);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 128);
    }
}
