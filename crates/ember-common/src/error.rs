//! Error types for EmberDB

use thiserror::Error;

use crate::types::{FrameId, PageId};

/// Result type alias using EmberDB's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for EmberDB
#[derive(Error, Debug)]
pub enum Error {
    // Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// Every frame is pinned; a normal condition under load, callers may
    /// retry once they release guards.
    #[error("Buffer pool full")]
    BufferPoolFull,

    #[error("Page not resident: {0}")]
    PageNotResident(PageId),

    #[error("Page pinned: {0}")]
    PagePinned(PageId),

    #[error("Frame {0} is pinned")]
    FramePinned(FrameId),

    #[error("Frame {0} is not tracked by the replacer")]
    FrameNotTracked(FrameId),

    #[error("Invalid page: {0}")]
    InvalidPage(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True when the error only means the pool is saturated with pinned
    /// pages, i.e. the caller may back off and retry.
    pub fn is_pool_full(&self) -> bool {
        matches!(self, Error::Storage(StorageError::BufferPoolFull))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Storage(StorageError::BufferPoolFull);
        assert_eq!(err.to_string(), "Storage error: Buffer pool full");

        let err = Error::Storage(StorageError::PageNotResident(PageId(7)));
        assert_eq!(err.to_string(), "Storage error: Page not resident: page:7");

        let err = Error::internal("oops");
        assert_eq!(err.to_string(), "Internal error: oops");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_is_pool_full() {
        assert!(Error::Storage(StorageError::BufferPoolFull).is_pool_full());
        assert!(!Error::Storage(StorageError::PagePinned(PageId(0))).is_pool_full());
        assert!(!Error::internal("oops").is_pool_full());
    }
}
