//! # Ember Storage
//!
//! Buffer pool core for EmberDB providing:
//! - A fixed-size page cache with exact pin-count and dirty tracking
//! - LRU-K replacement with a two-queue young/old refinement
//! - Scoped page guards combining pinning with per-frame latching
//! - Blocking page-granularity disk I/O

pub mod buffer;
pub mod disk;
pub mod replacer;

// Re-export key types for convenience
pub use buffer::{
    BufferPoolManager, BufferPoolStats, PageFrame, PageGuard, ReadPageGuard, WritePageGuard,
};
pub use disk::DiskManager;
pub use replacer::{AccessType, LruKReplacer};

/// Page size constant (4KB default)
pub const PAGE_SIZE: usize = 4096;
