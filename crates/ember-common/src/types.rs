//! Core types for EmberDB

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a page.
///
/// Page ids are signed so that `INVALID_PAGE_ID` (-1) can denote "no page";
/// every id handed out by the buffer pool is non-negative and monotonically
/// increasing within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub i64);

/// Sentinel page id denoting "no page".
pub const INVALID_PAGE_ID: PageId = PageId(-1);

impl PageId {
    pub const INVALID: PageId = PageId(-1);

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Index of a frame in the buffer pool's frame array.
///
/// Frame ids always lie in `[0, pool_size)`; they are positions, not handles,
/// and are reused as pages come and go.
pub type FrameId = usize;
