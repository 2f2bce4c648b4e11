//! # Ember Common
//!
//! Common types, errors, and utilities shared across all EmberDB crates.

pub mod config;
pub mod error;
pub mod testing;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used external types
pub mod prelude {
    pub use super::config::*;
    pub use super::error::{Error, Result, StorageError};
    pub use super::types::*;
    pub use tracing::{debug, error, info, trace, warn};
}
