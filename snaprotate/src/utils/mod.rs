//! Utility modules for snaprotate.

pub mod errors;
pub mod logger;

pub use errors::{ConfigError, Result, SnapError};
