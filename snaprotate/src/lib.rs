//! Snaprotate Library
//!
//! Scheduled EBS snapshot backups with age-based rotation. Jobs are read
//! from a YAML document, validated against per-module rule tables and run
//! one after another against a [`provider::CloudProvider`].

pub mod config;
pub mod locator;
pub mod modules;
pub mod orchestrator;
pub mod provider;
pub mod rotation;
pub mod utils;

// Re-export commonly used types
pub use config::{ConfigDocument, JobDefinition};
pub use orchestrator::{JobStatus, Orchestrator, RunSummary};
pub use utils::errors::{ConfigError, SnapError};
pub type Result<T> = std::result::Result<T, SnapError>;
