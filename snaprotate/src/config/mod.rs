//! Configuration: document loading, rule-driven validation and job resolution.

pub mod global;
pub mod job;
pub mod loader;
pub mod rules;
pub mod value;

pub use global::{GlobalConfig, LogLevel};
pub use job::{
    is_job_enabled, resolve_job, Credentials, EbsSnapshotSettings, InstanceSelector,
    JobDefinition, ModuleKind, ModuleSettings, TagPair,
};
pub use loader::{default_search_paths, locate_config, ConfigDocument};
pub use rules::{validate, EntryType, FieldRule, Validated};
pub use value::{ConfigValue, Section};
