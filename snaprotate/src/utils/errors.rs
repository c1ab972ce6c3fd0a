//! Custom error types for snaprotate.

use thiserror::Error;

/// Violations reported while validating a configuration section.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration entry \"{key}\" must be specified")]
    MissingField { key: String },

    #[error("entry \"{key}\" is not a valid entry in this section of the configuration")]
    UnknownField { key: String },

    #[error("value \"{value}\" of entry \"{key}\" has the wrong type: found={found} expected={expected}")]
    TypeMismatch {
        key: String,
        value: String,
        found: String,
        expected: String,
    },

    #[error("value \"{value}\" is invalid for configuration entry \"{key}\": {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("validation rule for \"{key}\" is inconsistent: {reason}")]
    InvalidRule { key: String, reason: String },
}

impl ConfigError {
    /// Name of the configuration key the error refers to.
    pub fn key(&self) -> &str {
        match self {
            ConfigError::MissingField { key }
            | ConfigError::UnknownField { key }
            | ConfigError::TypeMismatch { key, .. }
            | ConfigError::InvalidValue { key, .. }
            | ConfigError::InvalidRule { key, .. } => key,
        }
    }
}

#[derive(Error, Debug)]
pub enum SnapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Configuration error in job \"{job}\": {source}")]
    Job {
        job: String,
        #[source]
        source: ConfigError,
    },

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Provider initialisation failed: {0}")]
    ProviderInit(String),

    #[error("Resource query failed: {0}")]
    ResourceQueryFailed(String),

    #[error("Failed to create snapshot of volume {volume_id}: {reason}")]
    SnapshotCreateFailed { volume_id: String, reason: String },

    #[error("Failed to delete snapshot {snapshot_id}: {reason}")]
    SnapshotDeleteFailed { snapshot_id: String, reason: String },

    #[error("Backup module error: {0}")]
    Module(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SnapError {
    /// Attach a job name to a configuration error.
    pub fn job(job: impl Into<String>, source: ConfigError) -> Self {
        SnapError::Job {
            job: job.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;
