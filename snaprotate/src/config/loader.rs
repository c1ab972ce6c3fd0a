//! Locating and reading the YAML configuration document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::global::GlobalConfig;
use super::value::{section_from_mapping, ConfigValue, Section};
use crate::utils::{Result, SnapError};

const CONFIG_DIR: &str = "snaprotate";
const CONFIG_FILE: &str = "snaprotate.yaml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    #[serde(default)]
    global: serde_yaml::Value,
    #[serde(default)]
    jobs: serde_yaml::Value,
}

/// Parsed configuration document: the global section plus one raw section
/// per job, keyed (and therefore ordered) by job name.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    pub global: Section,
    pub jobs: BTreeMap<String, ConfigValue>,
}

impl ConfigDocument {
    /// Parse a document from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if value.is_null() {
            return Ok(ConfigDocument::default());
        }
        let raw: RawDocument = serde_yaml::from_value(value)?;

        let global = match raw.global {
            serde_yaml::Value::Null => Section::new(),
            serde_yaml::Value::Mapping(mapping) => section_from_mapping(mapping)?,
            _ => {
                return Err(SnapError::ConfigLoad(
                    "the \"global\" section must be a mapping".to_string(),
                ))
            }
        };

        let jobs = match raw.jobs {
            serde_yaml::Value::Null => BTreeMap::new(),
            serde_yaml::Value::Mapping(mapping) => section_from_mapping(mapping)?,
            _ => {
                return Err(SnapError::ConfigLoad(
                    "the \"jobs\" section must be a mapping of job names".to_string(),
                ))
            }
        };

        Ok(ConfigDocument { global, jobs })
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SnapError::ConfigLoad(format!(
                "failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validate the global section.
    pub fn global_config(&self) -> Result<GlobalConfig> {
        GlobalConfig::resolve(&self.global).map_err(SnapError::from)
    }
}

/// Default locations searched when no configuration file is given, in order.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut dirs_to_search = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs_to_search.push(home);
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs_to_search.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs_to_search.push(exe_dir);
    }
    if cfg!(unix) {
        dirs_to_search.push(PathBuf::from("/etc"));
    }

    dirs_to_search
        .into_iter()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
        .collect()
}

/// Pick the configuration file: the explicit path if given, otherwise the
/// first candidate that exists.
pub fn locate_config(explicit: Option<&Path>, candidates: &[PathBuf]) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    for candidate in candidates {
        tracing::debug!(path = %candidate.display(), "Looking for configuration");
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    Err(SnapError::ConfigLoad(format!(
        "could not find the configuration file in any of the following locations: {}",
        searched.join(",")
    )))
}
