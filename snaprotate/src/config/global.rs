//! The `global` configuration section.

use std::fmt;

use super::rules::{validate, EntryType, FieldRule};
use super::value::Section;
use crate::utils::ConfigError;

pub const GLOBAL_RULES: &[FieldRule] = &[FieldRule::optional("loglevel", EntryType::String, "info")
    .one_of(&["error", "warn", "info", "debug"])];

/// Verbosity accepted by `global.loglevel` and `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated global settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
}

impl GlobalConfig {
    pub fn resolve(section: &Section) -> Result<Self, ConfigError> {
        let validated = validate(section, GLOBAL_RULES)?;
        let raw = validated.str("loglevel").unwrap_or("info");
        let log_level = LogLevel::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
            key: "loglevel".to_string(),
            value: raw.to_string(),
            reason: "unsupported log level".to_string(),
        })?;
        Ok(GlobalConfig { log_level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::value::ConfigValue;

    #[test]
    fn test_empty_global_section_defaults_to_info() {
        let global = GlobalConfig::resolve(&Section::new()).unwrap();
        assert_eq!(global.log_level, LogLevel::Info);
    }

    #[test]
    fn test_explicit_log_level() {
        let mut section = Section::new();
        section.insert("loglevel".to_string(), ConfigValue::from("debug"));
        let global = GlobalConfig::resolve(&section).unwrap();
        assert_eq!(global.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_unknown_global_key() {
        let mut section = Section::new();
        section.insert("log_level".to_string(), ConfigValue::from("debug"));
        assert!(matches!(
            GlobalConfig::resolve(&section),
            Err(ConfigError::UnknownField { .. })
        ));
    }
}
