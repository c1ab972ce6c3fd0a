//! Rule-table driven validation of configuration sections.
//!
//! A section is checked against an ordered list of [`FieldRule`] records.
//! Validation is a pure function: it never mutates its input and returns a
//! new section holding every recognised key, with defaults injected for the
//! optional keys that were left out.

use std::collections::HashSet;

use super::value::{ConfigValue, Section};
use crate::utils::ConfigError;

/// Primitive type a configuration entry must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    String,
    Bool,
    Integer,
    /// No type constraint.
    Any,
}

impl EntryType {
    pub fn name(&self) -> &'static str {
        match self {
            EntryType::String => "string",
            EntryType::Bool => "bool",
            EntryType::Integer => "integer",
            EntryType::Any => "any",
        }
    }

    pub fn accepts(&self, value: &ConfigValue) -> bool {
        match self {
            EntryType::String => matches!(value, ConfigValue::String(_)),
            EntryType::Bool => matches!(value, ConfigValue::Bool(_)),
            EntryType::Integer => matches!(value, ConfigValue::Integer(_)),
            EntryType::Any => true,
        }
    }

    /// Turn a default written as text into a value of this type.
    fn parse_default(&self, raw: &str) -> Option<ConfigValue> {
        match self {
            EntryType::String | EntryType::Any => Some(ConfigValue::String(raw.to_string())),
            EntryType::Bool => raw.parse::<bool>().ok().map(ConfigValue::Bool),
            EntryType::Integer => raw.parse::<i64>().ok().map(ConfigValue::Integer),
        }
    }
}

/// Describes one recognised configuration key.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub entry_type: EntryType,
    pub mandatory: bool,
    /// Default used when the key is absent; empty means no default applies.
    pub default: &'static str,
    /// Closed set of allowed renderings; empty means unrestricted.
    pub allowed: &'static [&'static str],
}

impl FieldRule {
    pub const fn required(name: &'static str, entry_type: EntryType) -> Self {
        FieldRule {
            name,
            entry_type,
            mandatory: true,
            default: "",
            allowed: &[],
        }
    }

    pub const fn optional(name: &'static str, entry_type: EntryType, default: &'static str) -> Self {
        FieldRule {
            name,
            entry_type,
            mandatory: false,
            default,
            allowed: &[],
        }
    }

    pub const fn one_of(self, allowed: &'static [&'static str]) -> Self {
        FieldRule { allowed, ..self }
    }

    /// Check a value that is present in the section against this rule.
    pub fn check(&self, value: &ConfigValue) -> Result<(), ConfigError> {
        if !self.entry_type.accepts(value) {
            return Err(ConfigError::TypeMismatch {
                key: self.name.to_string(),
                value: value.to_string(),
                found: value.type_name().to_string(),
                expected: self.entry_type.name().to_string(),
            });
        }

        let rendered = value.to_string();
        if !self.allowed.is_empty() && !self.allowed.contains(&rendered.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: self.name.to_string(),
                value: rendered,
                reason: format!("it must be one of [{}]", self.allowed.join(", ")),
            });
        }

        Ok(())
    }

    fn default_value(&self) -> Result<Option<ConfigValue>, ConfigError> {
        if self.default.is_empty() {
            return Ok(None);
        }
        match self.entry_type.parse_default(self.default) {
            Some(value) => Ok(Some(value)),
            None => Err(ConfigError::InvalidRule {
                key: self.name.to_string(),
                reason: format!(
                    "default \"{}\" is not a valid {}",
                    self.default,
                    self.entry_type.name()
                ),
            }),
        }
    }
}

/// Verify that a rule table is self-consistent: unique names, and defaults
/// that satisfy both the declared type and the allowed set.
pub fn check_rules(rules: &[FieldRule]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.name) {
            return Err(ConfigError::InvalidRule {
                key: rule.name.to_string(),
                reason: "declared more than once".to_string(),
            });
        }
        if let Some(default) = rule.default_value()? {
            rule.check(&default).map_err(|e| ConfigError::InvalidRule {
                key: rule.name.to_string(),
                reason: format!("default does not satisfy the rule: {}", e),
            })?;
        }
    }
    Ok(())
}

/// Validate `raw` against `rules` and return the section with defaults applied.
///
/// Unknown keys are rejected before any individual rule is evaluated, so a
/// typo is always reported as such even when other entries are also wrong.
/// A key written with no value (`key:`) counts as absent.
pub fn validate(raw: &Section, rules: &[FieldRule]) -> Result<Validated, ConfigError> {
    check_rules(rules)?;

    if let Some(key) = raw
        .keys()
        .find(|key| !rules.iter().any(|rule| rule.name == key.as_str()))
    {
        return Err(ConfigError::UnknownField { key: key.clone() });
    }

    let mut result = Section::new();
    for rule in rules {
        match raw.get(rule.name).filter(|value| **value != ConfigValue::Null) {
            Some(value) => {
                rule.check(value)?;
                result.insert(rule.name.to_string(), value.clone());
            }
            None if rule.mandatory => {
                return Err(ConfigError::MissingField {
                    key: rule.name.to_string(),
                });
            }
            None => {
                if let Some(default) = rule.default_value()? {
                    tracing::debug!(key = rule.name, value = %default, "Using default value");
                    result.insert(rule.name.to_string(), default);
                }
            }
        }
    }

    Ok(Validated(result))
}

/// A section that passed validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validated(Section);

impl Validated {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(ConfigValue::as_str)
    }

    /// String entry treating an empty value as absent.
    pub fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.str(key).filter(|s| !s.is_empty())
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(ConfigValue::as_bool)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(ConfigValue::as_integer)
    }

    pub fn as_section(&self) -> &Section {
        &self.0
    }

    pub fn into_section(self) -> Section {
        self.0
    }
}
