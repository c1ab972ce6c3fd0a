//! Loosely-typed configuration values as read from the configuration document.

use std::collections::BTreeMap;
use std::fmt;

use crate::utils::SnapError;

/// One configuration section: key → value, ordered by key.
pub type Section = BTreeMap<String, ConfigValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
    Map(Section),
}

impl ConfigValue {
    /// Primitive type name used in type mismatch reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Section> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert a parsed YAML node. Mapping keys must be scalars.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, SnapError> {
        use serde_yaml::Value;

        Ok(match value {
            Value::Null => ConfigValue::Null,
            Value::Bool(b) => ConfigValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Integer(i),
                None => ConfigValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ConfigValue::String(s),
            Value::Sequence(items) => ConfigValue::List(
                items
                    .into_iter()
                    .map(ConfigValue::from_yaml)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(mapping) => ConfigValue::Map(section_from_mapping(mapping)?),
            Value::Tagged(tagged) => ConfigValue::from_yaml(tagged.value)?,
        })
    }
}

/// Convert a YAML mapping into a section, rendering scalar keys as strings.
pub fn section_from_mapping(mapping: serde_yaml::Mapping) -> Result<Section, SnapError> {
    let mut section = Section::new();
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            other => {
                return Err(SnapError::ConfigLoad(format!(
                    "unsupported mapping key {:?}, keys must be scalars",
                    other
                )))
            }
        };
        section.insert(key, ConfigValue::from_yaml(value)?);
    }
    Ok(section)
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Null => Ok(()),
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Integer(i) => write!(f, "{}", i),
            ConfigValue::Float(x) => write!(f, "{}", x),
            ConfigValue::String(s) => f.write_str(s),
            ConfigValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            ConfigValue::Map(map) => {
                f.write_str("map[")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}:{}", key, value)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Integer(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_scalars_and_maps() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            "module: ebs-snapshot\nenabled: true\nretention: 7\nvolume_tag:\n  Backup: daily\n",
        )
        .unwrap();
        let value = ConfigValue::from_yaml(yaml).unwrap();
        let map = value.as_map().unwrap();

        assert_eq!(map["module"], ConfigValue::from("ebs-snapshot"));
        assert_eq!(map["enabled"], ConfigValue::Bool(true));
        assert_eq!(map["retention"], ConfigValue::Integer(7));
        assert_eq!(map["volume_tag"].type_name(), "map");
    }

    #[test]
    fn test_display_rendering() {
        assert_eq!(ConfigValue::Bool(false).to_string(), "false");
        assert_eq!(ConfigValue::Integer(30).to_string(), "30");
        assert_eq!(ConfigValue::Null.to_string(), "");

        let mut map = Section::new();
        map.insert("Env".to_string(), ConfigValue::from("prod"));
        assert_eq!(ConfigValue::Map(map).to_string(), "map[Env:prod]");
    }

    #[test]
    fn test_numeric_mapping_keys_are_rendered() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("2024: yes-please\n").unwrap();
        let value = ConfigValue::from_yaml(yaml).unwrap();
        assert!(value.as_map().unwrap().contains_key("2024"));
    }
}
