//! Job definition resolver.
//!
//! Turns one raw `jobs.<name>` section into a [`JobDefinition`]. The `module`
//! entry is validated on its own first because it selects the rule table used
//! for the rest of the section. Checks that cannot be written as per-key rules
//! (identifier and tag patterns, positive retention, credential pairing) run
//! after the rule table has been applied.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::rules::{validate, EntryType, FieldRule, Validated};
use super::value::{ConfigValue, Section};
use crate::utils::{ConfigError, SnapError};

static INSTANCE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^i-[0-9a-f]{17}$").expect("valid instance id regex"));
static TAG_FILTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+=[A-Za-z0-9_-]+$").expect("valid tag filter regex")
});
static TAG_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid tag part regex"));

/// Sentinel selecting the instance this program runs on.
pub const LOCAL_INSTANCE: &str = "local";

/// Backup strategy of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    EbsSnapshot,
}

const MODULE_NAMES: &[&str] = &["ebs-snapshot"];

const MODULE_RULE: FieldRule = FieldRule::required("module", EntryType::String).one_of(MODULE_NAMES);

const ENABLED_RULE: FieldRule = FieldRule::optional("enabled", EntryType::Bool, "true");

const EBS_SNAPSHOT_RULES: &[FieldRule] = &[
    MODULE_RULE,
    ENABLED_RULE,
    FieldRule::optional("dryrun", EntryType::Bool, "false"),
    FieldRule::optional("retention", EntryType::Integer, "30"),
    FieldRule::required("aws_region", EntryType::String),
    FieldRule::optional("accesskey_id", EntryType::String, ""),
    FieldRule::optional("accesskey_secret", EntryType::String, ""),
    FieldRule::optional("instance_id", EntryType::String, ""),
    FieldRule::optional("instance_tag", EntryType::Any, ""),
    FieldRule::optional("volume_tag", EntryType::Any, ""),
];

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::EbsSnapshot => "ebs-snapshot",
        }
    }

    /// Rule table applied to a job section of this module.
    pub fn rules(&self) -> &'static [FieldRule] {
        match self {
            ModuleKind::EbsSnapshot => EBS_SNAPSHOT_RULES,
        }
    }

    /// Validate the `module` entry alone and select the module.
    pub fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let value = section
            .get(MODULE_RULE.name)
            .filter(|value| **value != ConfigValue::Null)
            .ok_or_else(|| ConfigError::MissingField {
                key: MODULE_RULE.name.to_string(),
            })?;
        MODULE_RULE.check(value)?;
        match value.as_str() {
            Some("ebs-snapshot") => Ok(ModuleKind::EbsSnapshot),
            _ => Err(ConfigError::InvalidValue {
                key: MODULE_RULE.name.to_string(),
                value: value.to_string(),
                reason: "invalid type of backup module".to_string(),
            }),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which instances a job targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstanceSelector {
    /// No instance filter.
    #[default]
    Any,
    /// The instance this program runs on, detected at initialisation.
    Local,
    Explicit(String),
}

impl InstanceSelector {
    fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        match raw {
            None => Ok(InstanceSelector::Any),
            Some(LOCAL_INSTANCE) => Ok(InstanceSelector::Local),
            Some(id) if INSTANCE_ID_RE.is_match(id) => Ok(InstanceSelector::Explicit(id.to_string())),
            Some(other) => Err(ConfigError::InvalidValue {
                key: "instance_id".to_string(),
                value: other.to_string(),
                reason: "must be either \"local\" or in the \"i-0123456789abcdef0\" format"
                    .to_string(),
            }),
        }
    }
}

/// A single tag key/value pair used to select resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPair {
    pub key: String,
    pub value: String,
}

impl TagPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        TagPair {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Split a `Key=Value` string. Anything that is not exactly one key and
    /// one value yields `None`, which means no filtering.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('=').collect();
        match parts.as_slice() {
            [key, value] => Some(TagPair::new(*key, *value)),
            _ => None,
        }
    }
}

impl fmt::Display for TagPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Tag filter as written in the configuration: either `Key=Value` or a
/// single-entry mapping `{Key: Value}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    Flat(String),
    Structured(BTreeMap<String, String>),
}

impl TagFilter {
    fn from_value(key: &str, value: &ConfigValue) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::String(s) => Ok(TagFilter::Flat(s.clone())),
            ConfigValue::Map(map) => {
                let mut tags = BTreeMap::new();
                for (tag_key, tag_value) in map {
                    match tag_value {
                        ConfigValue::String(_) | ConfigValue::Integer(_) | ConfigValue::Bool(_) => {
                            tags.insert(tag_key.clone(), tag_value.to_string());
                        }
                        other => {
                            return Err(ConfigError::TypeMismatch {
                                key: format!("{}.{}", key, tag_key),
                                value: other.to_string(),
                                found: other.type_name().to_string(),
                                expected: "string".to_string(),
                            })
                        }
                    }
                }
                Ok(TagFilter::Structured(tags))
            }
            other => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                value: other.to_string(),
                found: other.type_name().to_string(),
                expected: "string or map".to_string(),
            }),
        }
    }

    /// Resolve to the canonical pair, or `None` when the filter is empty.
    fn into_pair(self, key: &str) -> Result<Option<TagPair>, ConfigError> {
        let invalid = |value: String, reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
            reason: reason.to_string(),
        };

        match self {
            TagFilter::Flat(raw) if raw.is_empty() => Ok(None),
            TagFilter::Flat(raw) => {
                if !TAG_FILTER_RE.is_match(&raw) {
                    return Err(invalid(raw, "must be in the \"TagName=TagValue\" format"));
                }
                Ok(TagPair::parse(&raw))
            }
            TagFilter::Structured(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((tag_key, tag_value)), None) => {
                        if !TAG_PART_RE.is_match(&tag_key) || !TAG_PART_RE.is_match(&tag_value) {
                            return Err(invalid(
                                format!("{}={}", tag_key, tag_value),
                                "tag name and value may only contain letters, digits, '_' and '-'",
                            ));
                        }
                        Ok(Some(TagPair::new(tag_key, tag_value)))
                    }
                    (None, _) => Err(invalid(String::new(), "tag mapping must have one entry")),
                    (Some(_), Some(_)) => Err(invalid(
                        format!("{} entries", 2 + entries.count()),
                        "tag mapping must have exactly one entry",
                    )),
                }
            }
        }
    }
}

/// Static access key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Settings specific to the `ebs-snapshot` module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbsSnapshotSettings {
    pub region: String,
    pub credentials: Option<Credentials>,
    pub instance: InstanceSelector,
    pub instance_tag: Option<TagPair>,
    pub volume_tag: Option<TagPair>,
}

impl EbsSnapshotSettings {
    fn from_validated(validated: &Validated) -> Result<Self, ConfigError> {
        let region = validated.str("aws_region").unwrap_or_default().to_string();
        if region.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "aws_region".to_string(),
                value: region,
                reason: "must not be empty".to_string(),
            });
        }

        let credentials = match (
            validated.non_empty_str("accesskey_id"),
            validated.non_empty_str("accesskey_secret"),
        ) {
            (Some(id), Some(secret)) => Some(Credentials {
                access_key_id: id.to_string(),
                secret_access_key: secret.to_string(),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    key: "accesskey_secret".to_string(),
                    value: String::new(),
                    reason: "must be set together with \"accesskey_id\"".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    key: "accesskey_id".to_string(),
                    value: String::new(),
                    reason: "must be set together with \"accesskey_secret\"".to_string(),
                })
            }
        };

        let instance = InstanceSelector::parse(validated.non_empty_str("instance_id"))?;
        let instance_tag = tag_pair(validated, "instance_tag")?;
        let volume_tag = tag_pair(validated, "volume_tag")?;

        Ok(EbsSnapshotSettings {
            region,
            credentials,
            instance,
            instance_tag,
            volume_tag,
        })
    }
}

fn tag_pair(validated: &Validated, key: &str) -> Result<Option<TagPair>, ConfigError> {
    match validated.get(key) {
        None | Some(ConfigValue::Null) => Ok(None),
        Some(value) => TagFilter::from_value(key, value)?.into_pair(key),
    }
}

/// Module-specific part of a job definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSettings {
    EbsSnapshot(EbsSnapshotSettings),
}

/// Fully resolved configuration of one backup job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub module: ModuleKind,
    pub enabled: bool,
    pub dry_run: bool,
    /// Whole days a snapshot is kept, always > 0.
    pub retention_days: i64,
    pub settings: ModuleSettings,
}

/// Read only the `enabled` flag of a raw job section, so that a disabled
/// job is skipped even when the rest of its section is incomplete.
pub fn is_job_enabled(name: &str, raw: &ConfigValue) -> Result<bool, SnapError> {
    let value = raw
        .as_map()
        .and_then(|section| section.get(ENABLED_RULE.name))
        .filter(|value| **value != ConfigValue::Null);
    match value {
        None => Ok(true),
        Some(value) => {
            ENABLED_RULE
                .check(value)
                .map_err(|e| SnapError::job(name, e))?;
            Ok(value.as_bool().unwrap_or(true))
        }
    }
}

/// Resolve the raw section of job `name`. Errors carry the job name.
pub fn resolve_job(name: &str, raw: &ConfigValue) -> Result<JobDefinition, SnapError> {
    resolve_section(raw)
        .map(|parts| parts.into_definition(name))
        .map_err(|e| SnapError::job(name, e))
}

struct ResolvedParts {
    module: ModuleKind,
    enabled: bool,
    dry_run: bool,
    retention_days: i64,
    settings: ModuleSettings,
}

impl ResolvedParts {
    fn into_definition(self, name: &str) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            module: self.module,
            enabled: self.enabled,
            dry_run: self.dry_run,
            retention_days: self.retention_days,
            settings: self.settings,
        }
    }
}

fn resolve_section(raw: &ConfigValue) -> Result<ResolvedParts, ConfigError> {
    let section = match raw {
        ConfigValue::Map(section) => section,
        // A job declared with no body
        ConfigValue::Null => {
            return Err(ConfigError::MissingField {
                key: MODULE_RULE.name.to_string(),
            })
        }
        other => {
            return Err(ConfigError::TypeMismatch {
                key: "job".to_string(),
                value: other.to_string(),
                found: other.type_name().to_string(),
                expected: "map".to_string(),
            })
        }
    };

    let module = ModuleKind::from_section(section)?;
    let validated = validate(section, module.rules())?;

    let retention_days = validated.integer("retention").unwrap_or(30);
    if retention_days <= 0 {
        return Err(ConfigError::InvalidValue {
            key: "retention".to_string(),
            value: retention_days.to_string(),
            reason: "must be a valid number greater than 0".to_string(),
        });
    }

    let settings = match module {
        ModuleKind::EbsSnapshot => {
            ModuleSettings::EbsSnapshot(EbsSnapshotSettings::from_validated(&validated)?)
        }
    };

    Ok(ResolvedParts {
        module,
        enabled: validated.bool("enabled").unwrap_or(true),
        dry_run: validated.bool("dryrun").unwrap_or(false),
        retention_days,
        settings,
    })
}
