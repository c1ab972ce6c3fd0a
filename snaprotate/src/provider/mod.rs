//! Cloud provider capabilities consumed by the backup modules.
//!
//! [`CloudProvider`] is the narrow interface the locator and the rotation
//! engine work against. [`aws::Ec2Provider`] talks to EC2; the in-memory
//! [`memory::MemoryProvider`] backs the tests.

pub mod aws;
pub mod memory;
pub mod metadata;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EbsSnapshotSettings, TagPair};
use crate::utils::Result;

/// Value of the `CreatedBy` tag on every snapshot this tool creates.
pub const MANAGED_BY: &str = "snaprotate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub owner: String,
}

/// A volume selected for backup. `name` is empty when the volume has no
/// `Name` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub id: String,
    pub name: String,
}

impl VolumeInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        VolumeInfo {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Prefix used for snapshot names: the display name, or the id.
    pub fn basename(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// A managed snapshot as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub id: String,
    pub volume_id: String,
    pub description: String,
    /// Creation time, epoch seconds.
    pub created_at: i64,
}

/// Tags attached to a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTags {
    pub name: String,
    pub created_by: String,
    /// `YYYYMMDD`
    pub create_date: String,
    /// Epoch seconds as text.
    pub timestamp: String,
}

impl SnapshotTags {
    pub fn as_pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("Name", self.name.as_str()),
            ("CreatedBy", self.created_by.as_str()),
            ("CreateDate", self.create_date.as_str()),
            ("Timestamp", self.timestamp.as_str()),
        ]
    }
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Instances matching an optional id and an optional tag.
    async fn find_instances(
        &self,
        instance_id: Option<&str>,
        tag: Option<&TagPair>,
    ) -> Result<Vec<InstanceInfo>>;

    /// Volumes attached to `instance_id`, optionally filtered by tag.
    async fn find_volumes(&self, instance_id: &str, tag: Option<&TagPair>) -> Result<Vec<VolumeInfo>>;

    /// Snapshots of `volume_id` carrying the [`MANAGED_BY`] marker.
    async fn find_managed_snapshots(&self, volume_id: &str) -> Result<Vec<SnapshotInfo>>;

    /// Create a tagged snapshot and return its id.
    async fn create_snapshot(&self, volume_id: &str, tags: &SnapshotTags) -> Result<String>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    /// Id of the instance this program runs on.
    async fn detect_local_instance_id(&self) -> Result<String>;
}

/// Builds a provider handle from a job's region and credential settings.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, settings: &EbsSnapshotSettings) -> Result<Arc<dyn CloudProvider>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_prefers_name() {
        assert_eq!(VolumeInfo::new("vol-1", "data").basename(), "data");
        assert_eq!(VolumeInfo::new("vol-1", "").basename(), "vol-1");
    }

    #[test]
    fn test_tag_pairs_order() {
        let tags = SnapshotTags {
            name: "data-2024-05-01T00:00:00+00:00".to_string(),
            created_by: MANAGED_BY.to_string(),
            create_date: "20240501".to_string(),
            timestamp: "1714521600".to_string(),
        };
        let keys: Vec<&str> = tags.as_pairs().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["Name", "CreatedBy", "CreateDate", "Timestamp"]);
    }
}
