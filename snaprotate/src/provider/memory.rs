//! In-memory provider used by tests and for exercising job configurations
//! without touching a real account.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    CloudProvider, InstanceInfo, ProviderConnector, SnapshotInfo, SnapshotTags, VolumeInfo,
};
use crate::config::{EbsSnapshotSettings, TagPair};
use crate::utils::{Result, SnapError};

type Tags = BTreeMap<String, String>;

fn tags_from(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn matches(tags: &Tags, filter: Option<&TagPair>) -> bool {
    filter.map_or(true, |tag| tags.get(&tag.key) == Some(&tag.value))
}

struct Instance {
    id: String,
    owner: String,
    tags: Tags,
}

struct Volume {
    id: String,
    instance_id: String,
    tags: Tags,
}

/// A `create_snapshot` call observed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSnapshot {
    pub snapshot_id: String,
    pub volume_id: String,
    pub tags: SnapshotTags,
}

/// Arguments of a `find_instances` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceQuery {
    pub instance_id: Option<String>,
    pub tag: Option<TagPair>,
}

#[derive(Default)]
struct State {
    instances: Vec<Instance>,
    volumes: Vec<Volume>,
    snapshots: Vec<SnapshotInfo>,
    local_instance: Option<String>,
    next_id: u64,
    created: Vec<CreatedSnapshot>,
    deleted: Vec<String>,
    instance_queries: Vec<InstanceQuery>,
    fail_create: HashSet<String>,
    fail_delete: HashSet<String>,
    fail_queries: bool,
}

/// Instances, volumes and managed snapshots held in memory. Mutating calls
/// are recorded so tests can assert on them.
#[derive(Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_instance(self, id: &str, tags: &[(&str, &str)]) -> Self {
        self.state().instances.push(Instance {
            id: id.to_string(),
            owner: "123456789012".to_string(),
            tags: tags_from(tags),
        });
        self
    }

    pub fn with_volume(self, instance_id: &str, volume_id: &str, tags: &[(&str, &str)]) -> Self {
        self.state().volumes.push(Volume {
            id: volume_id.to_string(),
            instance_id: instance_id.to_string(),
            tags: tags_from(tags),
        });
        self
    }

    /// Add a managed snapshot.
    pub fn with_snapshot(self, volume_id: &str, snapshot_id: &str, description: &str, created_at: i64) -> Self {
        self.state().snapshots.push(SnapshotInfo {
            id: snapshot_id.to_string(),
            volume_id: volume_id.to_string(),
            description: description.to_string(),
            created_at,
        });
        self
    }

    pub fn with_local_instance(self, id: &str) -> Self {
        self.state().local_instance = Some(id.to_string());
        self
    }

    /// Make `create_snapshot` fail for this volume.
    pub fn fail_create_for(self, volume_id: &str) -> Self {
        self.state().fail_create.insert(volume_id.to_string());
        self
    }

    /// Make `delete_snapshot` fail for this snapshot.
    pub fn fail_delete_for(self, snapshot_id: &str) -> Self {
        self.state().fail_delete.insert(snapshot_id.to_string());
        self
    }

    /// Make every enumeration call fail.
    pub fn fail_queries(self) -> Self {
        self.state().fail_queries = true;
        self
    }

    pub fn created(&self) -> Vec<CreatedSnapshot> {
        self.state().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn instance_queries(&self) -> Vec<InstanceQuery> {
        self.state().instance_queries.clone()
    }

    /// Ids of the managed snapshots currently stored.
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.state().snapshots.iter().map(|s| s.id.clone()).collect()
    }

    fn check_queries(&self, call: &str) -> Result<()> {
        if self.state().fail_queries {
            return Err(SnapError::ResourceQueryFailed(format!("{} has failed: injected failure", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    async fn find_instances(
        &self,
        instance_id: Option<&str>,
        tag: Option<&TagPair>,
    ) -> Result<Vec<InstanceInfo>> {
        self.check_queries("DescribeInstances()")?;
        let mut state = self.state();
        state.instance_queries.push(InstanceQuery {
            instance_id: instance_id.map(str::to_string),
            tag: tag.cloned(),
        });

        Ok(state
            .instances
            .iter()
            .filter(|i| instance_id.map_or(true, |id| i.id == id))
            .filter(|i| matches(&i.tags, tag))
            .map(|i| InstanceInfo {
                id: i.id.clone(),
                name: i.tags.get("Name").cloned().unwrap_or_default(),
                owner: i.owner.clone(),
            })
            .collect())
    }

    async fn find_volumes(&self, instance_id: &str, tag: Option<&TagPair>) -> Result<Vec<VolumeInfo>> {
        self.check_queries("DescribeVolumes()")?;
        Ok(self
            .state()
            .volumes
            .iter()
            .filter(|v| v.instance_id == instance_id && matches(&v.tags, tag))
            .map(|v| VolumeInfo {
                id: v.id.clone(),
                name: v.tags.get("Name").cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn find_managed_snapshots(&self, volume_id: &str) -> Result<Vec<SnapshotInfo>> {
        self.check_queries("DescribeSnapshots()")?;
        Ok(self
            .state()
            .snapshots
            .iter()
            .filter(|s| s.volume_id == volume_id)
            .cloned()
            .collect())
    }

    async fn create_snapshot(&self, volume_id: &str, tags: &SnapshotTags) -> Result<String> {
        let mut state = self.state();
        if state.fail_create.contains(volume_id) {
            return Err(SnapError::SnapshotCreateFailed {
                volume_id: volume_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        state.next_id += 1;
        let snapshot_id = format!("snap-{:017x}", state.next_id);
        state.snapshots.push(SnapshotInfo {
            id: snapshot_id.clone(),
            volume_id: volume_id.to_string(),
            description: tags.name.clone(),
            created_at: tags.timestamp.parse().unwrap_or_default(),
        });
        state.created.push(CreatedSnapshot {
            snapshot_id: snapshot_id.clone(),
            volume_id: volume_id.to_string(),
            tags: tags.clone(),
        });
        Ok(snapshot_id)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_delete.contains(snapshot_id) {
            return Err(SnapError::SnapshotDeleteFailed {
                snapshot_id: snapshot_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let before = state.snapshots.len();
        state.snapshots.retain(|s| s.id != snapshot_id);
        if state.snapshots.len() == before {
            return Err(SnapError::SnapshotDeleteFailed {
                snapshot_id: snapshot_id.to_string(),
                reason: "snapshot does not exist".to_string(),
            });
        }
        state.deleted.push(snapshot_id.to_string());
        Ok(())
    }

    async fn detect_local_instance_id(&self) -> Result<String> {
        self.state().local_instance.clone().ok_or_else(|| {
            SnapError::ResourceQueryFailed("unable to determine the EC2 instance ID: not running on an instance".to_string())
        })
    }
}

/// Hands out the same [`MemoryProvider`] to every job.
#[derive(Clone)]
pub struct MemoryConnector {
    provider: Arc<MemoryProvider>,
}

impl MemoryConnector {
    pub fn new(provider: Arc<MemoryProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ProviderConnector for MemoryConnector {
    async fn connect(&self, _settings: &EbsSnapshotSettings) -> Result<Arc<dyn CloudProvider>> {
        Ok(self.provider.clone())
    }
}
