//! EC2 implementation of [`CloudProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use rusoto_core::credential::{DefaultCredentialsProvider, StaticProvider};
use rusoto_core::{HttpClient, Region};
use rusoto_ec2::{
    CreateSnapshotRequest, DeleteSnapshotRequest, DescribeInstancesRequest,
    DescribeSnapshotsRequest, DescribeVolumesRequest, Ec2, Ec2Client, Filter, Tag,
    TagSpecification,
};

use super::metadata::InstanceMetadata;
use super::{
    CloudProvider, InstanceInfo, ProviderConnector, SnapshotInfo, SnapshotTags, VolumeInfo,
    MANAGED_BY,
};
use crate::config::{EbsSnapshotSettings, TagPair};
use crate::utils::{Result, SnapError};

fn filter(name: &str, value: &str) -> Filter {
    Filter {
        name: Some(name.to_string()),
        values: Some(vec![value.to_string()]),
    }
}

fn tag_filter(tag: &TagPair) -> Filter {
    filter(&format!("tag:{}", tag.key), &tag.value)
}

fn name_tag(tags: Option<&Vec<Tag>>) -> String {
    tags.into_iter()
        .flatten()
        .find(|tag| tag.key.as_deref() == Some("Name"))
        .and_then(|tag| tag.value.clone())
        .unwrap_or_default()
}

/// Token for the next page, if any.
fn next_page(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

pub struct Ec2Provider {
    client: Ec2Client,
    metadata: InstanceMetadata,
}

impl Ec2Provider {
    /// Build a client for the job's region, using the static key pair when
    /// one is configured and the default credential chain otherwise.
    pub fn new(settings: &EbsSnapshotSettings) -> Result<Self> {
        let region: Region = settings.region.parse().map_err(|e| {
            SnapError::ProviderInit(format!("invalid AWS region \"{}\": {}", settings.region, e))
        })?;
        let dispatcher = HttpClient::new()
            .map_err(|e| SnapError::ProviderInit(format!("failed to create HTTP client: {}", e)))?;

        let client = match &settings.credentials {
            Some(creds) => {
                let provider = StaticProvider::new_minimal(
                    creds.access_key_id.clone(),
                    creds.secret_access_key.clone(),
                );
                Ec2Client::new_with(dispatcher, provider, region)
            }
            None => {
                let provider = DefaultCredentialsProvider::new().map_err(|e| {
                    SnapError::ProviderInit(format!(
                        "failed to load the aws configuration without an explicit access key pair: {}",
                        e
                    ))
                })?;
                Ec2Client::new_with(dispatcher, provider, region)
            }
        };

        Ok(Self {
            client,
            metadata: InstanceMetadata::new()?,
        })
    }
}

#[async_trait]
impl CloudProvider for Ec2Provider {
    async fn find_instances(
        &self,
        instance_id: Option<&str>,
        tag: Option<&TagPair>,
    ) -> Result<Vec<InstanceInfo>> {
        let mut filters = Vec::new();
        if let Some(id) = instance_id {
            filters.push(filter("instance-id", id));
        }
        if let Some(tag) = tag {
            filters.push(tag_filter(tag));
        }

        let mut request = DescribeInstancesRequest {
            filters: Some(filters),
            ..Default::default()
        };
        let mut results = Vec::new();
        loop {
            let response = self
                .client
                .describe_instances(request.clone())
                .await
                .map_err(|e| SnapError::ResourceQueryFailed(format!("DescribeInstances() has failed: {}", e)))?;

            for reservation in response.reservations.unwrap_or_default() {
                let owner = reservation.owner_id.unwrap_or_default();
                for instance in reservation.instances.unwrap_or_default() {
                    let Some(id) = instance.instance_id else {
                        continue;
                    };
                    results.push(InstanceInfo {
                        id,
                        name: name_tag(instance.tags.as_ref()),
                        owner: owner.clone(),
                    });
                }
            }

            match next_page(response.next_token) {
                Some(token) => request.next_token = Some(token),
                None => break,
            }
        }

        Ok(results)
    }

    async fn find_volumes(&self, instance_id: &str, tag: Option<&TagPair>) -> Result<Vec<VolumeInfo>> {
        let mut filters = vec![
            filter("attachment.instance-id", instance_id),
            filter("attachment.status", "attached"),
        ];
        if let Some(tag) = tag {
            filters.push(tag_filter(tag));
        }

        let mut request = DescribeVolumesRequest {
            filters: Some(filters),
            ..Default::default()
        };
        let mut results = Vec::new();
        loop {
            let response = self
                .client
                .describe_volumes(request.clone())
                .await
                .map_err(|e| SnapError::ResourceQueryFailed(format!("DescribeVolumes() has failed: {}", e)))?;

            for volume in response.volumes.unwrap_or_default() {
                let Some(id) = volume.volume_id else {
                    continue;
                };
                results.push(VolumeInfo {
                    id,
                    name: name_tag(volume.tags.as_ref()),
                });
            }

            match next_page(response.next_token) {
                Some(token) => request.next_token = Some(token),
                None => break,
            }
        }

        Ok(results)
    }

    async fn find_managed_snapshots(&self, volume_id: &str) -> Result<Vec<SnapshotInfo>> {
        let mut request = DescribeSnapshotsRequest {
            filters: Some(vec![
                filter("tag:CreatedBy", MANAGED_BY),
                filter("volume-id", volume_id),
            ]),
            owner_ids: Some(vec!["self".to_string()]),
            ..Default::default()
        };
        let mut results = Vec::new();
        loop {
            let response = self
                .client
                .describe_snapshots(request.clone())
                .await
                .map_err(|e| SnapError::ResourceQueryFailed(format!("DescribeSnapshots() has failed: {}", e)))?;

            for snapshot in response.snapshots.unwrap_or_default() {
                let Some(id) = snapshot.snapshot_id else {
                    continue;
                };
                let start_time = snapshot.start_time.unwrap_or_default();
                let created_at = DateTime::parse_from_rfc3339(&start_time)
                    .map_err(|e| {
                        SnapError::ResourceQueryFailed(format!(
                            "snapshot {} has an invalid start time \"{}\": {}",
                            id, start_time, e
                        ))
                    })?
                    .timestamp();
                results.push(SnapshotInfo {
                    id,
                    volume_id: snapshot.volume_id.unwrap_or_else(|| volume_id.to_string()),
                    description: snapshot.description.unwrap_or_default(),
                    created_at,
                });
            }

            match next_page(response.next_token) {
                Some(token) => request.next_token = Some(token),
                None => break,
            }
        }

        Ok(results)
    }

    async fn create_snapshot(&self, volume_id: &str, tags: &SnapshotTags) -> Result<String> {
        let request = CreateSnapshotRequest {
            volume_id: volume_id.to_string(),
            description: Some(tags.name.clone()),
            tag_specifications: Some(vec![TagSpecification {
                resource_type: Some("snapshot".to_string()),
                tags: Some(
                    tags.as_pairs()
                        .iter()
                        .map(|(key, value)| Tag {
                            key: Some(key.to_string()),
                            value: Some(value.to_string()),
                        })
                        .collect(),
                ),
            }]),
            ..Default::default()
        };

        let snapshot = self.client.create_snapshot(request).await.map_err(|e| {
            SnapError::SnapshotCreateFailed {
                volume_id: volume_id.to_string(),
                reason: format!("CreateSnapshot() has failed: {}", e),
            }
        })?;
        snapshot.snapshot_id.ok_or_else(|| SnapError::SnapshotCreateFailed {
            volume_id: volume_id.to_string(),
            reason: "CreateSnapshot() returned no snapshot id".to_string(),
        })
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let request = DeleteSnapshotRequest {
            snapshot_id: snapshot_id.to_string(),
            ..Default::default()
        };
        self.client
            .delete_snapshot(request)
            .await
            .map_err(|e| SnapError::SnapshotDeleteFailed {
                snapshot_id: snapshot_id.to_string(),
                reason: format!("DeleteSnapshot() has failed: {}", e),
            })
    }

    async fn detect_local_instance_id(&self) -> Result<String> {
        self.metadata.instance_id().await
    }
}

/// Connects jobs to EC2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ec2Connector;

#[async_trait]
impl ProviderConnector for Ec2Connector {
    async fn connect(&self, settings: &EbsSnapshotSettings) -> Result<Arc<dyn CloudProvider>> {
        let provider = Ec2Provider::new(settings)?;
        Ok(Arc::new(provider))
    }
}
