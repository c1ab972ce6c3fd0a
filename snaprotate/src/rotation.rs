//! Snapshot creation and retention-based pruning.
//!
//! Creation names each snapshot `<basename>-<RFC3339 time>` and tags it as
//! managed by this tool. Pruning lists the managed snapshots of the resolved
//! volumes, collapses them by description, walks them in lexicographic order
//! and deletes those whose age in whole days exceeds the retention period.
//! Both passes stop at the first failed provider call.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use tracing::{debug, info, warn};

use crate::provider::{CloudProvider, SnapshotTags, VolumeInfo, MANAGED_BY};
use crate::utils::Result;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Local wall clock, with the host's UTC offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// An existing managed snapshot considered for pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupItem {
    pub identifier: String,
    pub description: String,
    /// Creation time, epoch seconds.
    pub timestamp: i64,
}

/// Outcome of creating (or, in dry-run mode, planning) one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBackup {
    pub volume_id: String,
    pub snapshot_name: String,
    /// `None` in dry-run mode.
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneAction {
    Keep,
    Delete,
}

impl PruneAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PruneAction::Keep => "keep",
            PruneAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneDecision {
    pub item: BackupItem,
    pub age_days: i64,
    pub action: PruneAction,
}

/// Snapshot name and tags for `volume` at `now`.
pub fn snapshot_tags(volume: &VolumeInfo, now: &DateTime<FixedOffset>) -> SnapshotTags {
    SnapshotTags {
        name: format!(
            "{}-{}",
            volume.basename(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        created_by: MANAGED_BY.to_string(),
        create_date: now.format("%Y%m%d").to_string(),
        timestamp: now.timestamp().to_string(),
    }
}

/// Whole days elapsed since `timestamp`, truncated toward zero.
pub fn age_in_days(now_epoch: i64, timestamp: i64) -> i64 {
    (now_epoch - timestamp) / SECONDS_PER_DAY
}

/// A snapshot is deleted only once its age is strictly greater than the
/// retention period.
pub fn is_expired(age_days: i64, retention_days: i64) -> bool {
    age_days > retention_days
}

/// Create one snapshot per volume, in the given order.
pub async fn create_snapshots(
    provider: &dyn CloudProvider,
    volumes: &[VolumeInfo],
    now: &DateTime<FixedOffset>,
    dry_run: bool,
) -> Result<Vec<CreatedBackup>> {
    let mut created = Vec::with_capacity(volumes.len());

    for volume in volumes {
        debug!(volume_id = %volume.id, volume_name = %volume.name, "Considering backup for volume");
        let tags = snapshot_tags(volume, now);

        let snapshot_id = if dry_run {
            None
        } else {
            Some(provider.create_snapshot(&volume.id, &tags).await?)
        };

        info!(
            volume_id = %volume.id,
            snapshot_name = %tags.name,
            snapshot_id = snapshot_id.as_deref().unwrap_or("-"),
            dry_run,
            "Snapshot of volume"
        );

        created.push(CreatedBackup {
            volume_id: volume.id.clone(),
            snapshot_name: tags.name,
            snapshot_id,
        });
    }

    Ok(created)
}

/// Collapse items sharing a description (the later one wins) and order the
/// survivors by description.
pub fn dedup_sorted(items: impl IntoIterator<Item = BackupItem>) -> Vec<BackupItem> {
    let mut by_description = BTreeMap::new();
    for item in items {
        if let Some(previous) = by_description.insert(item.description.clone(), item) {
            warn!(
                description = %previous.description,
                replaced_id = %previous.identifier,
                "Duplicate snapshot description, keeping the later snapshot"
            );
        }
    }
    by_description.into_values().collect()
}

/// List the managed snapshots of every volume.
pub async fn list_backups(
    provider: &dyn CloudProvider,
    volumes: &[VolumeInfo],
) -> Result<Vec<BackupItem>> {
    let mut items = Vec::new();

    for volume in volumes {
        debug!(volume_id = %volume.id, "Listing snapshots of volume");
        for snapshot in provider.find_managed_snapshots(&volume.id).await? {
            debug!(
                snapshot_id = %snapshot.id,
                description = %snapshot.description,
                created_at = snapshot.created_at,
                volume_id = %snapshot.volume_id,
                "Found snapshot"
            );
            items.push(BackupItem {
                identifier: snapshot.id,
                description: snapshot.description,
                timestamp: snapshot.created_at,
            });
        }
    }

    Ok(dedup_sorted(items))
}

/// Decide keep/delete for every item and delete the expired ones.
pub async fn prune_backups(
    provider: &dyn CloudProvider,
    items: Vec<BackupItem>,
    retention_days: i64,
    now_epoch: i64,
    dry_run: bool,
) -> Result<Vec<PruneDecision>> {
    let mut decisions = Vec::with_capacity(items.len());

    for item in items {
        let age_days = age_in_days(now_epoch, item.timestamp);
        let action = if is_expired(age_days, retention_days) {
            PruneAction::Delete
        } else {
            PruneAction::Keep
        };

        if action == PruneAction::Delete && !dry_run {
            provider.delete_snapshot(&item.identifier).await?;
        }

        info!(
            snapshot_id = %item.identifier,
            description = %item.description,
            age = age_days,
            retention = retention_days,
            action = action.as_str(),
            dry_run,
            "Snapshot retention"
        );

        decisions.push(PruneDecision {
            item,
            age_days,
            action,
        });
    }

    Ok(decisions)
}

/// List and prune the managed snapshots of `volumes`.
pub async fn prune_snapshots(
    provider: &dyn CloudProvider,
    volumes: &[VolumeInfo],
    retention_days: i64,
    now: &DateTime<FixedOffset>,
    dry_run: bool,
) -> Result<Vec<PruneDecision>> {
    let items = list_backups(provider, volumes).await?;
    prune_backups(provider, items, retention_days, now.timestamp(), dry_run).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryProvider;
    use crate::utils::SnapError;

    const NOW: i64 = 1_717_243_200; // 2024-06-01T12:00:00Z

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-06-01T14:00:00+02:00").unwrap()
    }

    fn item(id: &str, description: &str, timestamp: i64) -> BackupItem {
        BackupItem {
            identifier: id.to_string(),
            description: description.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_snapshot_tags() {
        let tags = snapshot_tags(&VolumeInfo::new("vol-1", "data"), &now());
        assert_eq!(tags.name, "data-2024-06-01T14:00:00+02:00");
        assert_eq!(tags.created_by, "snaprotate");
        assert_eq!(tags.create_date, "20240601");
        assert_eq!(tags.timestamp, NOW.to_string());

        let tags = snapshot_tags(&VolumeInfo::new("vol-1", ""), &now());
        assert!(tags.name.starts_with("vol-1-2024-06-01T14:00:00"));
    }

    #[test]
    fn test_utc_snapshot_name_uses_z_suffix() {
        let utc = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap();
        let tags = snapshot_tags(&VolumeInfo::new("vol-1", "data"), &utc);
        assert_eq!(tags.name, "data-2024-06-01T12:00:00Z");
    }

    #[test]
    fn test_age_truncates() {
        assert_eq!(age_in_days(NOW, NOW), 0);
        assert_eq!(age_in_days(NOW, NOW - SECONDS_PER_DAY + 1), 0);
        assert_eq!(age_in_days(NOW, NOW - 2 * SECONDS_PER_DAY - 5), 2);
        // Truncation toward zero: a snapshot slightly in the future is age 0
        assert_eq!(age_in_days(NOW, NOW + 100), 0);
    }

    #[test]
    fn test_retention_boundary() {
        let retention = 5;
        let exact = age_in_days(NOW, NOW - 5 * SECONDS_PER_DAY);
        assert!(!is_expired(exact, retention));
        // One second past the boundary is still five whole days
        let over = age_in_days(NOW, NOW - (5 * SECONDS_PER_DAY + 1));
        assert_eq!(over, 5);
        assert!(!is_expired(over, retention));
        let next_day = age_in_days(NOW, NOW - 6 * SECONDS_PER_DAY);
        assert!(is_expired(next_day, retention));
    }

    #[test]
    fn test_dedup_keeps_later_item() {
        let items = dedup_sorted(vec![
            item("snap-1", "data-a", 10),
            item("snap-2", "data-a", 20),
        ]);
        assert_eq!(items, vec![item("snap-2", "data-a", 20)]);
    }

    #[test]
    fn test_sorted_by_description() {
        let items = dedup_sorted(vec![item("1", "b", 0), item("2", "a", 0), item("3", "c", 0)]);
        let descriptions: Vec<&str> = items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(descriptions, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_create_snapshots() {
        let provider = MemoryProvider::new();
        let volumes = vec![VolumeInfo::new("vol-1", "root"), VolumeInfo::new("vol-2", "")];

        let created = create_snapshots(&provider, &volumes, &now(), false).await.unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|c| c.snapshot_id.is_some()));

        let calls = provider.created();
        assert_eq!(calls[0].volume_id, "vol-1");
        assert_eq!(calls[0].tags.name, "root-2024-06-01T14:00:00+02:00");
        assert_eq!(calls[1].tags.name, "vol-2-2024-06-01T14:00:00+02:00");
    }

    #[tokio::test]
    async fn test_create_dry_run_makes_no_calls() {
        let provider = MemoryProvider::new();
        let volumes = vec![VolumeInfo::new("vol-1", "root")];

        let planned = create_snapshots(&provider, &volumes, &now(), true).await.unwrap();
        let real = create_snapshots(&MemoryProvider::new(), &volumes, &now(), false)
            .await
            .unwrap();

        assert!(provider.created().is_empty());
        assert_eq!(planned[0].snapshot_id, None);
        assert_eq!(planned[0].snapshot_name, real[0].snapshot_name);
        assert_eq!(planned[0].volume_id, real[0].volume_id);
    }

    #[tokio::test]
    async fn test_create_stops_at_first_failure() {
        let provider = MemoryProvider::new().fail_create_for("vol-2");
        let volumes = vec![
            VolumeInfo::new("vol-1", ""),
            VolumeInfo::new("vol-2", ""),
            VolumeInfo::new("vol-3", ""),
        ];

        let result = create_snapshots(&provider, &volumes, &now(), false).await;
        assert!(matches!(result, Err(SnapError::SnapshotCreateFailed { .. })));
        let created: Vec<String> = provider.created().into_iter().map(|c| c.volume_id).collect();
        assert_eq!(created, vec!["vol-1"]);
    }

    #[tokio::test]
    async fn test_prune_deletes_only_expired() {
        let provider = MemoryProvider::new()
            .with_snapshot("vol-1", "snap-new", "data-2", NOW - SECONDS_PER_DAY)
            .with_snapshot("vol-1", "snap-edge", "data-1", NOW - 5 * SECONDS_PER_DAY)
            .with_snapshot("vol-1", "snap-old", "data-0", NOW - 6 * SECONDS_PER_DAY);
        let volumes = vec![VolumeInfo::new("vol-1", "data")];

        let decisions = prune_snapshots(&provider, &volumes, 5, &now(), false)
            .await
            .unwrap();

        let summary: Vec<(&str, PruneAction)> = decisions
            .iter()
            .map(|d| (d.item.identifier.as_str(), d.action))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("snap-old", PruneAction::Delete),
                ("snap-edge", PruneAction::Keep),
                ("snap-new", PruneAction::Keep),
            ]
        );
        assert_eq!(provider.deleted(), vec!["snap-old"]);
    }

    #[tokio::test]
    async fn test_prune_dry_run_reports_same_decisions() {
        let seed = || {
            MemoryProvider::new()
                .with_snapshot("vol-1", "snap-a", "a", NOW - 10 * SECONDS_PER_DAY)
                .with_snapshot("vol-1", "snap-b", "b", NOW)
        };
        let volumes = vec![VolumeInfo::new("vol-1", "")];

        let dry = seed();
        let planned = prune_snapshots(&dry, &volumes, 3, &now(), true).await.unwrap();
        let real = prune_snapshots(&seed(), &volumes, 3, &now(), false).await.unwrap();

        assert_eq!(planned, real);
        assert!(dry.deleted().is_empty());
        assert_eq!(dry.snapshot_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_prune_stops_at_first_failed_delete() {
        let provider = MemoryProvider::new()
            .with_snapshot("vol-1", "snap-a", "a", NOW - 10 * SECONDS_PER_DAY)
            .with_snapshot("vol-1", "snap-b", "b", NOW - 10 * SECONDS_PER_DAY)
            .fail_delete_for("snap-a");
        let volumes = vec![VolumeInfo::new("vol-1", "")];

        let result = prune_snapshots(&provider, &volumes, 3, &now(), false).await;
        assert!(matches!(result, Err(SnapError::SnapshotDeleteFailed { .. })));
        assert!(provider.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_collision_across_volumes_collapses_to_later() {
        let provider = MemoryProvider::new()
            .with_snapshot("vol-1", "snap-1", "shared", NOW - 10 * SECONDS_PER_DAY)
            .with_snapshot("vol-2", "snap-2", "shared", NOW - 10 * SECONDS_PER_DAY);
        let volumes = vec![VolumeInfo::new("vol-1", ""), VolumeInfo::new("vol-2", "")];

        let items = list_backups(&provider, &volumes).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identifier, "snap-2");
    }
}
