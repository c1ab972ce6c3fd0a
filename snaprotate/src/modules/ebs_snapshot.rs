//! `ebs-snapshot` module: snapshots the EBS volumes attached to selected
//! instances and rotates them by age.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tracing::debug;

use super::BackupModule;
use crate::config::{EbsSnapshotSettings, JobDefinition, ModuleSettings};
use crate::locator::locate_volumes;
use crate::provider::{CloudProvider, ProviderConnector, VolumeInfo};
use crate::rotation::{self, BackupItem, Clock, CreatedBackup, PruneDecision};
use crate::utils::{Result, SnapError};

struct Loaded {
    settings: EbsSnapshotSettings,
    dry_run: bool,
    retention_days: i64,
}

struct Ready {
    provider: Arc<dyn CloudProvider>,
    volumes: Vec<VolumeInfo>,
    /// Instant used for every time computation of this run.
    now: DateTime<FixedOffset>,
}

pub struct EbsSnapshotModule {
    connector: Arc<dyn ProviderConnector>,
    clock: Arc<dyn Clock>,
    loaded: Option<Loaded>,
    ready: Option<Ready>,
}

impl EbsSnapshotModule {
    pub fn new(connector: Arc<dyn ProviderConnector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            connector,
            clock,
            loaded: None,
            ready: None,
        }
    }

    fn loaded(&self) -> Result<&Loaded> {
        self.loaded
            .as_ref()
            .ok_or_else(|| SnapError::Module("ebs-snapshot module used before load()".to_string()))
    }

    fn ready(&self) -> Result<(&Loaded, &Ready)> {
        let loaded = self.loaded()?;
        let ready = self.ready.as_ref().ok_or_else(|| {
            SnapError::Module("ebs-snapshot module used before initialise()".to_string())
        })?;
        Ok((loaded, ready))
    }

    /// Volumes resolved by `initialise`.
    pub fn volumes(&self) -> &[VolumeInfo] {
        match &self.ready {
            Some(ready) => &ready.volumes,
            None => &[],
        }
    }
}

#[async_trait]
impl BackupModule for EbsSnapshotModule {
    fn load(&mut self, job: &JobDefinition) -> Result<()> {
        let ModuleSettings::EbsSnapshot(settings) = &job.settings;
        debug!(job = %job.name, settings = ?settings, "Loaded job configuration");
        self.loaded = Some(Loaded {
            settings: settings.clone(),
            dry_run: job.dry_run,
            retention_days: job.retention_days,
        });
        self.ready = None;
        Ok(())
    }

    async fn initialise(&mut self) -> Result<()> {
        let loaded = self.loaded()?;
        let provider = self.connector.connect(&loaded.settings).await?;
        let volumes = locate_volumes(provider.as_ref(), &loaded.settings).await?;
        self.ready = Some(Ready {
            provider,
            volumes,
            now: self.clock.now(),
        });
        Ok(())
    }

    async fn create_backup(&mut self) -> Result<Vec<CreatedBackup>> {
        let (loaded, ready) = self.ready()?;
        rotation::create_snapshots(
            ready.provider.as_ref(),
            &ready.volumes,
            &ready.now,
            loaded.dry_run,
        )
        .await
    }

    async fn list_backups(&mut self) -> Result<Vec<BackupItem>> {
        let (_, ready) = self.ready()?;
        rotation::list_backups(ready.provider.as_ref(), &ready.volumes).await
    }

    async fn prune_backups(&mut self, items: Vec<BackupItem>) -> Result<Vec<PruneDecision>> {
        let (loaded, ready) = self.ready()?;
        rotation::prune_backups(
            ready.provider.as_ref(),
            items,
            loaded.retention_days,
            ready.now.timestamp(),
            loaded.dry_run,
        )
        .await
    }

    fn target_count(&self) -> usize {
        self.volumes().len()
    }
}
