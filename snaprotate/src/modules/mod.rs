//! Backup modules.
//!
//! A module implements one backup strategy behind [`BackupModule`]. The
//! orchestrator only sees the trait and asks a [`ModuleFactory`] for the
//! implementation matching a job's [`ModuleKind`].

pub mod ebs_snapshot;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{JobDefinition, ModuleKind};
use crate::provider::ProviderConnector;
use crate::rotation::{BackupItem, Clock, CreatedBackup, PruneDecision};
use crate::utils::Result;

pub use ebs_snapshot::EbsSnapshotModule;

/// Lifecycle of one backup job, called in declaration order.
#[async_trait]
pub trait BackupModule: Send {
    /// Take the module settings from a resolved job definition.
    fn load(&mut self, job: &JobDefinition) -> Result<()>;

    /// Connect to the provider and resolve the resources to back up.
    async fn initialise(&mut self) -> Result<()>;

    async fn create_backup(&mut self) -> Result<Vec<CreatedBackup>>;

    async fn list_backups(&mut self) -> Result<Vec<BackupItem>>;

    /// Delete the listed backups that are past the retention period.
    async fn prune_backups(&mut self, items: Vec<BackupItem>) -> Result<Vec<PruneDecision>>;

    /// Number of resources selected by [`BackupModule::initialise`].
    fn target_count(&self) -> usize;
}

pub trait ModuleFactory: Send + Sync {
    fn create(&self, kind: ModuleKind) -> Box<dyn BackupModule>;
}

/// Builds the modules shipped with this crate.
#[derive(Clone)]
pub struct DefaultModuleFactory {
    connector: Arc<dyn ProviderConnector>,
    clock: Arc<dyn Clock>,
}

impl DefaultModuleFactory {
    pub fn new(connector: Arc<dyn ProviderConnector>, clock: Arc<dyn Clock>) -> Self {
        Self { connector, clock }
    }
}

impl ModuleFactory for DefaultModuleFactory {
    fn create(&self, kind: ModuleKind) -> Box<dyn BackupModule> {
        match kind {
            ModuleKind::EbsSnapshot => Box::new(EbsSnapshotModule::new(
                self.connector.clone(),
                self.clock.clone(),
            )),
        }
    }
}
