//! Resolves the volumes a job should back up.
//!
//! Instances are selected first (by id and/or tag), then the volumes attached
//! to each of them (by tag). Results keep the provider's order: instances in
//! enumeration order, then each instance's volumes in enumeration order.

use tracing::{debug, warn};

use crate::config::{EbsSnapshotSettings, InstanceSelector};
use crate::provider::{CloudProvider, VolumeInfo};
use crate::utils::Result;

/// Turn the instance selector into the id filter for instance queries.
/// `local` is resolved through the provider's metadata capability.
pub async fn resolve_instance_filter(
    provider: &dyn CloudProvider,
    selector: &InstanceSelector,
) -> Result<Option<String>> {
    match selector {
        InstanceSelector::Any => Ok(None),
        InstanceSelector::Explicit(id) => Ok(Some(id.clone())),
        InstanceSelector::Local => {
            debug!("Trying to detect the instance ID of the local instance");
            let id = provider.detect_local_instance_id().await?;
            debug!(instance_id = %id, "Detected the instance ID of the local instance");
            Ok(Some(id))
        }
    }
}

/// Find every volume matching the job's instance and volume filters.
/// Finding nothing is not an error.
pub async fn locate_volumes(
    provider: &dyn CloudProvider,
    settings: &EbsSnapshotSettings,
) -> Result<Vec<VolumeInfo>> {
    let instance_id = resolve_instance_filter(provider, &settings.instance).await?;

    debug!(
        instance_id = instance_id.as_deref().unwrap_or(""),
        instance_tag = %settings.instance_tag.as_ref().map(ToString::to_string).unwrap_or_default(),
        "Listing instances"
    );
    let instances = provider
        .find_instances(instance_id.as_deref(), settings.instance_tag.as_ref())
        .await?;
    if instances.is_empty() {
        warn!("Have not found any instance matching the conditions");
    }

    let mut volumes = Vec::new();
    for instance in &instances {
        debug!(
            instance_id = %instance.id,
            instance_name = %instance.name,
            owner_id = %instance.owner,
            "Found instance"
        );
        let attached = provider
            .find_volumes(&instance.id, settings.volume_tag.as_ref())
            .await?;
        for volume in attached {
            debug!(
                volume_id = %volume.id,
                volume_name = %volume.name,
                instance_id = %instance.id,
                "Found volume"
            );
            volumes.push(volume);
        }
    }

    if volumes.is_empty() {
        warn!("Have not found any volume matching the conditions");
    }

    Ok(volumes)
}
