//! Machine volumes
//!
//! Volumes are created before the VM, keyed by their spec name in the
//! machine status, and linked under their device name once the VM runs.
//! On deletion they are unlinked and deleted before the VM goes.

use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::machine::object_ref;
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::{CloudError, ResourceType, Tag, VolumeRequest};
use outpost_core::{Cluster, CoreError, Machine, VolumeSpec};

fn check(spec: &VolumeSpec) -> Result<()> {
    if spec.name.is_empty() || spec.device_name.is_empty() {
        return Err(CoreError::InvalidSpec("volume needs a name and a device name".to_string()).into());
    }
    if spec.size == 0 {
        return Err(CoreError::InvalidSpec(format!("volume {} has no size", spec.name)).into());
    }
    if spec.iops.is_some() && spec.volume_type != "io1" {
        return Err(CoreError::InvalidSpec(format!(
            "volume {}: iops only apply to io1 volumes",
            spec.name
        ))
        .into());
    }
    Ok(())
}

/// Find or create every volume of the machine
pub(crate) async fn reconcile(
    services: &Services,
    cluster: &Cluster,
    machine: &mut Machine,
    subregion: &str,
) -> Result<()> {
    let api = services.cloud.volume(&services.tenant);
    for spec in machine.spec.vm.volumes.clone() {
        check(&spec)?;
        let name = machine.volume_name(&spec);
        let target = Target::new(&spec.name)
            .pinned(spec.resource_id.as_deref())
            .probe(Probe::Name(ResourceType::Volume, &name));
        match services
            .tracker(cluster.uid())
            .resolve(&mut machine.status.resources.volume, &target)
            .await
        {
            Ok(id) => {
                api.get_volume(&id)
                    .await
                    .context("failed to read volume")?
                    .ok_or_else(|| ReconcileError::MissingResource(format!("volume {}", id)))?;
                tracing::debug!(volume = %spec.name, volume_id = %id, "Volume exists");
                machine.status.resources.volume.replace(&spec.name, &id);
            }
            Err(e) if e.is_not_found() => {
                let subregion = if spec.subregion_name.is_empty() {
                    subregion
                } else {
                    spec.subregion_name.as_str()
                };
                let request = VolumeRequest {
                    name: name.clone(),
                    size: spec.size,
                    volume_type: spec.volume_type.clone(),
                    iops: spec.iops,
                    subregion_name: subregion.to_string(),
                    tags: vec![Tag::owner(cluster.uid())],
                };
                let volume = api
                    .create_volume(&request)
                    .await
                    .context("failed to create volume")?;
                tracing::info!(volume = %spec.name, volume_id = %volume.volume_id, "Created volume");
                machine
                    .status
                    .resources
                    .volume
                    .track(&spec.name, &volume.volume_id);
                services.recorder.normal(
                    &object_ref(machine),
                    "VolumeCreated",
                    &format!("Created volume {}", volume.volume_id),
                );
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Link every tracked volume to `vm_id` under its device name
pub(crate) async fn link(services: &Services, machine: &Machine, vm_id: &str) -> Result<()> {
    let api = services.cloud.volume(&services.tenant);
    for spec in &machine.spec.vm.volumes {
        let Some(id) = machine.status.resources.volume.get(&spec.name) else {
            continue;
        };
        let volume = api
            .get_volume(id)
            .await
            .context("failed to read volume")?
            .ok_or_else(|| ReconcileError::MissingResource(format!("volume {}", id)))?;
        match volume.linked_vm_id.as_deref() {
            Some(linked) if linked == vm_id => {
                tracing::debug!(volume_id = %id, vm_id, "Volume already linked");
            }
            Some(linked) => {
                return Err(ReconcileError::from(CloudError::Conflict(format!(
                    "volume {} is linked to vm {}",
                    id, linked
                )))
                .context("failed to link volume"));
            }
            None => {
                api.link_volume(id, vm_id, &spec.device_name)
                    .await
                    .context("failed to link volume")?;
                tracing::info!(volume_id = %id, vm_id, device = %spec.device_name, "Linked volume");
            }
        }
    }
    Ok(())
}

/// Unlink and delete every tracked volume
pub(crate) async fn delete(services: &Services, machine: &mut Machine) -> Result<()> {
    let api = services.cloud.volume(&services.tenant);
    for key in machine.status.resources.volume.keys() {
        let Some(id) = machine.status.resources.volume.get(&key).map(str::to_string) else {
            continue;
        };
        match api.get_volume(&id).await.context("failed to read volume")? {
            Some(volume) => {
                if volume.linked_vm_id.is_some() {
                    tolerate_gone(api.unlink_volume(&id).await).context("failed to unlink volume")?;
                    tracing::info!(volume_id = %id, "Unlinked volume");
                }
                tolerate_gone(api.delete_volume(&id).await).context("failed to delete volume")?;
                tracing::info!(volume_id = %id, "Deleted volume");
                services.recorder.normal(
                    &object_ref(machine),
                    "VolumeDeleted",
                    &format!("Deleted volume {}", id),
                );
            }
            None => tracing::debug!(volume_id = %id, "Volume already gone"),
        }
        machine.status.resources.volume.untrack(&key);
    }
    Ok(())
}
