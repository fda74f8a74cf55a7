use super::object_ref;
use crate::error::{Result, ResultExt};
use crate::services::Services;
use outpost_core::Cluster;

/// Release every address the cluster allocated
///
/// Runs after the NAT services and the bastion are gone so no address is
/// still attached.
pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    let keys = cluster.status.resources.public_ip.keys();
    if keys.is_empty() {
        return Ok(());
    }
    let uid = cluster.uid().to_string();
    let allocator = services.allocator(&uid);
    for key in &keys {
        allocator
            .deallocate(&mut cluster.status.resources.public_ip, key)
            .await
            .context("failed to release public ip")?;
    }
    services.recorder.normal(
        &object_ref(cluster),
        "PublicIpsReleased",
        &format!("Released {} public ips", keys.len()),
    );
    Ok(())
}
