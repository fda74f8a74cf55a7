use super::{net_id, object_ref};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::{ResourceType, tag};
use outpost_core::{Cluster, Reconciler, Role};

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !cluster.needs_reconciliation(Reconciler::Subnet) {
        tracing::debug!("Subnets already reconciled for this generation");
        return Ok(());
    }
    let net_id = net_id(cluster)?;
    let uid = cluster.uid().to_string();
    let tracker = services.tracker(&uid);
    let api = services.cloud.subnet(&services.tenant);

    let mut failure_domains = Vec::new();
    for spec in cluster.subnets()? {
        let name = cluster.subnet_name(&spec);
        let subregion = cluster.subnet_subregion(&spec);
        if cluster.subnet_has_role(&spec, Role::ControlPlane) && !failure_domains.contains(&subregion) {
            failure_domains.push(subregion.clone());
        }

        let target = Target::new(&spec.ip_range)
            .pinned(spec.resource_id.as_deref())
            .probe(Probe::SubnetInNet {
                net_id: &net_id,
                ip_range: &spec.ip_range,
            })
            .probe(Probe::Name(ResourceType::Subnet, &name));
        match tracker.resolve(&mut cluster.status.resources.subnet, &target).await {
            Ok(subnet_id) => {
                tracing::debug!(subnet_id = %subnet_id, ip_range = %spec.ip_range, "Subnet exists");
            }
            Err(e) if e.is_not_found() => {
                if cluster.network().use_existing.net {
                    return Err(ReconcileError::MissingResource(format!(
                        "existing subnet {}",
                        spec.ip_range
                    )));
                }
                let subnet = api
                    .create_subnet(&net_id, &spec.ip_range, &subregion, &uid, &name)
                    .await
                    .context("failed to create subnet")?;
                tracing::info!(subnet_id = %subnet.subnet_id, ip_range = %subnet.ip_range, subregion = %subregion, "Created subnet");
                for role in &spec.roles {
                    let key = format!("{}{}", tag::ROLE_KEY_PREFIX, role);
                    services
                        .cloud
                        .tag(&services.tenant)
                        .add_tag(&subnet.subnet_id, &key, "")
                        .await
                        .context("failed to tag subnet role")?;
                }
                cluster
                    .status
                    .resources
                    .subnet
                    .track(&spec.ip_range, &subnet.subnet_id);
                services.recorder.normal(
                    &object_ref(cluster),
                    "SubnetCreated",
                    &format!("Created subnet {} ({})", subnet.subnet_id, spec.ip_range),
                );
            }
            Err(e) => return Err(e),
        }
    }

    cluster.status.failure_domains = failure_domains;
    cluster.mark_reconciled(Reconciler::Subnet);
    Ok(())
}

pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if cluster.network().use_existing.net {
        return Ok(());
    }
    let api = services.cloud.subnet(&services.tenant);
    for key in cluster.status.resources.subnet.keys() {
        let Some(subnet_id) = cluster.status.resources.subnet.get(&key).map(str::to_string) else {
            cluster.status.resources.subnet.untrack(&key);
            continue;
        };
        tolerate_gone(api.delete_subnet(&subnet_id).await).context("failed to delete subnet")?;
        tracing::info!(subnet_id = %subnet_id, ip_range = %key, "Deleted subnet");
        cluster.status.resources.subnet.untrack(&key);
    }
    services
        .recorder
        .normal(&object_ref(cluster), "SubnetsDeleted", "Deleted subnets");
    Ok(())
}
