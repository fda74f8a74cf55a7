use super::{net_id, object_ref, subnet_id};
use crate::error::{Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::tag;
use outpost_core::{Cluster, Reconciler, Role};

/// Route tables serving the node subnets
async fn node_route_tables(services: &Services, cluster: &Cluster, net_id: &str) -> Result<Vec<String>> {
    let mut subnet_ids = Vec::new();
    for spec in cluster.subnets()? {
        if cluster.subnet_has_role(&spec, Role::Worker) || cluster.subnet_has_role(&spec, Role::ControlPlane) {
            subnet_ids.push(subnet_id(cluster, &spec)?);
        }
    }
    let tables = services
        .cloud
        .route_table(&services.tenant)
        .get_route_tables_from_net(net_id)
        .await
        .context("failed to list route tables")?;
    Ok(tables
        .into_iter()
        .filter(|t| subnet_ids.iter().any(|id| t.is_linked_to(id)))
        .map(|t| t.route_table_id)
        .collect())
}

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    let wanted = cluster.network().net_access_points.clone();
    if wanted.is_empty() {
        return Ok(());
    }
    if !cluster.needs_reconciliation(Reconciler::NetAccessPoint) {
        tracing::debug!("Net access points already reconciled for this generation");
        return Ok(());
    }
    let net_id = net_id(cluster)?;
    let uid = cluster.uid().to_string();
    let tracker = services.tracker(&uid);
    let api = services.cloud.net_access_point(&services.tenant);
    let route_table_ids = node_route_tables(services, cluster, &net_id).await?;

    for service in &wanted {
        let target = Target::new(service).probe(Probe::NetAccessPoint {
            net_id: &net_id,
            service: service.as_str(),
        });
        match tracker
            .resolve(&mut cluster.status.resources.net_access_point, &target)
            .await
        {
            Ok(id) => tracing::debug!(net_access_point_id = %id, service = %service, "Net access point exists"),
            Err(e) if e.is_not_found() => {
                let nap = api
                    .create_net_access_point(&net_id, services.region(), service, &route_table_ids, &uid)
                    .await
                    .context("failed to create net access point")?;
                tracing::info!(
                    net_access_point_id = %nap.net_access_point_id,
                    service_name = %nap.service_name,
                    "Created net access point"
                );
                cluster
                    .status
                    .resources
                    .net_access_point
                    .track(service, &nap.net_access_point_id);
                services.recorder.normal(
                    &object_ref(cluster),
                    "NetAccessPointCreated",
                    &format!("Created net access point {}", nap.service_name),
                );
            }
            Err(e) => return Err(e),
        }
    }

    cluster.mark_reconciled(Reconciler::NetAccessPoint);
    Ok(())
}

/// Delete tracked access points and any left in the net with the owner tag
pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if cluster.network().net_access_points.is_empty() && cluster.status.resources.net_access_point.is_empty() {
        return Ok(());
    }
    let Ok(net_id) = net_id(cluster) else {
        return Ok(());
    };
    let api = services.cloud.net_access_point(&services.tenant);
    let owner_key = tag::owner_key(cluster.uid());
    let tracked: Vec<String> = cluster
        .status
        .resources
        .net_access_point
        .iter()
        .map(|(_, id)| id.to_string())
        .collect();

    let listed = api
        .list_net_access_points(&net_id)
        .await
        .context("failed to list net access points")?;
    for nap in listed.iter().filter(|n| {
        tracked.contains(&n.net_access_point_id) || tag::tag_value(&owner_key, &n.tags).is_some()
    }) {
        tolerate_gone(api.delete_net_access_point(&nap.net_access_point_id).await)
            .context("failed to delete net access point")?;
        tracing::info!(net_access_point_id = %nap.net_access_point_id, "Deleted net access point");
    }
    for key in cluster.status.resources.net_access_point.keys() {
        cluster.status.resources.net_access_point.untrack(&key);
    }
    Ok(())
}
