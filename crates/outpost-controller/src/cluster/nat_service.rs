use super::{net_id, object_ref, subnet_id};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::ResourceType;
use outpost_core::{Cluster, NatServiceSpec, Reconciler};
use std::collections::BTreeSet;

/// Provider id of a NAT service, pinned or tracked by its client token
pub(crate) fn nat_service_id(cluster: &Cluster, nat: &NatServiceSpec) -> Result<String> {
    if let Some(id) = nat.resource_id.as_deref().filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }
    let token = cluster.nat_service_client_token(nat);
    cluster
        .status
        .resources
        .nat_service
        .get(&token)
        .map(str::to_string)
        .ok_or_else(|| ReconcileError::MissingResource(format!("nat service {}", token)))
}

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !cluster.needs_reconciliation(Reconciler::NatService) {
        tracing::debug!("Nat services already reconciled for this generation");
        return Ok(());
    }
    let uid = cluster.uid().to_string();
    let tracker = services.tracker(&uid);
    let allocator = services.allocator(&uid);
    let api = services.cloud.nat_service(&services.tenant);

    for nat in cluster.nat_services()? {
        let token = cluster.nat_service_client_token(&nat);
        let name = cluster.nat_service_name(&nat);
        let target = Target::new(&token)
            .pinned(nat.resource_id.as_deref())
            .probe(Probe::NatToken(&token))
            .probe(Probe::Name(ResourceType::NatService, &name));
        match tracker
            .resolve(&mut cluster.status.resources.nat_service, &target)
            .await
        {
            Ok(nat_service_id) => {
                tracing::debug!(nat_service_id = %nat_service_id, client_token = %token, "Nat service exists");
            }
            Err(e) if e.is_not_found() => {
                let subnet = cluster.nat_service_subnet(&nat)?;
                let subnet_id = subnet_id(cluster, &subnet)?;
                let ip = allocator
                    .allocate(&mut cluster.status.resources.public_ip, &token, &name, None)
                    .await
                    .context("failed to allocate nat public ip")?;
                let created = api
                    .create_nat_service(&ip.public_ip_id, &subnet_id, &token, &uid, &name)
                    .await
                    .context("failed to create nat service")?;
                tracing::info!(
                    nat_service_id = %created.nat_service_id,
                    subnet_id = %subnet_id,
                    public_ip = %ip.public_ip,
                    "Created nat service"
                );
                cluster
                    .status
                    .resources
                    .nat_service
                    .track(&token, &created.nat_service_id);
                services.recorder.normal(
                    &object_ref(cluster),
                    "NatServiceCreated",
                    &format!("Created nat service {}", created.nat_service_id),
                );
            }
            Err(e) => return Err(e),
        }
    }

    cluster.mark_reconciled(Reconciler::NatService);
    Ok(())
}

/// Public addresses of the tracked NAT services, as `/32` ranges
pub(crate) async fn public_ranges(services: &Services, cluster: &Cluster) -> Result<Vec<String>> {
    let api = services.cloud.nat_service(&services.tenant);
    let mut ranges = Vec::new();
    for (_, id) in cluster.status.resources.nat_service.iter() {
        let Some(nat) = api
            .get_nat_service(id)
            .await
            .context("failed to read nat service")?
        else {
            continue;
        };
        for ip in nat.public_ips {
            let range = format!("{}/32", ip.public_ip);
            if !ranges.contains(&range) {
                ranges.push(range);
            }
        }
    }
    Ok(ranges)
}

pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    let api = services.cloud.nat_service(&services.tenant);
    let mut ids: BTreeSet<String> = cluster
        .status
        .resources
        .nat_service
        .iter()
        .map(|(_, id)| id.to_string())
        .collect();
    if !cluster.network().use_existing.net {
        if let Ok(net_id) = net_id(cluster) {
            let listed = api
                .list_nat_services(&net_id)
                .await
                .context("failed to list nat services")?;
            ids.extend(
                listed
                    .into_iter()
                    .filter(|n| n.state != "deleted")
                    .map(|n| n.nat_service_id),
            );
        }
    }

    for id in &ids {
        let live = api
            .get_nat_service(id)
            .await
            .context("failed to read nat service")?
            .is_some_and(|n| n.state != "deleted");
        if !live {
            tracing::debug!(nat_service_id = %id, "Nat service already gone");
            continue;
        }
        tolerate_gone(api.delete_nat_service(id).await).context("failed to delete nat service")?;
        tracing::info!(nat_service_id = %id, "Deleted nat service");
    }
    for key in cluster.status.resources.nat_service.keys() {
        cluster.status.resources.nat_service.untrack(&key);
    }
    if !ids.is_empty() {
        services
            .recorder
            .normal(&object_ref(cluster), "NatServicesDeleted", "Deleted nat services");
    }
    Ok(())
}
