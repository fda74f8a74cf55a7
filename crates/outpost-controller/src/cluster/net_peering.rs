//! Net peering toward the management net
//!
//! The peering is requested from the workload tenant and accepted from the
//! management tenant. Routes go both ways: the management tables learn the
//! workload CIDR and the cluster tables learn the management CIDR.

use super::{net, net_id, object_ref};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::{NetPeeringState, ResourceType, RouteTable, RouteTarget};
use outpost_core::{Cluster, CoreError, DEFAULT_KEY, Reconciler};

fn enabled(cluster: &Cluster) -> bool {
    cluster.network().net_peering.enable && !cluster.network().use_existing.net
}

/// Management account and net, from the cluster spec or the controller config
fn management(services: &Services, cluster: &Cluster) -> Result<(String, String)> {
    let spec = &cluster.network().net_peering;
    let fallback = &services.config.management;
    let account_id = if spec.management_account_id.is_empty() {
        fallback.account_id.clone()
    } else {
        spec.management_account_id.clone()
    };
    let net_id = if spec.management_net_id.is_empty() {
        fallback.net_id.clone()
    } else {
        spec.management_net_id.clone()
    };
    if account_id.is_empty() || net_id.is_empty() {
        return Err(CoreError::InvalidSpec(
            "net peering needs a management account id and net id".to_string(),
        )
        .into());
    }
    Ok((account_id, net_id))
}

fn peering_id(cluster: &Cluster) -> Option<String> {
    cluster
        .status
        .resources
        .net_peering
        .get(DEFAULT_KEY)
        .map(str::to_string)
}

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !enabled(cluster) {
        return Ok(());
    }
    if !cluster.needs_reconciliation(Reconciler::NetPeering) {
        tracing::debug!("Net peering already reconciled for this generation");
        return Ok(());
    }
    let net_id = net_id(cluster)?;
    let (account_id, management_net_id) = management(services, cluster)?;
    let uid = cluster.uid().to_string();
    let api = services.cloud.net_peering(&services.tenant);

    let target = Target::new(DEFAULT_KEY).probe(Probe::Owner(ResourceType::NetPeering));
    let existing = match services
        .tracker(&uid)
        .resolve(&mut cluster.status.resources.net_peering, &target)
        .await
    {
        Ok(id) => {
            let peering = api
                .get_net_peering(&id)
                .await
                .context("failed to read net peering")?
                .ok_or_else(|| ReconcileError::MissingResource(format!("net peering {}", id)))?;
            Some(peering)
        }
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let peering = match existing {
        Some(peering) if peering.state.is_live() => peering,
        stale => {
            if let Some(stale) = &stale {
                tracing::info!(
                    net_peering_id = %stale.net_peering_id,
                    state = ?stale.state,
                    "Net peering is no longer usable, requesting a new one"
                );
            }
            let peering = api
                .create_net_peering(&net_id, &management_net_id, &account_id, &uid)
                .await
                .context("failed to create net peering")?;
            tracing::info!(
                net_peering_id = %peering.net_peering_id,
                accepter_net_id = %management_net_id,
                "Created net peering"
            );
            cluster
                .status
                .resources
                .net_peering
                .replace(DEFAULT_KEY, &peering.net_peering_id);
            services.recorder.normal(
                &object_ref(cluster),
                "NetPeeringCreated",
                &format!("Created net peering {}", peering.net_peering_id),
            );
            peering
        }
    };

    if peering.state == NetPeeringState::PendingAcceptance {
        services
            .cloud
            .net_peering(&services.management)
            .accept_net_peering(&peering.net_peering_id)
            .await
            .context("failed to accept net peering")?;
        tracing::info!(
            net_peering_id = %peering.net_peering_id,
            tenant = %services.management.name(),
            "Accepted net peering"
        );
    }

    cluster.mark_reconciled(Reconciler::NetPeering);
    Ok(())
}

/// Management route tables to update, and the CIDR the cluster routes to
async fn management_side(
    services: &Services,
    cluster: &Cluster,
    management_net_id: &str,
) -> Result<(Vec<RouteTable>, String)> {
    let tenant = &services.management;
    let tables = services
        .cloud
        .route_table(tenant)
        .get_route_tables_from_net(management_net_id)
        .await
        .context("failed to list management route tables")?;
    let subnet_id = &cluster.network().net_peering.management_subnet_id;
    if subnet_id.is_empty() {
        let net = services
            .cloud
            .net(tenant)
            .get_net(management_net_id)
            .await
            .context("failed to read management net")?
            .ok_or_else(|| ReconcileError::MissingResource(format!("management net {}", management_net_id)))?;
        return Ok((tables, net.ip_range));
    }

    let tables: Vec<RouteTable> = tables
        .into_iter()
        .filter(|t| t.is_linked_to(subnet_id))
        .collect();
    if tables.is_empty() {
        return Err(ReconcileError::MissingResource(format!(
            "route table of management subnet {}",
            subnet_id
        )));
    }
    let subnet = services
        .cloud
        .subnet(tenant)
        .get_subnet(subnet_id)
        .await
        .context("failed to read management subnet")?
        .ok_or_else(|| ReconcileError::MissingResource(format!("management subnet {}", subnet_id)))?;
    Ok((tables, subnet.ip_range))
}

pub(crate) async fn reconcile_routes(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !enabled(cluster) {
        return Ok(());
    }
    if !cluster.needs_reconciliation(Reconciler::NetPeeringRoutes) {
        tracing::debug!("Net peering routes already reconciled for this generation");
        return Ok(());
    }
    let net_id = net_id(cluster)?;
    let net_peering_id =
        peering_id(cluster).ok_or_else(|| ReconcileError::MissingResource("net peering".to_string()))?;
    let (_, management_net_id) = management(services, cluster)?;
    let (management_tables, management_range) =
        management_side(services, cluster, &management_net_id).await?;
    let target = RouteTarget::NetPeering(net_peering_id.clone());

    let workload_range = cluster.net_spec().ip_range;
    let management_api = services.cloud.route_table(&services.management);
    for table in &management_tables {
        if table.has_route_to(&workload_range) {
            if table.peering_routes(&net_peering_id).next().is_none() {
                tracing::warn!(
                    route_table_id = %table.route_table_id,
                    destination = %workload_range,
                    "Management route table already routes the cluster range elsewhere"
                );
            }
            continue;
        }
        management_api
            .create_route(&table.route_table_id, &workload_range, &target)
            .await
            .context("failed to create management peering route")?;
        tracing::info!(route_table_id = %table.route_table_id, destination = %workload_range, "Created management peering route");
    }

    let api = services.cloud.route_table(&services.tenant);
    let tracked: Vec<String> = cluster
        .status
        .resources
        .route_table
        .iter()
        .map(|(_, id)| id.to_string())
        .collect();
    let workload_tables = api
        .get_route_tables_from_net(&net_id)
        .await
        .context("failed to list route tables")?;
    for table in workload_tables
        .iter()
        .filter(|t| tracked.contains(&t.route_table_id))
    {
        if table.has_route_to(&management_range) {
            continue;
        }
        api.create_route(&table.route_table_id, &management_range, &target)
            .await
            .context("failed to create peering route")?;
        tracing::info!(route_table_id = %table.route_table_id, destination = %management_range, "Created peering route");
    }

    cluster.mark_reconciled(Reconciler::NetPeeringRoutes);
    Ok(())
}

/// Peerings of the cluster net that still exist, plus the tracked one
async fn live_peerings(services: &Services, cluster: &mut Cluster) -> Result<Vec<String>> {
    let mut ids: Vec<String> = peering_id(cluster).into_iter().collect();
    let Some(net_id) = net::find(services, cluster).await? else {
        return Ok(ids);
    };
    let peerings = services
        .cloud
        .net_peering(&services.tenant)
        .list_net_peerings(&net_id)
        .await
        .context("failed to list net peerings")?;
    for peering in peerings.into_iter().filter(|p| p.state.is_live()) {
        if !ids.contains(&peering.net_peering_id) {
            ids.push(peering.net_peering_id);
        }
    }
    Ok(ids)
}

/// Remove the routes the management tables hold toward the cluster
///
/// Cluster-side routes disappear with the cluster route tables.
pub(crate) async fn delete_routes(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !enabled(cluster) {
        return Ok(());
    }
    let peerings = live_peerings(services, cluster).await?;
    if peerings.is_empty() {
        return Ok(());
    }
    let (_, management_net_id) = management(services, cluster)?;
    let api = services.cloud.route_table(&services.management);
    let tables = api
        .get_route_tables_from_net(&management_net_id)
        .await
        .context("failed to list management route tables")?;
    for table in &tables {
        for net_peering_id in &peerings {
            for route in table.peering_routes(net_peering_id) {
                tolerate_gone(
                    api.delete_route(&table.route_table_id, &route.destination_ip_range)
                        .await,
                )
                .context("failed to delete management peering route")?;
                tracing::info!(
                    route_table_id = %table.route_table_id,
                    destination = %route.destination_ip_range,
                    "Deleted management peering route"
                );
            }
        }
    }
    Ok(())
}

/// Delete every live peering of the cluster net, tracked or not
pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !enabled(cluster) {
        return Ok(());
    }
    let api = services.cloud.net_peering(&services.tenant);
    for net_peering_id in live_peerings(services, cluster).await? {
        let live = api
            .get_net_peering(&net_peering_id)
            .await
            .context("failed to read net peering")?
            .is_some_and(|p| p.state.is_live());
        if !live {
            continue;
        }
        tolerate_gone(api.delete_net_peering(&net_peering_id).await)
            .context("failed to delete net peering")?;
        tracing::info!(net_peering_id = %net_peering_id, "Deleted net peering");
        services.recorder.normal(
            &object_ref(cluster),
            "NetPeeringDeleted",
            &format!("Deleted net peering {}", net_peering_id),
        );
    }
    cluster.status.resources.net_peering.untrack(DEFAULT_KEY);
    Ok(())
}
