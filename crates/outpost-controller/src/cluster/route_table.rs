use super::{nat_service, net_id, object_ref, subnet_id};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use outpost_cloud::{RouteTable, RouteTarget};
use outpost_core::{Cluster, DEFAULT_KEY, Reconciler, RouteTableSpec, RouteTargetKind};

/// Which tables a pass covers
///
/// The public pass runs before NAT services exist so the NAT subnet is
/// already reachable from the internet; it never touches NAT routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoutePass {
    PublicOnly,
    Full,
}

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster, pass: RoutePass) -> Result<()> {
    if cluster.network().use_existing.net {
        tracing::debug!("Route tables of an existing net are not managed");
        return Ok(());
    }
    if !cluster.needs_reconciliation(Reconciler::RouteTable) {
        tracing::debug!("Route tables already reconciled for this generation");
        return Ok(());
    }
    let net_id = net_id(cluster)?;
    let uid = cluster.uid().to_string();
    let api = services.cloud.route_table(&services.tenant);
    let existing = api
        .get_route_tables_from_net(&net_id)
        .await
        .context("failed to list route tables")?;

    for table in cluster.route_tables()? {
        if pass == RoutePass::PublicOnly && !table.is_public() {
            continue;
        }
        let subnet_ids = cluster
            .route_table_subnets(&table)?
            .iter()
            .map(|s| subnet_id(cluster, s))
            .collect::<Result<Vec<_>>>()?;

        let mut rtb = match find_table(cluster, &existing, &table, &subnet_ids)? {
            Some(rtb) => rtb,
            None => {
                let rtb = api
                    .create_route_table(&net_id, &uid, &table.name)
                    .await
                    .context("failed to create route table")?;
                tracing::info!(route_table_id = %rtb.route_table_id, name = %table.name, "Created route table");
                services.recorder.normal(
                    &object_ref(cluster),
                    "RouteTableCreated",
                    &format!("Created route table {}", rtb.route_table_id),
                );
                rtb
            }
        };
        cluster
            .status
            .resources
            .route_table
            .track(&table.name, &rtb.route_table_id);

        for id in &subnet_ids {
            if rtb.is_linked_to(id) {
                continue;
            }
            let link = api
                .link_route_table(&rtb.route_table_id, id)
                .await
                .context("failed to link route table")?;
            tracing::info!(route_table_id = %rtb.route_table_id, subnet_id = %id, "Linked route table");
            rtb.links.push(outpost_cloud::RouteTableLink {
                link_route_table_id: link,
                subnet_id: id.clone(),
            });
        }

        for route in &table.routes {
            if pass == RoutePass::PublicOnly && route.target == RouteTargetKind::Nat {
                continue;
            }
            if rtb.has_route_to(&route.destination) {
                continue;
            }
            let target = route_target(cluster, &table, route.target)?;
            rtb = api
                .create_route(&rtb.route_table_id, &route.destination, &target)
                .await
                .context("failed to create route")?;
            tracing::info!(
                route_table_id = %rtb.route_table_id,
                destination = %route.destination,
                target = %target,
                "Created route"
            );
        }
    }

    if pass == RoutePass::Full {
        cluster.mark_reconciled(Reconciler::RouteTable);
    }
    Ok(())
}

/// A table already serving the subnets, or the one tracked under its name
fn find_table(
    cluster: &Cluster,
    existing: &[RouteTable],
    table: &RouteTableSpec,
    subnet_ids: &[String],
) -> Result<Option<RouteTable>> {
    if let Some(rtb) = existing
        .iter()
        .find(|rtb| subnet_ids.iter().any(|id| rtb.is_linked_to(id)))
    {
        return Ok(Some(rtb.clone()));
    }
    let Some(tracked) = cluster.status.resources.route_table.get(&table.name) else {
        return Ok(None);
    };
    existing
        .iter()
        .find(|rtb| rtb.route_table_id == tracked)
        .cloned()
        .map(Some)
        .ok_or_else(|| ReconcileError::MissingResource(format!("route table {}", tracked)))
}

fn route_target(cluster: &Cluster, table: &RouteTableSpec, kind: RouteTargetKind) -> Result<RouteTarget> {
    match kind {
        RouteTargetKind::Gateway => {
            let pinned = cluster.network().internet_service.resource_id.clone();
            let id = pinned
                .filter(|id| !id.is_empty())
                .or_else(|| {
                    cluster
                        .status
                        .resources
                        .internet_service
                        .get(DEFAULT_KEY)
                        .map(str::to_string)
                })
                .ok_or_else(|| ReconcileError::MissingResource("internet service".to_string()))?;
            Ok(RouteTarget::Gateway(id))
        }
        RouteTargetKind::Nat => {
            let nat = cluster.find_nat_service("", &table.subregion_name)?;
            Ok(RouteTarget::Nat(nat_service::nat_service_id(cluster, &nat)?))
        }
    }
}

pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if cluster.network().use_existing.net || cluster.status.resources.route_table.is_empty() {
        return Ok(());
    }
    let api = services.cloud.route_table(&services.tenant);
    let existing = match net_id(cluster) {
        Ok(net_id) => api
            .get_route_tables_from_net(&net_id)
            .await
            .context("failed to list route tables")?,
        Err(_) => Vec::new(),
    };

    for key in cluster.status.resources.route_table.keys() {
        let tracked = cluster.status.resources.route_table.get(&key).map(str::to_string);
        if let Some(rtb) = tracked.and_then(|id| existing.iter().find(|r| r.route_table_id == id)) {
            for link in &rtb.links {
                tolerate_gone(api.unlink_route_table(&link.link_route_table_id).await)
                    .context("failed to unlink route table")?;
            }
            tolerate_gone(api.delete_route_table(&rtb.route_table_id).await)
                .context("failed to delete route table")?;
            tracing::info!(route_table_id = %rtb.route_table_id, name = %key, "Deleted route table");
        }
        cluster.status.resources.route_table.untrack(&key);
    }
    services
        .recorder
        .normal(&object_ref(cluster), "RouteTablesDeleted", "Deleted route tables");
    Ok(())
}
