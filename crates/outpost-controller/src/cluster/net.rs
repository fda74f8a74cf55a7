use super::object_ref;
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::ResourceType;
use outpost_core::{Cluster, DEFAULT_KEY, Reconciler};

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !cluster.needs_reconciliation(Reconciler::Net) {
        tracing::debug!("Net already reconciled for this generation");
        return Ok(());
    }
    let spec = cluster.net_spec();
    let name = cluster.net_name();
    let uid = cluster.uid().to_string();
    let tracker = services.tracker(&uid);

    let target = Target::new(DEFAULT_KEY)
        .pinned(spec.resource_id.as_deref())
        .probe(Probe::Owner(ResourceType::Net))
        .probe(Probe::Name(ResourceType::Net, &name));
    match tracker.resolve(&mut cluster.status.resources.net, &target).await {
        Ok(net_id) => {
            if let Some(pinned) = spec.resource_id.as_deref().filter(|id| !id.is_empty()) {
                tracker
                    .resolve_strict(ResourceType::Net, pinned)
                    .await
                    .context("pinned net is gone")?;
            }
            tracing::debug!(net_id = %net_id, "Net exists");
        }
        Err(e) if e.is_not_found() => {
            if cluster.network().use_existing.net {
                return Err(ReconcileError::MissingResource(format!("existing net {}", name)));
            }
            let net = services
                .cloud
                .net(&services.tenant)
                .create_net(&spec.ip_range, &uid, &name)
                .await
                .context("failed to create net")?;
            tracing::info!(net_id = %net.net_id, ip_range = %net.ip_range, "Created net");
            cluster
                .status
                .resources
                .net
                .track(DEFAULT_KEY, &net.net_id);
            services.recorder.normal(
                &object_ref(cluster),
                "NetCreated",
                &format!("Created net {}", net.net_id),
            );
        }
        Err(e) => return Err(e),
    }

    cluster.mark_reconciled(Reconciler::Net);
    Ok(())
}

/// The cluster net, tracked or found through its tags; `None` once it is gone
pub(crate) async fn find(services: &Services, cluster: &mut Cluster) -> Result<Option<String>> {
    let name = cluster.net_name();
    let uid = cluster.uid().to_string();
    let target = Target::new(DEFAULT_KEY)
        .probe(Probe::Owner(ResourceType::Net))
        .probe(Probe::Name(ResourceType::Net, &name));
    match services
        .tracker(&uid)
        .resolve(&mut cluster.status.resources.net, &target)
        .await
    {
        Ok(id) => Ok(Some(id)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if cluster.network().use_existing.net {
        tracing::debug!("Net is not managed, keeping it");
        return Ok(());
    }
    let Some(net_id) = find(services, cluster).await? else {
        tracing::debug!("Net already gone");
        return Ok(());
    };

    tolerate_gone(services.cloud.net(&services.tenant).delete_net(&net_id).await)
        .context("failed to delete net")?;
    tracing::info!(net_id = %net_id, "Deleted net");
    cluster.status.resources.net.untrack(DEFAULT_KEY);
    services.recorder.normal(
        &object_ref(cluster),
        "NetDeleted",
        &format!("Deleted net {}", net_id),
    );
    Ok(())
}
