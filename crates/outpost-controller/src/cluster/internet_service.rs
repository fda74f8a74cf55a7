use super::{net_id, object_ref};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::ResourceType;
use outpost_core::{Cluster, DEFAULT_KEY, Reconciler};

fn managed(cluster: &Cluster) -> bool {
    let network = cluster.network();
    !network.disable.internet && !network.use_existing.net
}

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !managed(cluster) {
        tracing::debug!("Internet service disabled");
        return Ok(());
    }
    if !cluster.needs_reconciliation(Reconciler::InternetService) {
        tracing::debug!("Internet service already reconciled for this generation");
        return Ok(());
    }
    let net_id = net_id(cluster)?;
    let name = cluster.internet_service_name();
    let pinned = cluster.network().internet_service.resource_id.clone();
    let uid = cluster.uid().to_string();
    let api = services.cloud.internet_service(&services.tenant);

    let target = Target::new(DEFAULT_KEY)
        .pinned(pinned.as_deref())
        .probe(Probe::InternetServiceForNet(&net_id))
        .probe(Probe::Owner(ResourceType::InternetService))
        .probe(Probe::Name(ResourceType::InternetService, &name));
    let internet_service_id = match services
        .tracker(&uid)
        .resolve(&mut cluster.status.resources.internet_service, &target)
        .await
    {
        Ok(id) => id,
        Err(e) if e.is_not_found() => {
            let igw = api
                .create_internet_service(&uid, &name)
                .await
                .context("failed to create internet service")?;
            tracing::info!(internet_service_id = %igw.internet_service_id, "Created internet service");
            cluster
                .status
                .resources
                .internet_service
                .track(DEFAULT_KEY, &igw.internet_service_id);
            services.recorder.normal(
                &object_ref(cluster),
                "InternetServiceCreated",
                &format!("Created internet service {}", igw.internet_service_id),
            );
            igw.internet_service_id
        }
        Err(e) => return Err(e),
    };

    let igw = api
        .get_internet_service(&internet_service_id)
        .await
        .context("failed to read internet service")?
        .ok_or_else(|| {
            ReconcileError::MissingResource(format!("internet service {}", internet_service_id))
        })?;
    match igw.net_id.as_deref() {
        Some(linked) if linked == net_id => {}
        Some(other) => {
            return Err(ReconcileError::MissingResource(format!(
                "internet service {} is linked to foreign net {}",
                internet_service_id, other
            )));
        }
        None => {
            api.link_internet_service(&internet_service_id, &net_id)
                .await
                .context("failed to link internet service")?;
            tracing::info!(internet_service_id = %internet_service_id, net_id = %net_id, "Linked internet service");
        }
    }

    cluster.mark_reconciled(Reconciler::InternetService);
    Ok(())
}

pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !managed(cluster) {
        return Ok(());
    }
    let Some(internet_service_id) = cluster
        .status
        .resources
        .internet_service
        .get(DEFAULT_KEY)
        .map(str::to_string)
    else {
        tracing::debug!("No tracked internet service");
        return Ok(());
    };
    let api = services.cloud.internet_service(&services.tenant);

    let igw = api
        .get_internet_service(&internet_service_id)
        .await
        .context("failed to read internet service")?;
    if let Some(igw) = igw {
        if let Some(linked) = &igw.net_id {
            tolerate_gone(api.unlink_internet_service(&internet_service_id, linked).await)
                .context("failed to unlink internet service")?;
        }
        tolerate_gone(api.delete_internet_service(&internet_service_id).await)
            .context("failed to delete internet service")?;
        tracing::info!(internet_service_id = %internet_service_id, "Deleted internet service");
    }
    cluster
        .status
        .resources
        .internet_service
        .untrack(DEFAULT_KEY);
    Ok(())
}
