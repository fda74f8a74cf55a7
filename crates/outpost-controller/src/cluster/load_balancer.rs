use super::{object_ref, security_group_id, subnet_id};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::{LoadBalancerRequest, Tag};
use outpost_core::{ApiEndpoint, Cluster, DEFAULT_KEY, Reconciler};

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if cluster.network().disable.load_balancer {
        tracing::debug!("Load balancer disabled");
        return Ok(());
    }
    if !cluster.needs_reconciliation(Reconciler::LoadBalancer) {
        tracing::debug!("Load balancer already reconciled for this generation");
        return Ok(());
    }
    let spec = cluster.load_balancer();
    let uid = cluster.uid().to_string();
    let api = services.cloud.load_balancer(&services.tenant);

    let target = Target::new(DEFAULT_KEY).probe(Probe::LoadBalancerName(&spec.name));
    let lb = match services
        .tracker(&uid)
        .resolve(&mut cluster.status.resources.load_balancer, &target)
        .await
    {
        Ok(name) => api
            .get_load_balancer(&name)
            .await
            .context("failed to read load balancer")?
            .ok_or_else(|| ReconcileError::MissingResource(format!("load balancer {}", name)))?,
        Err(e) if e.is_not_found() => {
            let subnet = cluster.load_balancer_subnet()?;
            let sg = cluster.load_balancer_security_group()?;
            let request = LoadBalancerRequest {
                name: spec.name.clone(),
                load_balancer_type: spec.load_balancer_type.clone(),
                subnet_id: subnet_id(cluster, &subnet)?,
                security_group_id: security_group_id(cluster, &cluster.security_group_key(&sg))?,
                listener: spec.listener.clone(),
                tags: vec![Tag::owner(&uid), Tag::name(spec.name.as_str())],
            };
            let lb = api
                .create_load_balancer(&request)
                .await
                .context("failed to create load balancer")?;
            tracing::info!(name = %lb.load_balancer_name, dns_name = %lb.dns_name, "Created load balancer");
            cluster
                .status
                .resources
                .load_balancer
                .track(DEFAULT_KEY, &lb.load_balancer_name);
            services.recorder.normal(
                &object_ref(cluster),
                "LoadBalancerCreated",
                &format!("Created load balancer {}", lb.load_balancer_name),
            );
            lb
        }
        Err(e) => return Err(e),
    };

    if lb.health_check.as_ref() != Some(&spec.health_check) {
        api.configure_health_check(&lb.load_balancer_name, &spec.health_check)
            .await
            .context("failed to configure load balancer health check")?;
        tracing::info!(name = %lb.load_balancer_name, port = spec.health_check.port, "Configured health check");
    }

    cluster.status.control_plane_endpoint = Some(ApiEndpoint {
        host: lb.dns_name.clone(),
        port: spec.listener.load_balancer_port,
    });
    cluster.mark_reconciled(Reconciler::LoadBalancer);
    Ok(())
}

pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if cluster.network().disable.load_balancer {
        return Ok(());
    }
    let name = cluster
        .status
        .resources
        .load_balancer
        .get(DEFAULT_KEY)
        .map(str::to_string)
        .unwrap_or_else(|| cluster.load_balancer().name);
    let api = services.cloud.load_balancer(&services.tenant);

    let exists = api
        .get_load_balancer(&name)
        .await
        .context("failed to read load balancer")?
        .is_some();
    if exists {
        tolerate_gone(api.delete_load_balancer(&name).await).context("failed to delete load balancer")?;
        tracing::info!(name = %name, "Deleted load balancer");
        services.recorder.normal(
            &object_ref(cluster),
            "LoadBalancerDeleted",
            &format!("Deleted load balancer {}", name),
        );
    }
    cluster.status.resources.load_balancer.untrack(DEFAULT_KEY);
    cluster.status.control_plane_endpoint = None;
    Ok(())
}
