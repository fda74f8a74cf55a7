use super::{object_ref, security_group_id, subnet_id};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::image;
use crate::outcome::Outcome;
use crate::services::Services;
use crate::tracker::{Probe, Target};
use outpost_cloud::{ResourceType, Tag, VmRequest, VmState, tag};
use outpost_core::{Cluster, DEFAULT_KEY, Reconciler, Role};

/// Public IP map key of the bastion address
const PUBLIC_IP_KEY: &str = "bastion";

pub(crate) async fn reconcile(services: &Services, cluster: &mut Cluster) -> Result<Outcome> {
    let spec = cluster.network().bastion.clone();
    if !spec.enable {
        return Ok(Outcome::Done);
    }
    if !cluster.needs_reconciliation(Reconciler::Bastion) {
        tracing::debug!("Bastion already reconciled for this generation");
        return Ok(Outcome::Done);
    }
    let uid = cluster.uid().to_string();
    let name = cluster.bastion_name();
    let token = cluster.bastion_client_token();
    let allocator = services.allocator(&uid);
    let api = services.cloud.vm(&services.tenant);

    let target = Target::new(DEFAULT_KEY)
        .pinned(spec.resource_id.as_deref())
        .probe(Probe::VmToken(&token))
        .probe(Probe::Name(ResourceType::Vm, &name));
    let vm = match services
        .tracker(&uid)
        .resolve(&mut cluster.status.resources.bastion, &target)
        .await
    {
        Ok(vm_id) => {
            let vm = api
                .get_vm(&vm_id)
                .await
                .context("failed to read bastion")?
                .filter(|vm| !vm.state.is_gone())
                .ok_or_else(|| ReconcileError::MissingResource(format!("bastion vm {}", vm_id)))?;
            if let Some(address) = &vm.public_ip {
                allocator
                    .retrack(&mut cluster.status.resources.public_ip, PUBLIC_IP_KEY, address)
                    .await?;
            }
            vm
        }
        Err(e) if e.is_not_found() => {
            let image_id = image::resolve(services, &mut cluster.status.resources.image, &spec.image).await?;
            let subnet = cluster.bastion_subnet()?;
            let subnet_id = subnet_id(cluster, &subnet)?;
            let security_group_ids = cluster
                .security_groups_for(&spec.security_group_names, Role::Bastion)?
                .iter()
                .map(|sg| security_group_id(cluster, &cluster.security_group_key(sg)))
                .collect::<Result<Vec<_>>>()?;

            let address = match spec.public_ip_id.as_deref().filter(|id| !id.is_empty()) {
                Some(pinned) => {
                    services
                        .cloud
                        .public_ip(&services.tenant)
                        .get_public_ip(pinned)
                        .await
                        .context("failed to read bastion public ip")?
                        .ok_or_else(|| ReconcileError::MissingResource(format!("public ip {}", pinned)))?
                        .public_ip
                }
                None => {
                    allocator
                        .allocate(&mut cluster.status.resources.public_ip, PUBLIC_IP_KEY, &name, None)
                        .await
                        .context("failed to allocate bastion public ip")?
                        .public_ip
                }
            };

            let request = VmRequest {
                name: name.clone(),
                client_token: token.clone(),
                image_id,
                vm_type: spec.vm_type.clone(),
                keypair_name: Some(spec.keypair_name.clone()).filter(|k| !k.is_empty()),
                subnet_id,
                security_group_ids,
                private_ips: spec.private_ips.clone(),
                user_data: None,
                tags: vec![
                    Tag::owner(&uid),
                    Tag::new(tag::AUTO_ATTACH_PUBLIC_IP_KEY, address.as_str()),
                ],
            };
            let vm = api
                .create_vm(&request)
                .await
                .context("failed to create bastion")?;
            tracing::info!(vm_id = %vm.vm_id, public_ip = %address, "Created bastion");
            cluster
                .status
                .resources
                .bastion
                .track(DEFAULT_KEY, &vm.vm_id);
            services.recorder.normal(
                &object_ref(cluster),
                "BastionCreated",
                &format!("Created bastion {}", vm.vm_id),
            );
            vm
        }
        Err(e) => return Err(e),
    };

    cluster.status.bastion_state = Some(vm.state);
    if vm.state != VmState::Running {
        let delay = services.config.vm_pending_requeue();
        tracing::info!(vm_id = %vm.vm_id, state = %vm.state, ?delay, "Waiting for bastion to run");
        return Ok(Outcome::Requeue(delay));
    }

    cluster.mark_reconciled(Reconciler::Bastion);
    Ok(Outcome::Done)
}

pub(crate) async fn delete(services: &Services, cluster: &mut Cluster) -> Result<()> {
    if !cluster.network().bastion.enable && cluster.status.resources.bastion.is_empty() {
        return Ok(());
    }
    let uid = cluster.uid().to_string();
    let token = cluster.bastion_client_token();
    let api = services.cloud.vm(&services.tenant);

    let target = Target::new(DEFAULT_KEY).probe(Probe::VmToken(&token));
    let vm_id = match services
        .tracker(&uid)
        .resolve(&mut cluster.status.resources.bastion, &target)
        .await
    {
        Ok(id) => Some(id),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    if let Some(vm_id) = vm_id {
        let live = api
            .get_vm(&vm_id)
            .await
            .context("failed to read bastion")?
            .is_some_and(|vm| !vm.state.is_gone());
        if live {
            tolerate_gone(api.delete_vm(&vm_id).await).context("failed to delete bastion")?;
            tracing::info!(vm_id = %vm_id, "Deleted bastion");
            services.recorder.normal(
                &object_ref(cluster),
                "BastionDeleted",
                &format!("Deleted bastion {}", vm_id),
            );
        }
        cluster.status.resources.bastion.untrack(DEFAULT_KEY);
    }

    services
        .allocator(&uid)
        .deallocate(&mut cluster.status.resources.public_ip, PUBLIC_IP_KEY)
        .await
        .context("failed to release bastion public ip")?;
    cluster.status.bastion_state = None;
    Ok(())
}
