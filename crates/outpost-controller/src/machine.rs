//! Machine reconciler
//!
//! One VM per machine, placed in the cluster network once the cluster
//! infrastructure is ready. Volumes and the keypair come first; volumes are
//! linked and control-plane VMs registered with the cluster load balancer
//! after the VM reaches `running`. Deletion goes volumes, VM, keypair.

use crate::cluster::{security_group_id, subnet_id};
use crate::error::{ReconcileError, Result, ResultExt, tolerate_gone};
use crate::image;
use crate::keypair;
use crate::outcome::Outcome;
use crate::services::Services;
use crate::tracker::{Probe, Target};
use crate::volume;
use outpost_cloud::{ResourceType, Tag, Vm, VmRequest, VmState, tag};
use outpost_core::{
    AddressKind, Cluster, ConditionType, DEFAULT_KEY, Machine, NodeAddress, Reconciler,
};

pub(crate) fn object_ref(machine: &Machine) -> String {
    format!("machine/{}", machine.name())
}

pub struct MachineReconciler<'a> {
    services: &'a Services,
}

impl<'a> MachineReconciler<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    #[tracing::instrument(skip_all, fields(machine = %machine.name(), cluster = %cluster.name()))]
    pub async fn reconcile(&self, cluster: &Cluster, machine: &mut Machine) -> Result<Outcome> {
        if machine.metadata.deletion_requested {
            let result = self.reconcile_delete(cluster, machine).await;
            return self.settle(machine, "VmDeletionFailed", result).map(|()| Outcome::Done);
        }
        if !cluster.status.ready {
            let delay = self.services.config.vm_pending_requeue();
            tracing::info!(?delay, "Waiting for cluster infrastructure");
            return Ok(Outcome::Requeue(delay));
        }
        let result = self.reconcile_normal(cluster, machine).await;
        self.settle(machine, "VmReconciliationFailed", result)
    }

    fn settle<T>(&self, machine: &mut Machine, reason: &str, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            let message = e.to_string();
            tracing::warn!(reason, error = %message, "Machine reconcile failed");
            machine
                .status
                .conditions
                .mark_false(ConditionType::VmReady, reason, message.clone());
            self.services
                .recorder
                .warning(&object_ref(machine), reason, &message);
            e.context("failed to reconcile vm")
        })
    }

    async fn reconcile_normal(&self, cluster: &Cluster, machine: &mut Machine) -> Result<Outcome> {
        if machine.status.ready && !machine.needs_reconciliation(Reconciler::Vm) {
            tracing::debug!("Vm already reconciled for this generation");
            return Ok(Outcome::Done);
        }
        let s = self.services;
        let (_, subregion) = machine.placement(cluster);
        let subregion = if subregion.is_empty() {
            cluster.default_subregion()
        } else {
            subregion
        };

        if machine.needs_reconciliation(Reconciler::Volume) {
            if let Err(e) = volume::reconcile(s, cluster, machine, &subregion).await {
                machine.status.conditions.mark_false(
                    ConditionType::VolumeReady,
                    "VolumeReconciliationFailed",
                    e.to_string(),
                );
                return Err(e.context("failed to reconcile volumes"));
            }
            if !machine.spec.vm.volumes.is_empty() {
                machine.status.conditions.mark_true(ConditionType::VolumeReady);
            }
            machine.mark_reconciled(Reconciler::Volume);
        }
        if machine.needs_reconciliation(Reconciler::Keypair) {
            keypair::reconcile(s, machine).await?;
            machine.mark_reconciled(Reconciler::Keypair);
        }

        let vm = match self.find_vm(cluster, machine).await? {
            Some(vm) => vm,
            None => self.create_vm(cluster, machine, &subregion).await?,
        };
        machine.status.vm_state = Some(vm.state);
        if vm.state != VmState::Running {
            let delay = s.config.vm_pending_requeue();
            tracing::info!(vm_id = %vm.vm_id, state = %vm.state, ?delay, "Waiting for vm to run");
            machine.status.conditions.mark_false(
                ConditionType::VmReady,
                "VmNotRunning",
                format!("vm {} is {}", vm.vm_id, vm.state),
            );
            return Ok(Outcome::Requeue(delay));
        }

        volume::link(s, machine, &vm.vm_id).await?;
        if machine.is_control_plane() && !cluster.network().disable.load_balancer {
            self.link_load_balancer(cluster, &vm.vm_id).await?;
        }

        let mut addresses = Vec::new();
        if let Some(ip) = &vm.private_ip {
            addresses.push(NodeAddress {
                kind: AddressKind::InternalIp,
                address: ip.clone(),
            });
        }
        if let Some(ip) = &vm.public_ip {
            addresses.push(NodeAddress {
                kind: AddressKind::ExternalIp,
                address: ip.clone(),
            });
        }
        machine.status.addresses = addresses;
        if machine.is_control_plane() {
            machine.status.failure_domain = Some(subregion.clone());
        }
        if machine.spec.provider_id.is_none() {
            machine.set_provider_id(&subregion, &vm.vm_id);
        }

        if tag::tag_value(tag::NODE_NAME_KEY, &vm.tags).is_none() {
            if let Some(dns) = &vm.private_dns_name {
                s.cloud
                    .tag(&s.tenant)
                    .add_tag(&vm.vm_id, tag::NODE_NAME_KEY, dns)
                    .await
                    .context("failed to tag vm with its node name")?;
                tracing::info!(vm_id = %vm.vm_id, node_name = %dns, "Tagged vm with node name");
            }
        }

        machine.status.conditions.mark_true(ConditionType::VmReady);
        machine.mark_reconciled(Reconciler::Vm);
        if !machine.status.ready {
            s.recorder
                .normal(&object_ref(machine), "VmReady", &format!("Vm {} is running", vm.vm_id));
        }
        machine.status.ready = true;
        Ok(Outcome::Done)
    }

    /// The machine VM, if any lookup finds it
    ///
    /// A tracked VM that is gone on the provider side is drift.
    async fn find_vm(&self, cluster: &Cluster, machine: &mut Machine) -> Result<Option<Vm>> {
        let s = self.services;
        let token = machine.vm_client_token(cluster);
        let legacy = machine.legacy_vm_name(cluster);
        let pinned = machine.spec.vm.resource_id.clone();
        let target = Target::new(DEFAULT_KEY)
            .pinned(pinned.as_deref())
            .probe(Probe::VmToken(&token))
            .probe(Probe::Name(ResourceType::Vm, &legacy));
        let vm_id = match s
            .tracker(cluster.uid())
            .resolve(&mut machine.status.resources.vm, &target)
            .await
        {
            Ok(id) => id,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let vm = s
            .cloud
            .vm(&s.tenant)
            .get_vm(&vm_id)
            .await
            .context("failed to read vm")?
            .filter(|vm| !vm.state.is_gone())
            .ok_or_else(|| ReconcileError::MissingResource(format!("vm {}", vm_id)))?;
        if let Some(address) = &vm.public_ip {
            s.allocator(cluster.uid())
                .retrack(&mut machine.status.resources.public_ip, DEFAULT_KEY, address)
                .await?;
        }
        Ok(Some(vm))
    }

    async fn create_vm(&self, cluster: &Cluster, machine: &mut Machine, subregion: &str) -> Result<Vm> {
        let s = self.services;
        let spec = machine.spec.vm.clone();
        let role = machine.spec.role;
        let (subnet_name, _) = machine.placement(cluster);
        let subnet = cluster.find_subnet(&subnet_name, role, subregion)?;
        let subnet_id = subnet_id(cluster, &subnet)?;
        let security_group_ids = cluster
            .security_groups_for(&spec.security_group_names, role)?
            .iter()
            .map(|sg| security_group_id(cluster, &cluster.security_group_key(sg)))
            .collect::<Result<Vec<_>>>()?;
        let image_id = image::resolve(s, &mut machine.status.resources.image, &spec.image).await?;
        let name = machine.legacy_vm_name(cluster);

        let mut tags: Vec<Tag> = spec
            .tags
            .iter()
            .map(|(k, v)| Tag::new(k.as_str(), v.as_str()))
            .collect();
        tags.push(Tag::owner(cluster.uid()));
        if spec.public_ip || !spec.public_ip_pool.is_empty() {
            let pool = Some(spec.public_ip_pool.as_str()).filter(|p| !p.is_empty());
            let ip = s
                .allocator(cluster.uid())
                .allocate(&mut machine.status.resources.public_ip, DEFAULT_KEY, &name, pool)
                .await
                .context("failed to allocate vm public ip")?;
            tags.push(Tag::new(tag::AUTO_ATTACH_PUBLIC_IP_KEY, ip.public_ip));
        }

        let request = VmRequest {
            name,
            client_token: machine.vm_client_token(cluster),
            image_id,
            vm_type: spec.vm_type.clone(),
            keypair_name: Some(spec.keypair_name.clone()).filter(|k| !k.is_empty()),
            subnet_id,
            security_group_ids,
            private_ips: spec.private_ips.clone(),
            user_data: machine.spec.bootstrap_data.clone(),
            tags,
        };
        let vm = s
            .cloud
            .vm(&s.tenant)
            .create_vm(&request)
            .await
            .context("failed to create vm")?;
        tracing::info!(vm_id = %vm.vm_id, subnet_id = %vm.subnet_id, "Created vm");
        machine.status.resources.vm.track(DEFAULT_KEY, &vm.vm_id);
        machine.set_provider_id(subregion, &vm.vm_id);
        s.recorder
            .normal(&object_ref(machine), "VmCreated", &format!("Created vm {}", vm.vm_id));
        Ok(vm)
    }

    async fn link_load_balancer(&self, cluster: &Cluster, vm_id: &str) -> Result<()> {
        let name = cluster
            .status
            .resources
            .load_balancer
            .get(DEFAULT_KEY)
            .ok_or_else(|| ReconcileError::MissingResource("cluster load balancer".to_string()))?;
        let api = self.services.cloud.load_balancer(&self.services.tenant);
        let lb = api
            .get_load_balancer(name)
            .await
            .context("failed to read load balancer")?
            .ok_or_else(|| ReconcileError::MissingResource(format!("load balancer {}", name)))?;
        if lb.backend_vm_ids.iter().any(|id| id == vm_id) {
            tracing::debug!(vm_id, load_balancer = %name, "Vm already registered with load balancer");
            return Ok(());
        }
        api.link_backend_vms(name, &[vm_id.to_string()])
            .await
            .context("failed to link vm to load balancer")?;
        tracing::info!(vm_id, load_balancer = %name, "Linked vm to load balancer");
        Ok(())
    }

    async fn reconcile_delete(&self, cluster: &Cluster, machine: &mut Machine) -> Result<()> {
        let s = self.services;
        volume::delete(s, machine).await?;

        let token = machine.vm_client_token(cluster);
        let legacy = machine.legacy_vm_name(cluster);
        let pinned = machine.spec.vm.resource_id.clone();
        let target = Target::new(DEFAULT_KEY)
            .pinned(pinned.as_deref())
            .probe(Probe::VmToken(&token))
            .probe(Probe::Name(ResourceType::Vm, &legacy));
        let vm_id = match s
            .tracker(cluster.uid())
            .resolve(&mut machine.status.resources.vm, &target)
            .await
        {
            Ok(id) => Some(id),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(vm_id) = vm_id {
            let api = s.cloud.vm(&s.tenant);
            let live = api
                .get_vm(&vm_id)
                .await
                .context("failed to read vm")?
                .is_some_and(|vm| !vm.state.is_gone());
            if live {
                if machine.is_control_plane() {
                    self.unlink_load_balancer(cluster, &vm_id).await?;
                }
                tolerate_gone(api.delete_vm(&vm_id).await).context("failed to delete vm")?;
                tracing::info!(vm_id = %vm_id, "Deleted vm");
                s.recorder
                    .normal(&object_ref(machine), "VmDeleted", &format!("Deleted vm {}", vm_id));
            } else {
                tracing::debug!(vm_id = %vm_id, "Vm already gone");
            }
            machine.status.resources.vm.untrack(DEFAULT_KEY);
        }
        keypair::delete(s, machine).await?;

        let allocator = s.allocator(cluster.uid());
        for key in machine.status.resources.public_ip.keys() {
            allocator
                .deallocate(&mut machine.status.resources.public_ip, &key)
                .await
                .context("failed to release vm public ip")?;
        }
        machine.status.ready = false;
        machine.status.vm_state = None;
        machine.status.addresses.clear();
        machine.status.reconcilers.clear();
        Ok(())
    }

    async fn unlink_load_balancer(&self, cluster: &Cluster, vm_id: &str) -> Result<()> {
        let Some(name) = cluster.status.resources.load_balancer.get(DEFAULT_KEY) else {
            return Ok(());
        };
        let api = self.services.cloud.load_balancer(&self.services.tenant);
        let linked = api
            .get_load_balancer(name)
            .await
            .context("failed to read load balancer")?
            .is_some_and(|lb| lb.backend_vm_ids.iter().any(|id| id == vm_id));
        if linked {
            tolerate_gone(api.unlink_backend_vms(name, &[vm_id.to_string()]).await)
                .context("failed to unlink vm from load balancer")?;
            tracing::info!(vm_id, load_balancer = %name, "Unlinked vm from load balancer");
        }
        Ok(())
    }
}
