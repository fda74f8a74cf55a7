//! Cluster reconciler
//!
//! Steps run in a fixed dependency order on create and in reverse on
//! delete. The first failing step aborts the pass and marks its condition
//! false; later steps are not attempted.

mod bastion;
mod internet_service;
mod load_balancer;
mod nat_service;
mod net;
mod net_access_point;
mod net_peering;
mod public_ip;
mod route_table;
mod security_group;
mod subnet;

use crate::error::{ReconcileError, Result};
use crate::outcome::Outcome;
use crate::services::Services;
use outpost_core::{Cluster, ConditionType, DEFAULT_KEY, Machine, SubnetSpec};

use route_table::RoutePass;

/// `<kind>/<name>` reference used on events
pub(crate) fn object_ref(cluster: &Cluster) -> String {
    format!("cluster/{}", cluster.name())
}

/// Provider id of the cluster net
pub(crate) fn net_id(cluster: &Cluster) -> Result<String> {
    if let Some(id) = cluster
        .network()
        .net
        .resource_id
        .as_deref()
        .filter(|id| !id.is_empty())
    {
        return Ok(id.to_string());
    }
    cluster
        .status
        .resources
        .net
        .get(DEFAULT_KEY)
        .map(str::to_string)
        .ok_or_else(|| ReconcileError::MissingResource(format!("net of cluster {}", cluster.name())))
}

/// Provider id of a subnet, pinned or tracked by its IP range
pub(crate) fn subnet_id(cluster: &Cluster, spec: &SubnetSpec) -> Result<String> {
    if let Some(id) = spec.resource_id.as_deref().filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }
    cluster
        .status
        .resources
        .subnet
        .get(&spec.ip_range)
        .map(str::to_string)
        .ok_or_else(|| ReconcileError::MissingResource(format!("subnet {}", spec.ip_range)))
}

/// Provider id of a tracked security group
pub(crate) fn security_group_id(cluster: &Cluster, key: &str) -> Result<String> {
    cluster
        .status
        .resources
        .security_group
        .get(key)
        .map(str::to_string)
        .ok_or_else(|| ReconcileError::MissingResource(format!("security group {}", key)))
}

/// Per-step condition bookkeeping
struct Step {
    condition: ConditionType,
    reason: &'static str,
    delete_reason: &'static str,
    context: &'static str,
}

impl Step {
    fn settle<T>(&self, services: &Services, cluster: &mut Cluster, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                cluster.status.conditions.mark_true(self.condition);
                Ok(value)
            }
            Err(e) => Err(self.fail(services, cluster, self.reason, e)),
        }
    }

    fn settle_delete(&self, services: &Services, cluster: &mut Cluster, result: Result<()>) -> Result<()> {
        result.map_err(|e| self.fail(services, cluster, self.delete_reason, e))
    }

    fn fail(
        &self,
        services: &Services,
        cluster: &mut Cluster,
        reason: &str,
        err: ReconcileError,
    ) -> ReconcileError {
        let message = err.to_string();
        tracing::warn!(condition = %self.condition, reason, error = %message, "Reconcile step failed");
        cluster
            .status
            .conditions
            .mark_false(self.condition, reason, message.clone());
        services
            .recorder
            .warning(&object_ref(cluster), reason, &message);
        err.context(self.context)
    }
}

const NET: Step = Step {
    condition: ConditionType::NetReady,
    reason: "NetReconciliationFailed",
    delete_reason: "NetDeletionFailed",
    context: "failed to reconcile net",
};

const SUBNETS: Step = Step {
    condition: ConditionType::SubnetsReady,
    reason: "SubnetsReconciliationFailed",
    delete_reason: "SubnetsDeletionFailed",
    context: "failed to reconcile subnets",
};

const INTERNET_SERVICE: Step = Step {
    condition: ConditionType::InternetServicesReady,
    reason: "InternetServiceReconciliationFailed",
    delete_reason: "InternetServiceDeletionFailed",
    context: "failed to reconcile internet service",
};

const ROUTE_TABLES: Step = Step {
    condition: ConditionType::RouteTablesReady,
    reason: "RouteTablesReconciliationFailed",
    delete_reason: "RouteTablesDeletionFailed",
    context: "failed to reconcile route tables",
};

const NAT_SERVICES: Step = Step {
    condition: ConditionType::NatServicesReady,
    reason: "NatServicesReconciliationFailed",
    delete_reason: "NatServicesDeletionFailed",
    context: "failed to reconcile nat services",
};

const PUBLIC_IPS: Step = Step {
    condition: ConditionType::NatServicesReady,
    reason: "PublicIpsReconciliationFailed",
    delete_reason: "PublicIpsDeletionFailed",
    context: "failed to release public ips",
};

const NET_PEERING: Step = Step {
    condition: ConditionType::NetPeeringReady,
    reason: "NetPeeringReconciliationFailed",
    delete_reason: "NetPeeringDeletionFailed",
    context: "failed to reconcile net peering",
};

const NET_ACCESS_POINTS: Step = Step {
    condition: ConditionType::NetAccessPointsReady,
    reason: "NetAccessPointsReconciliationFailed",
    delete_reason: "NetAccessPointsDeletionFailed",
    context: "failed to reconcile net access points",
};

const SECURITY_GROUPS: Step = Step {
    condition: ConditionType::SecurityGroupsReady,
    reason: "SecurityGroupsReconciliationFailed",
    delete_reason: "SecurityGroupsDeletionFailed",
    context: "failed to reconcile security groups",
};

const LOAD_BALANCER: Step = Step {
    condition: ConditionType::LoadBalancerReady,
    reason: "LoadBalancerReconciliationFailed",
    delete_reason: "LoadBalancerDeletionFailed",
    context: "failed to reconcile load balancer",
};

const BASTION: Step = Step {
    condition: ConditionType::BastionReady,
    reason: "BastionReconciliationFailed",
    delete_reason: "BastionDeletionFailed",
    context: "failed to reconcile bastion",
};

pub struct ClusterReconciler<'a> {
    services: &'a Services,
}

impl<'a> ClusterReconciler<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    /// Run one pass; `machines` are consulted to defer deletion
    #[tracing::instrument(skip_all, fields(cluster = %cluster.name(), uid = %cluster.uid()))]
    pub async fn reconcile(&self, cluster: &mut Cluster, machines: &[Machine]) -> Result<Outcome> {
        if cluster.metadata.deletion_requested {
            self.reconcile_delete(cluster, machines).await
        } else {
            self.reconcile_normal(cluster).await
        }
    }

    async fn reconcile_normal(&self, cluster: &mut Cluster) -> Result<Outcome> {
        let s = self.services;
        tracing::debug!(generation = cluster.metadata.generation, "Reconciling cluster");

        let result = net::reconcile(s, cluster).await;
        NET.settle(s, cluster, result)?;

        let result = subnet::reconcile(s, cluster).await;
        SUBNETS.settle(s, cluster, result)?;

        let result = internet_service::reconcile(s, cluster).await;
        INTERNET_SERVICE.settle(s, cluster, result)?;

        let result = route_table::reconcile(s, cluster, RoutePass::PublicOnly).await;
        ROUTE_TABLES.settle(s, cluster, result)?;

        let result = nat_service::reconcile(s, cluster).await;
        NAT_SERVICES.settle(s, cluster, result)?;

        let result = route_table::reconcile(s, cluster, RoutePass::Full).await;
        ROUTE_TABLES.settle(s, cluster, result)?;

        let result = net_peering::reconcile(s, cluster).await;
        NET_PEERING.settle(s, cluster, result)?;

        let result = net_peering::reconcile_routes(s, cluster).await;
        NET_PEERING.settle(s, cluster, result)?;

        let result = net_access_point::reconcile(s, cluster).await;
        NET_ACCESS_POINTS.settle(s, cluster, result)?;

        let result = security_group::reconcile(s, cluster).await;
        SECURITY_GROUPS.settle(s, cluster, result)?;

        let result = load_balancer::reconcile(s, cluster).await;
        LOAD_BALANCER.settle(s, cluster, result)?;

        let result = bastion::reconcile(s, cluster).await;
        let outcome = BASTION.settle(s, cluster, result)?;
        if !outcome.is_done() {
            return Ok(outcome);
        }

        if !cluster.status.ready {
            tracing::info!("Cluster infrastructure is ready");
            s.recorder
                .normal(&object_ref(cluster), "ClusterReady", "Cluster infrastructure is ready");
        }
        cluster.status.ready = true;
        Ok(Outcome::Done)
    }

    async fn reconcile_delete(&self, cluster: &mut Cluster, machines: &[Machine]) -> Result<Outcome> {
        let s = self.services;
        let remaining = machines
            .iter()
            .filter(|m| m.spec.cluster_name == cluster.name())
            .count();
        if remaining > 0 {
            let delay = s.config.deletion_requeue();
            tracing::info!(remaining, ?delay, "Machines still exist, deferring cluster deletion");
            return Ok(Outcome::Requeue(delay));
        }
        tracing::info!("Deleting cluster infrastructure");

        let result = bastion::delete(s, cluster).await;
        BASTION.settle_delete(s, cluster, result)?;

        let result = load_balancer::delete(s, cluster).await;
        LOAD_BALANCER.settle_delete(s, cluster, result)?;

        let result = security_group::delete(s, cluster).await;
        SECURITY_GROUPS.settle_delete(s, cluster, result)?;

        let result = net_access_point::delete(s, cluster).await;
        NET_ACCESS_POINTS.settle_delete(s, cluster, result)?;

        let result = net_peering::delete_routes(s, cluster).await;
        NET_PEERING.settle_delete(s, cluster, result)?;

        let result = net_peering::delete(s, cluster).await;
        NET_PEERING.settle_delete(s, cluster, result)?;

        let result = route_table::delete(s, cluster).await;
        ROUTE_TABLES.settle_delete(s, cluster, result)?;

        let result = nat_service::delete(s, cluster).await;
        NAT_SERVICES.settle_delete(s, cluster, result)?;

        let result = public_ip::delete(s, cluster).await;
        PUBLIC_IPS.settle_delete(s, cluster, result)?;

        let result = internet_service::delete(s, cluster).await;
        INTERNET_SERVICE.settle_delete(s, cluster, result)?;

        let result = subnet::delete(s, cluster).await;
        SUBNETS.settle_delete(s, cluster, result)?;

        let result = net::delete(s, cluster).await;
        NET.settle_delete(s, cluster, result)?;

        cluster.status.reconcilers.clear();
        cluster.status.ready = false;
        cluster.status.control_plane_endpoint = None;
        cluster.status.bastion_state = None;
        s.recorder
            .normal(&object_ref(cluster), "ClusterDeleted", "Cluster infrastructure deleted");
        Ok(Outcome::Done)
    }
}
