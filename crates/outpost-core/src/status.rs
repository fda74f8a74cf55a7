//! Reconciliation status
//!
//! Resource maps record which provider id backs each logical resource,
//! generation markers record which reconciler already converged for the
//! current spec generation, and conditions report per-facet readiness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key used by singleton resources (net, internet service, load balancer, VM, ...)
pub const DEFAULT_KEY: &str = "default";

/// Logical key → provider id for one resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceMap(BTreeMap<String, String>);

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|id| !id.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Record `id` under `key`
    ///
    /// An existing entry is never overwritten with a different id; the
    /// conflicting id is dropped and `false` is returned.
    pub fn track(&mut self, key: &str, id: &str) -> bool {
        match self.get(key) {
            Some(existing) if existing == id => true,
            Some(existing) => {
                tracing::warn!(key, existing, ignored = id, "Refusing to overwrite tracked id");
                false
            }
            None => {
                self.0.insert(key.to_string(), id.to_string());
                true
            }
        }
    }

    /// Overwrite a stale entry, returning the previous id
    pub fn replace(&mut self, key: &str, id: &str) -> Option<String> {
        self.0.insert(key.to_string(), id.to_string())
    }

    pub fn untrack(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resource maps owned by a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterResources {
    pub net: ResourceMap,
    pub subnet: ResourceMap,
    pub internet_service: ResourceMap,
    pub route_table: ResourceMap,
    pub nat_service: ResourceMap,
    pub public_ip: ResourceMap,
    pub security_group: ResourceMap,
    pub load_balancer: ResourceMap,
    pub bastion: ResourceMap,
    pub image: ResourceMap,
    pub net_peering: ResourceMap,
    pub net_access_point: ResourceMap,
}

/// Resource maps owned by a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineResources {
    pub vm: ResourceMap,
    pub volume: ResourceMap,
    pub keypair: ResourceMap,
    pub image: ResourceMap,
    pub public_ip: ResourceMap,
}

/// Reconcilers carrying a generation marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reconciler {
    Net,
    Subnet,
    InternetService,
    RouteTable,
    NatService,
    NetPeering,
    NetPeeringRoutes,
    NetAccessPoint,
    SecurityGroup,
    LoadBalancer,
    Bastion,
    Volume,
    Keypair,
    Vm,
}

/// Last spec generation each reconciler converged for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generations(BTreeMap<Reconciler, i64>);

impl Generations {
    /// A reconciler must run when its marker is below `generation`
    pub fn needs(&self, reconciler: Reconciler, generation: i64) -> bool {
        self.0.get(&reconciler).is_none_or(|g| *g < generation)
    }

    pub fn mark(&mut self, reconciler: Reconciler, generation: i64) {
        self.0.insert(reconciler, generation);
    }

    pub fn get(&self, reconciler: Reconciler) -> Option<i64> {
        self.0.get(&reconciler).copied()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    NetReady,
    SubnetsReady,
    InternetServicesReady,
    NatServicesReady,
    RouteTablesReady,
    NetPeeringReady,
    NetAccessPointsReady,
    SecurityGroupsReady,
    LoadBalancerReady,
    BastionReady,
    VolumeReady,
    VmReady,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn get(&self, kind: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.kind == kind)
    }

    pub fn is_true(&self, kind: ConditionType) -> bool {
        self.get(kind).is_some_and(|c| c.status)
    }

    pub fn mark_true(&mut self, kind: ConditionType) {
        self.set(kind, true, String::new(), String::new());
    }

    pub fn mark_false(&mut self, kind: ConditionType, reason: &str, message: impl Into<String>) {
        self.set(kind, false, reason.to_string(), message.into());
    }

    /// Transition time only moves when the status flips
    fn set(&mut self, kind: ConditionType, status: bool, reason: String, message: String) {
        match self.0.iter_mut().find(|c| c.kind == kind) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Utc::now();
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.0.push(Condition {
                kind,
                status,
                reason,
                message,
                last_transition_time: Utc::now(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }
}
