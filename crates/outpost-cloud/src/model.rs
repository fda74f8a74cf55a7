//! Provider-side resource representations
//!
//! These mirror what the provider API returns. Identifiers are opaque strings.

use crate::tag::{self, Tag};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Virtual network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub net_id: String,
    pub ip_range: String,
    pub state: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub subnet_id: String,
    pub net_id: String,
    pub ip_range: String,
    pub subregion_name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Internet gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetService {
    pub internet_service_id: String,
    /// Net the gateway is linked to, if any
    pub net_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub route_table_id: String,
    pub net_id: String,
    #[serde(default)]
    pub links: Vec<RouteTableLink>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl RouteTable {
    pub fn is_linked_to(&self, subnet_id: &str) -> bool {
        self.links.iter().any(|l| l.subnet_id == subnet_id)
    }

    pub fn has_route_to(&self, destination: &str) -> bool {
        self.routes
            .iter()
            .any(|r| r.destination_ip_range == destination)
    }

    /// Routes whose target is the given net peering
    pub fn peering_routes<'a>(&'a self, net_peering_id: &'a str) -> impl Iterator<Item = &'a Route> {
        self.routes.iter().filter(move |r| {
            matches!(&r.target, RouteTarget::NetPeering(id) if id == net_peering_id)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTableLink {
    pub link_route_table_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub destination_ip_range: String,
    pub target: RouteTarget,
}

/// What a route points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RouteTarget {
    Gateway(String),
    Nat(String),
    NetPeering(String),
}

impl RouteTarget {
    pub fn id(&self) -> &str {
        match self {
            RouteTarget::Gateway(id) | RouteTarget::Nat(id) | RouteTarget::NetPeering(id) => id,
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Gateway(id) => write!(f, "gateway {}", id),
            RouteTarget::Nat(id) => write!(f, "nat {}", id),
            RouteTarget::NetPeering(id) => write!(f, "netPeering {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatService {
    pub nat_service_id: String,
    pub net_id: String,
    pub subnet_id: String,
    pub state: String,
    pub client_token: String,
    #[serde(default)]
    pub public_ips: Vec<NatPublicIp>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatPublicIp {
    pub public_ip_id: String,
    pub public_ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIp {
    pub public_ip_id: String,
    pub public_ip: String,
    /// Link identifier when attached to a VM, NIC or NAT service
    pub link_public_ip_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl PublicIp {
    pub fn is_attached(&self) -> bool {
        self.link_public_ip_id.is_some()
    }

    /// Name of the shared pool this address belongs to
    pub fn pool(&self) -> Option<&str> {
        tag::tag_value(tag::POOL_KEY, &self.tags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flow {
    Inbound,
    Outbound,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Inbound => f.write_str("Inbound"),
            Flow::Outbound => f.write_str("Outbound"),
        }
    }
}

/// A rule as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub flow: Flow,
    pub ip_protocol: String,
    pub from_port_range: i32,
    pub to_port_range: i32,
    #[serde(default)]
    pub ip_ranges: Vec<String>,
    #[serde(default)]
    pub security_groups_members: Vec<String>,
}

impl SecurityGroupRule {
    pub fn same_ports(&self, protocol: &str, from: i32, to: i32) -> bool {
        self.ip_protocol == protocol && self.from_port_range == from && self.to_port_range == to
    }
}

/// A single rule addressed by create/delete calls: either one IP range or
/// one member security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRequest {
    pub flow: Flow,
    pub ip_protocol: String,
    pub from_port_range: i32,
    pub to_port_range: i32,
    pub ip_range: Option<String>,
    pub member_security_group_id: Option<String>,
}

impl RuleRequest {
    pub fn ip_range(
        flow: Flow,
        protocol: impl Into<String>,
        from: i32,
        to: i32,
        ip_range: impl Into<String>,
    ) -> Self {
        Self {
            flow,
            ip_protocol: protocol.into(),
            from_port_range: from,
            to_port_range: to,
            ip_range: Some(ip_range.into()),
            member_security_group_id: None,
        }
    }

    pub fn member(
        flow: Flow,
        protocol: impl Into<String>,
        from: i32,
        to: i32,
        security_group_id: impl Into<String>,
    ) -> Self {
        Self {
            flow,
            ip_protocol: protocol.into(),
            from_port_range: from,
            to_port_range: to,
            ip_range: None,
            member_security_group_id: Some(security_group_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub security_group_id: String,
    pub security_group_name: String,
    pub description: String,
    pub net_id: String,
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl SecurityGroup {
    pub fn rules(&self, flow: Flow) -> impl Iterator<Item = &SecurityGroupRule> {
        self.rules.iter().filter(move |r| r.flow == flow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub backend_port: i32,
    pub backend_protocol: String,
    pub load_balancer_port: i32,
    pub load_balancer_protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub check_interval: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
    pub port: i32,
    pub protocol: String,
    pub timeout: i32,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub load_balancer_name: String,
    pub dns_name: String,
    pub load_balancer_type: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub backend_vm_ids: Vec<String>,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRequest {
    pub name: String,
    pub load_balancer_type: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub listener: Listener,
    pub tags: Vec<Tag>,
}

/// VM lifecycle as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VmState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Deleted,
}

impl VmState {
    /// Terminal states, treated as already gone on deletion
    pub fn is_gone(&self) -> bool {
        matches!(self, VmState::Terminated | VmState::Deleted)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Pending => "pending",
            VmState::Running => "running",
            VmState::Stopping => "stopping",
            VmState::Stopped => "stopped",
            VmState::ShuttingDown => "shutting-down",
            VmState::Terminated => "terminated",
            VmState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub vm_id: String,
    pub state: VmState,
    pub subnet_id: String,
    pub vm_type: String,
    pub image_id: String,
    pub client_token: String,
    pub private_ip: Option<String>,
    pub private_dns_name: Option<String>,
    pub public_ip: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRequest {
    pub name: String,
    pub client_token: String,
    pub image_id: String,
    pub vm_type: String,
    pub keypair_name: Option<String>,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub private_ips: Vec<String>,
    pub user_data: Option<String>,
    pub tags: Vec<Tag>,
}

/// Block storage lifecycle as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Error,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeState::Creating => "creating",
            VolumeState::Available => "available",
            VolumeState::InUse => "in-use",
            VolumeState::Deleting => "deleting",
            VolumeState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: String,
    pub state: VolumeState,
    pub size: u32,
    pub volume_type: String,
    pub iops: Option<u32>,
    pub subregion_name: String,
    /// VM the volume is linked to, with the device it shows up as
    pub linked_vm_id: Option<String>,
    pub device_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    pub size: u32,
    pub volume_type: String,
    pub iops: Option<u32>,
    pub subregion_name: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub keypair_name: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub image_id: String,
    pub image_name: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetPeeringState {
    PendingAcceptance,
    Active,
    Rejected,
    Failed,
    Expired,
    Deleting,
    Deleted,
}

impl NetPeeringState {
    /// States in which the peering still exists and must be removed
    pub fn is_live(&self) -> bool {
        matches!(self, NetPeeringState::PendingAcceptance | NetPeeringState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetPeering {
    pub net_peering_id: String,
    pub state: NetPeeringState,
    pub source_net_id: String,
    pub accepter_net_id: String,
    pub accepter_account_id: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Private endpoint to a regional provider service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetAccessPoint {
    pub net_access_point_id: String,
    pub net_id: String,
    pub service_name: String,
    #[serde(default)]
    pub route_table_ids: Vec<String>,
    pub state: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Provider service name for a regional service (`com.outscale.<region>.<service>`)
pub fn net_access_point_service_name(region: &str, service: &str) -> String {
    format!("com.outscale.{}.{}", region, service)
}
