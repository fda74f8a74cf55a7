//! Network spec of a cluster
//!
//! Every section is optional. Empty sections are filled with derived
//! defaults by the accessors in [`crate::scope`].

use outpost_cloud::{Flow, HealthCheck, Listener};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a subnet or security group plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    LoadBalancer,
    Bastion,
    Nat,
    Worker,
    ControlPlane,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::LoadBalancer => "loadbalancer",
            Role::Bastion => "bastion",
            Role::Nat => "nat",
            Role::Worker => "worker",
            Role::ControlPlane => "controlplane",
        }
    }

    /// Roles that make a subnet internet-facing
    pub fn is_public(&self) -> bool {
        matches!(self, Role::LoadBalancer | Role::Bastion | Role::Nat)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetSpec {
    pub name: String,
    pub ip_range: String,
    /// Pinned provider id
    pub resource_id: Option<String>,
}

impl NetSpec {
    pub fn is_zero(&self) -> bool {
        self.name.is_empty() && self.ip_range.is_empty() && self.resource_id.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetSpec {
    pub name: String,
    pub ip_range: String,
    pub subregion_name: String,
    pub roles: Vec<Role>,
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternetServiceSpec {
    pub name: String,
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatServiceSpec {
    pub name: String,
    pub subnet_name: String,
    pub subregion_name: String,
    pub resource_id: Option<String>,
}

/// What a declared route points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTargetKind {
    Gateway,
    Nat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub destination: String,
    pub target: RouteTargetKind,
}

/// A route table and the subnets it serves
///
/// When `subnets` is empty the table serves every subnet carrying `role`
/// in `subregion_name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTableSpec {
    pub name: String,
    pub subregion_name: String,
    pub role: Option<Role>,
    pub subnets: Vec<String>,
    pub routes: Vec<RouteSpec>,
}

impl RouteTableSpec {
    /// Tables routing to the internet service
    pub fn is_public(&self) -> bool {
        self.routes
            .iter()
            .any(|r| r.target == RouteTargetKind::Gateway)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRuleSpec {
    pub flow: Flow,
    pub ip_protocol: String,
    pub from_port_range: i32,
    pub to_port_range: i32,
    #[serde(default)]
    pub ip_ranges: Vec<String>,
}

impl SecurityGroupRuleSpec {
    pub fn new(
        flow: Flow,
        ip_protocol: &str,
        from_port_range: i32,
        to_port_range: i32,
        ip_ranges: Vec<String>,
    ) -> Self {
        Self {
            flow,
            ip_protocol: ip_protocol.to_string(),
            from_port_range,
            to_port_range,
            ip_ranges,
        }
    }

    pub fn inbound(ip_protocol: &str, from: i32, to: i32, ip_ranges: Vec<String>) -> Self {
        Self::new(Flow::Inbound, ip_protocol, from, to, ip_ranges)
    }

    pub fn outbound(ip_protocol: &str, from: i32, to: i32, ip_ranges: Vec<String>) -> Self {
        Self::new(Flow::Outbound, ip_protocol, from, to, ip_ranges)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: String,
    pub roles: Vec<Role>,
    pub rules: Vec<SecurityGroupRuleSpec>,
    /// Marks the group the cloud controller manager attaches to load balancers
    pub main: bool,
    /// Rules absent from the declared ones are removed from the provider group
    pub authoritative: bool,
    pub resource_id: Option<String>,
}

impl SecurityGroupSpec {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Extra rules appended to the default group whose roles match exactly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdditionalRules {
    pub roles: Vec<Role>,
    pub rules: Vec<SecurityGroupRuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub load_balancer_type: String,
    pub subnet_name: String,
    pub security_group_name: String,
    pub listener: Listener,
    pub health_check: HealthCheck,
}

impl Default for LoadBalancerSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            load_balancer_type: "internet-facing".to_string(),
            subnet_name: String::new(),
            security_group_name: String::new(),
            listener: Listener {
                backend_port: 6443,
                backend_protocol: "TCP".to_string(),
                load_balancer_port: 6443,
                load_balancer_protocol: "TCP".to_string(),
            },
            health_check: HealthCheck {
                check_interval: 5,
                healthy_threshold: 5,
                unhealthy_threshold: 2,
                port: 6443,
                protocol: "TCP".to_string(),
                timeout: 5,
                path: None,
            },
        }
    }
}

/// Image reference: an explicit id, or a name optionally restricted to an account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpec {
    pub id: String,
    pub name: String,
    pub account_id: String,
    /// Restrict name lookups to the account publishing open source images in the region
    pub outscale_open_source: bool,
}

/// Accounts publishing open source images, per region
pub const OPEN_SOURCE_IMAGE_ACCOUNTS: &[(&str, &str)] = &[
    ("eu-west-2", "671899555720"),
    ("us-east-2", "852047997530"),
    ("cloudgouv-eu-west-1", "545146734248"),
];

impl ImageSpec {
    /// Account filter for name lookups in `region`
    pub fn account_filter(&self, region: &str) -> Option<String> {
        if self.outscale_open_source {
            return OPEN_SOURCE_IMAGE_ACCOUNTS
                .iter()
                .find(|(r, _)| *r == region)
                .map(|(_, account)| account.to_string());
        }
        (!self.account_id.is_empty()).then(|| self.account_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionSpec {
    pub enable: bool,
    pub name: String,
    pub vm_type: String,
    pub image: ImageSpec,
    pub keypair_name: String,
    pub subnet_name: String,
    pub subregion_name: String,
    pub security_group_names: Vec<String>,
    pub private_ips: Vec<String>,
    /// Pinned public IP id
    pub public_ip_id: Option<String>,
    pub resource_id: Option<String>,
}

impl Default for BastionSpec {
    fn default() -> Self {
        Self {
            enable: false,
            name: String::new(),
            vm_type: "tinav3.c2r2p1".to_string(),
            image: ImageSpec::default(),
            keypair_name: String::new(),
            subnet_name: String::new(),
            subregion_name: String::new(),
            security_group_names: Vec::new(),
            private_ips: Vec::new(),
            public_ip_id: None,
            resource_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetPeeringSpec {
    pub enable: bool,
    /// Falls back to the controller's management metadata when empty
    pub management_account_id: String,
    pub management_net_id: String,
    /// Restrict management routes to the table linked to this subnet
    pub management_subnet_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UseExisting {
    pub net: bool,
    pub security_groups: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disable {
    pub internet: bool,
    pub load_balancer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    pub net: NetSpec,
    pub subregion_name: String,
    pub subregions: Vec<String>,
    pub subnets: Vec<SubnetSpec>,
    pub internet_service: InternetServiceSpec,
    pub nat_services: Vec<NatServiceSpec>,
    pub route_tables: Vec<RouteTableSpec>,
    pub security_groups: Vec<SecurityGroupSpec>,
    pub additional_security_rules: Vec<AdditionalRules>,
    pub load_balancer: LoadBalancerSpec,
    pub bastion: BastionSpec,
    pub net_peering: NetPeeringSpec,
    /// Regional services reachable through net access points (`api`, `oos`, ...)
    pub net_access_points: Vec<String>,
    pub allow_from_ip_ranges: Vec<String>,
    pub allow_to_ip_ranges: Vec<String>,
    pub use_existing: UseExisting,
    pub disable: Disable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde() {
        let role: Role = serde_json::from_str("\"controlplane\"").unwrap();
        assert_eq!(role, Role::ControlPlane);
        assert_eq!(serde_json::to_string(&Role::LoadBalancer).unwrap(), "\"loadbalancer\"");
        assert!(Role::Nat.is_public());
        assert!(!Role::Worker.is_public());
    }

    #[test]
    fn test_image_account_filter() {
        let image = ImageSpec {
            name: "ubuntu-2204".into(),
            outscale_open_source: true,
            ..Default::default()
        };
        assert_eq!(image.account_filter("eu-west-2").as_deref(), Some("671899555720"));
        assert_eq!(image.account_filter("ap-northeast-1"), None);

        let pinned = ImageSpec {
            name: "custom".into(),
            account_id: "123".into(),
            ..Default::default()
        };
        assert_eq!(pinned.account_filter("eu-west-2").as_deref(), Some("123"));
    }

    #[test]
    fn test_empty_network_spec_deserializes() {
        let network: NetworkSpec = serde_json::from_str("{}").unwrap();
        assert!(network.net.is_zero());
        assert_eq!(network.load_balancer.listener.backend_port, 6443);
        assert!(!network.bastion.enable);
    }
}
