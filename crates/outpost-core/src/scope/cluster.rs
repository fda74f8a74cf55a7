//! Derived cluster layout
//!
//! Sections left empty in the network spec are derived here: the net, its
//! subnets, NAT services, route tables and security groups, along with the
//! provider-side names and client tokens of each resource.

use super::{client_token, parse_ipv4_cidr};
use crate::error::{CoreError, Result};
use crate::model::{
    Cluster, LoadBalancerSpec, NatServiceSpec, NetSpec, Role, RouteSpec, RouteTableSpec,
    RouteTargetKind, SecurityGroupRuleSpec, SecurityGroupSpec, SubnetSpec,
};
use crate::status::Reconciler;
use std::net::Ipv4Addr;

/// Default net CIDR
pub const DEFAULT_NET_IP_RANGE: &str = "10.0.0.0/16";

/// Destination of default routes
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Kubernetes API port, exposed by the load balancer
pub const API_PORT: i32 = 6443;

const PUBLIC_ROLES: [Role; 3] = [Role::LoadBalancer, Role::Bastion, Role::Nat];

impl Cluster {
    pub fn net_spec(&self) -> NetSpec {
        let mut net = self.network().net.clone();
        if net.ip_range.is_empty() {
            net.ip_range = DEFAULT_NET_IP_RANGE.to_string();
        }
        net
    }

    pub fn net_name(&self) -> String {
        let name = &self.network().net.name;
        if !name.is_empty() {
            return name.clone();
        }
        format!("Net for {}", self.name())
    }

    pub fn subregions(&self) -> Vec<String> {
        let network = self.network();
        if !network.subregions.is_empty() {
            return network.subregions.clone();
        }
        vec![network.subregion_name.clone()]
    }

    pub fn default_subregion(&self) -> String {
        self.subregions().into_iter().next().unwrap_or_default()
    }

    /// Declared subnets, or three /24 subnets per subregion carved from the net
    pub fn subnets(&self) -> Result<Vec<SubnetSpec>> {
        if !self.network().subnets.is_empty() {
            return Ok(self.network().subnets.clone());
        }
        let ip_range = self.net_spec().ip_range;
        let (base, _) = parse_ipv4_cidr(&ip_range)?;
        let [a, b, mut c, _] = base.octets();
        c = c.wrapping_add(1);

        let layout: [&[Role]; 3] = [&PUBLIC_ROLES, &[Role::Worker], &[Role::ControlPlane]];
        let mut subnets = Vec::new();
        for subregion in self.subregions() {
            for roles in layout {
                c = c
                    .checked_add(1)
                    .ok_or_else(|| CoreError::InvalidCidr(ip_range.clone()))?;
                subnets.push(SubnetSpec {
                    ip_range: format!("{}/24", Ipv4Addr::new(a, b, c, 0)),
                    roles: roles.to_vec(),
                    subregion_name: subregion.clone(),
                    ..Default::default()
                });
            }
        }
        Ok(subnets)
    }

    /// First subnet either named `name` or carrying `role` in `subregion`
    ///
    /// An unknown name does not fail the lookup: the role match still applies.
    pub fn find_subnet(&self, name: &str, role: Role, subregion: &str) -> Result<SubnetSpec> {
        let subregion = if subregion.is_empty() {
            self.default_subregion()
        } else {
            subregion.to_string()
        };
        for spec in self.subnets()? {
            if !name.is_empty() && spec.name == name {
                return Ok(spec);
            }
            if self.subnet_has_role(&spec, role) && self.subnet_subregion(&spec) == subregion {
                return Ok(spec);
            }
        }
        Err(CoreError::UnknownSubnet(format!("{} ({}/{})", name, role, subregion)))
    }

    /// Subnets declared without roles fall back to name-based guesses
    pub fn subnet_has_role(&self, spec: &SubnetSpec, role: Role) -> bool {
        if !spec.roles.is_empty() {
            return spec.roles.contains(&role);
        }
        if spec.name.contains("kcp") {
            return role == Role::ControlPlane;
        }
        let lb_subnet = &self.network().load_balancer.subnet_name;
        if !lb_subnet.is_empty() && &spec.name == lb_subnet {
            return role.is_public();
        }
        role == Role::Worker
    }

    pub fn subnet_is_public(&self, spec: &SubnetSpec) -> bool {
        PUBLIC_ROLES.iter().any(|r| self.subnet_has_role(spec, *r))
    }

    pub fn subnet_subregion(&self, spec: &SubnetSpec) -> String {
        if !spec.subregion_name.is_empty() {
            return spec.subregion_name.clone();
        }
        self.default_subregion()
    }

    pub fn subnet_name(&self, spec: &SubnetSpec) -> String {
        if !spec.name.is_empty() {
            return spec.name.clone();
        }
        let subregion = self.subnet_subregion(spec);
        let kind = if self.subnet_is_public(spec) {
            "Public subnet"
        } else if self.subnet_has_role(spec, Role::ControlPlane) {
            "Controlplane subnet"
        } else if self.subnet_has_role(spec, Role::Worker) {
            "Worker subnet"
        } else {
            "Subnet"
        };
        format!("{} for {}/{}", kind, self.name(), subregion)
    }

    pub fn internet_service_name(&self) -> String {
        let name = &self.network().internet_service.name;
        if !name.is_empty() {
            return name.clone();
        }
        format!("Internet Service for {}", self.name())
    }

    /// Declared NAT services, or one per subnet carrying the `nat` role
    pub fn nat_services(&self) -> Result<Vec<NatServiceSpec>> {
        let network = self.network();
        if network.use_existing.net || network.disable.internet {
            return Ok(Vec::new());
        }
        if !network.nat_services.is_empty() {
            return Ok(network.nat_services.clone());
        }
        Ok(self
            .subnets()?
            .iter()
            .filter(|s| self.subnet_has_role(s, Role::Nat))
            .map(|s| NatServiceSpec {
                subregion_name: self.subnet_subregion(s),
                subnet_name: s.name.clone(),
                ..Default::default()
            })
            .collect())
    }

    /// NAT service by name, or the one serving `subregion`
    pub fn find_nat_service(&self, name: &str, subregion: &str) -> Result<NatServiceSpec> {
        let nats = self.nat_services()?;
        if nats.len() == 1 {
            return Ok(nats[0].clone());
        }
        for mut spec in nats {
            if spec.subregion_name.is_empty() {
                spec.subregion_name = self.default_subregion();
            }
            if !name.is_empty() && spec.name == name {
                return Ok(spec);
            }
            if subregion.is_empty() || spec.subregion_name == subregion {
                return Ok(spec);
            }
        }
        Err(CoreError::UnknownNatService(format!("{} ({})", name, subregion)))
    }

    pub fn nat_service_name(&self, nat: &NatServiceSpec) -> String {
        if !nat.name.is_empty() {
            return nat.name.clone();
        }
        let mut name = format!("Nat service for {}", self.name());
        if !nat.subregion_name.is_empty() {
            name.push('/');
            name.push_str(&nat.subregion_name);
        }
        name
    }

    /// Idempotency token of a NAT service creation
    pub fn nat_service_client_token(&self, nat: &NatServiceSpec) -> String {
        if !nat.name.is_empty() {
            return client_token(&nat.name, self.uid());
        }
        format!("{}-{}", nat.subregion_name, self.uid())
    }

    /// Subnet a NAT service lives in
    pub fn nat_service_subnet(&self, nat: &NatServiceSpec) -> Result<SubnetSpec> {
        self.find_subnet(&nat.subnet_name, Role::Nat, &nat.subregion_name)
    }

    /// Declared route tables, or one per subnet
    pub fn route_tables(&self) -> Result<Vec<RouteTableSpec>> {
        if !self.network().route_tables.is_empty() {
            return Ok(self.network().route_tables.clone());
        }
        let internet = !self.network().disable.internet;
        let tables = self
            .subnets()?
            .iter()
            .map(|subnet| {
                let target = if self.subnet_is_public(subnet) {
                    RouteTargetKind::Gateway
                } else {
                    RouteTargetKind::Nat
                };
                RouteTableSpec {
                    name: self.subnet_name(subnet),
                    subregion_name: self.subnet_subregion(subnet),
                    role: subnet.roles.first().copied(),
                    subnets: if subnet.name.is_empty() {
                        Vec::new()
                    } else {
                        vec![subnet.name.clone()]
                    },
                    routes: if internet {
                        vec![RouteSpec {
                            destination: DEFAULT_ROUTE.to_string(),
                            target,
                        }]
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect();
        Ok(tables)
    }

    /// Subnets served by a route table
    pub fn route_table_subnets(&self, table: &RouteTableSpec) -> Result<Vec<SubnetSpec>> {
        let subnets = self.subnets()?;
        if !table.subnets.is_empty() {
            return table
                .subnets
                .iter()
                .map(|name| {
                    subnets
                        .iter()
                        .find(|s| &s.name == name)
                        .cloned()
                        .ok_or_else(|| CoreError::UnknownSubnet(name.clone()))
                })
                .collect();
        }
        let Some(role) = table.role else {
            return Ok(Vec::new());
        };
        let subregion = if table.subregion_name.is_empty() {
            self.default_subregion()
        } else {
            table.subregion_name.clone()
        };
        Ok(subnets
            .into_iter()
            .filter(|s| self.subnet_has_role(s, role) && self.subnet_subregion(s) == subregion)
            .collect())
    }

    /// Whether inbound traffic is restricted to `allow_from_ip_ranges`
    pub fn has_ip_restriction(&self) -> bool {
        !self.network().allow_from_ip_ranges.is_empty()
    }

    fn additional_rules(&self, roles: &[Role]) -> Vec<SecurityGroupRuleSpec> {
        self.network()
            .additional_security_rules
            .iter()
            .find(|ar| ar.roles == roles)
            .map(|ar| ar.rules.clone())
            .unwrap_or_default()
    }

    /// Declared security groups, or the default lb/worker/controlplane/node
    /// groups (plus bastion when enabled)
    pub fn security_groups(&self) -> Result<Vec<SecurityGroupSpec>> {
        if !self.network().security_groups.is_empty() {
            return Ok(self.network().security_groups.clone());
        }
        let name = self.name();
        let net_range = self.net_spec().ip_range;

        let mut all_private = Vec::new();
        let mut controlplane_ranges = Vec::new();
        let mut bastion_ranges = Vec::new();
        for subnet in self.subnets()? {
            if self.subnet_has_role(&subnet, Role::Bastion) {
                bastion_ranges.push(subnet.ip_range.clone());
            }
            if self.subnet_is_public(&subnet) {
                continue;
            }
            if self.subnet_has_role(&subnet, Role::ControlPlane) {
                controlplane_ranges.push(subnet.ip_range.clone());
            }
            all_private.push(subnet.ip_range);
        }

        let mut allowed_in = self.network().allow_from_ip_ranges.clone();
        if allowed_in.is_empty() {
            allowed_in = vec![DEFAULT_ROUTE.to_string()];
        }
        let allowed_out = match self.network().allow_to_ip_ranges.as_slice() {
            [] => vec![DEFAULT_ROUTE.to_string()],
            [first, ..] if first.is_empty() => Vec::new(),
            ranges => ranges.to_vec(),
        };
        let net = || vec![net_range.clone()];

        let mut lb = SecurityGroupSpec {
            name: format!("{}-lb", name),
            description: format!("LB securityGroup for {}", name),
            roles: vec![Role::LoadBalancer],
            rules: vec![
                SecurityGroupRuleSpec::inbound("tcp", API_PORT, API_PORT, allowed_in.clone()),
                SecurityGroupRuleSpec::outbound("tcp", API_PORT, API_PORT, controlplane_ranges.clone()),
            ],
            authoritative: true,
            ..Default::default()
        };
        lb.rules.extend(self.additional_rules(&[Role::LoadBalancer]));

        let mut worker = SecurityGroupSpec {
            name: format!("{}-worker", name),
            description: format!("Worker securityGroup for {}", name),
            roles: vec![Role::Worker],
            rules: vec![
                SecurityGroupRuleSpec::inbound("tcp", 30000, 32767, all_private.clone()),
                SecurityGroupRuleSpec::inbound("tcp", 10250, 10250, all_private.clone()),
            ],
            authoritative: true,
            ..Default::default()
        };
        worker.rules.extend(self.additional_rules(&[Role::Worker]));

        let mut controlplane = SecurityGroupSpec {
            name: format!("{}-controlplane", name),
            description: format!("Controlplane securityGroup for {}", name),
            roles: vec![Role::ControlPlane],
            rules: vec![
                SecurityGroupRuleSpec::inbound("tcp", API_PORT, API_PORT, net()),
                SecurityGroupRuleSpec::inbound("tcp", 30000, 32767, all_private.clone()),
                SecurityGroupRuleSpec::inbound("tcp", 2378, 2380, controlplane_ranges.clone()),
                SecurityGroupRuleSpec::inbound("tcp", 10250, 10252, controlplane_ranges.clone()),
            ],
            authoritative: true,
            ..Default::default()
        };
        controlplane
            .rules
            .extend(self.additional_rules(&[Role::ControlPlane]));

        // ICMP, BGP, Calico VXLAN, Typha, WireGuard, Flannel, Flannel VXLAN, Cilium health and hubble
        let mut node = SecurityGroupSpec {
            name: format!("{}-node", name),
            description: format!("Node securityGroup for {}", name),
            roles: vec![Role::ControlPlane, Role::Worker],
            rules: vec![
                SecurityGroupRuleSpec::inbound("icmp", 8, 8, net()),
                SecurityGroupRuleSpec::inbound("tcp", 179, 179, net()),
                SecurityGroupRuleSpec::inbound("udp", 4789, 4789, net()),
                SecurityGroupRuleSpec::inbound("udp", 5473, 5473, net()),
                SecurityGroupRuleSpec::inbound("udp", 51820, 51821, net()),
                SecurityGroupRuleSpec::inbound("udp", 8285, 8285, net()),
                SecurityGroupRuleSpec::inbound("udp", 8472, 8472, net()),
                SecurityGroupRuleSpec::inbound("tcp", 4240, 4240, net()),
                SecurityGroupRuleSpec::inbound("tcp", 4244, 4244, net()),
            ],
            main: true,
            authoritative: true,
            ..Default::default()
        };
        if !allowed_out.is_empty() {
            node.rules
                .push(SecurityGroupRuleSpec::outbound("-1", -1, -1, allowed_out.clone()));
        }
        node.rules
            .extend(self.additional_rules(&[Role::ControlPlane, Role::Worker]));

        if !self.network().bastion.enable {
            return Ok(vec![lb, worker, controlplane, node]);
        }

        node.rules
            .push(SecurityGroupRuleSpec::inbound("tcp", 22, 22, bastion_ranges));
        let mut bastion = SecurityGroupSpec {
            name: format!("{}-bastion", name),
            description: format!("Bastion securityGroup for {}", name),
            roles: vec![Role::Bastion],
            rules: vec![
                SecurityGroupRuleSpec::inbound("tcp", 22, 22, allowed_in),
                SecurityGroupRuleSpec::outbound("tcp", 22, 22, net()),
            ],
            authoritative: true,
            ..Default::default()
        };
        if !allowed_out.is_empty() {
            bastion
                .rules
                .push(SecurityGroupRuleSpec::outbound("-1", -1, -1, allowed_out));
        }
        bastion.rules.extend(self.additional_rules(&[Role::Bastion]));

        Ok(vec![lb, worker, controlplane, node, bastion])
    }

    /// Groups named in `names`, or every group carrying `role`
    pub fn security_groups_for(&self, names: &[String], role: Role) -> Result<Vec<SecurityGroupSpec>> {
        let all = self.security_groups()?;
        if names.is_empty() {
            return Ok(all.into_iter().filter(|sg| sg.has_role(role)).collect());
        }
        names
            .iter()
            .map(|name| {
                all.iter()
                    .find(|sg| &sg.name == name)
                    .cloned()
                    .ok_or_else(|| CoreError::UnknownSecurityGroup(name.clone()))
            })
            .collect()
    }

    /// Provider-side name of a security group
    pub fn security_group_name(&self, sg: &SecurityGroupSpec) -> String {
        if !sg.name.is_empty() {
            return format!("{}-{}", sg.name, self.uid());
        }
        let mut name = format!("{}-", self.name());
        for role in &sg.roles {
            name.push_str(role.as_str());
            name.push('-');
        }
        name.push_str(self.uid());
        name
    }

    /// Key of a security group in the resource map
    pub fn security_group_key(&self, sg: &SecurityGroupSpec) -> String {
        if !sg.name.is_empty() {
            return sg.name.clone();
        }
        self.security_group_name(sg)
    }

    pub fn load_balancer(&self) -> LoadBalancerSpec {
        let mut lb = self.network().load_balancer.clone();
        if lb.name.is_empty() {
            lb.name = format!("{}-k8s", self.name());
        }
        lb
    }

    pub fn load_balancer_subnet(&self) -> Result<SubnetSpec> {
        let lb = self.load_balancer();
        self.find_subnet(&lb.subnet_name, Role::LoadBalancer, "")
    }

    pub fn load_balancer_security_group(&self) -> Result<SecurityGroupSpec> {
        let lb = self.load_balancer();
        let names: Vec<String> = if lb.security_group_name.is_empty() {
            Vec::new()
        } else {
            vec![lb.security_group_name]
        };
        self.security_groups_for(&names, Role::LoadBalancer)?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::UnknownSecurityGroup(format!("{} load balancer", self.name())))
    }

    pub fn bastion_name(&self) -> String {
        let name = &self.network().bastion.name;
        if !name.is_empty() {
            return name.clone();
        }
        format!("Bastion for {}", self.name())
    }

    pub fn bastion_client_token(&self) -> String {
        let name = &self.network().bastion.name;
        if !name.is_empty() {
            return client_token(name, self.uid());
        }
        format!("bastion-{}", self.uid())
    }

    pub fn bastion_subnet(&self) -> Result<SubnetSpec> {
        let bastion = &self.network().bastion;
        self.find_subnet(&bastion.subnet_name, Role::Bastion, &bastion.subregion_name)
    }

    pub fn needs_reconciliation(&self, reconciler: Reconciler) -> bool {
        self.status
            .reconcilers
            .needs(reconciler, self.metadata.generation)
    }

    pub fn mark_reconciled(&mut self, reconciler: Reconciler) {
        let generation = self.metadata.generation;
        self.status.reconcilers.mark(reconciler, generation);
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::model::{Cluster, NatServiceSpec, NetworkSpec, Role, RouteTargetKind, SubnetSpec};

    fn cluster(network: NetworkSpec) -> Cluster {
        Cluster::new("demo", "3f1c", network)
    }

    fn single_subregion() -> NetworkSpec {
        NetworkSpec {
            subregion_name: "eu-west-2a".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_subnets() {
        let c = cluster(single_subregion());
        let subnets = c.subnets().unwrap();
        let ranges: Vec<&str> = subnets.iter().map(|s| s.ip_range.as_str()).collect();
        assert_eq!(ranges, vec!["10.0.2.0/24", "10.0.3.0/24", "10.0.4.0/24"]);
        assert!(c.subnet_is_public(&subnets[0]));
        assert!(c.subnet_has_role(&subnets[1], Role::Worker));
        assert!(c.subnet_has_role(&subnets[2], Role::ControlPlane));
        assert_eq!(c.subnet_name(&subnets[0]), "Public subnet for demo/eu-west-2a");
        assert_eq!(c.subnet_name(&subnets[2]), "Controlplane subnet for demo/eu-west-2a");
    }

    #[test]
    fn test_subnets_per_subregion() {
        let c = cluster(NetworkSpec {
            subregions: vec!["eu-west-2a".into(), "eu-west-2b".into()],
            ..Default::default()
        });
        let subnets = c.subnets().unwrap();
        assert_eq!(subnets.len(), 6);
        assert_eq!(subnets[3].ip_range, "10.0.5.0/24");
        assert_eq!(subnets[3].subregion_name, "eu-west-2b");

        let worker = c.find_subnet("", Role::Worker, "eu-west-2b").unwrap();
        assert_eq!(worker.ip_range, "10.0.6.0/24");
    }

    #[test]
    fn test_unknown_subnet_name_falls_back_to_role() {
        let mut network = single_subregion();
        network.subnets = vec![
            SubnetSpec {
                name: "edge-public".into(),
                ip_range: "10.0.2.0/24".into(),
                roles: vec![Role::LoadBalancer, Role::Nat],
                ..Default::default()
            },
            SubnetSpec {
                name: "edge-nodes".into(),
                ip_range: "10.0.3.0/24".into(),
                roles: vec![Role::Worker, Role::ControlPlane],
                ..Default::default()
            },
        ];
        let c = cluster(network);

        let named = c.find_subnet("edge-nodes", Role::Bastion, "").unwrap();
        assert_eq!(named.ip_range, "10.0.3.0/24");
        let fallback = c.find_subnet("gone", Role::Worker, "").unwrap();
        assert_eq!(fallback.name, "edge-nodes");
        let err = c.find_subnet("gone", Role::Bastion, "").unwrap_err();
        assert!(matches!(err, CoreError::UnknownSubnet(_)));
    }

    #[test]
    fn test_default_route_tables() {
        let c = cluster(single_subregion());
        let tables = c.route_tables().unwrap();
        assert_eq!(tables.len(), 3);
        assert!(tables[0].is_public());
        assert_eq!(tables[1].routes[0].target, RouteTargetKind::Nat);
        let served = c.route_table_subnets(&tables[2]).unwrap();
        assert_eq!(served[0].ip_range, "10.0.4.0/24");
    }

    #[test]
    fn test_default_security_groups() {
        let c = cluster(single_subregion());
        let groups = c.security_groups().unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["demo-lb", "demo-worker", "demo-controlplane", "demo-node"]);
        assert!(groups[3].main);
        assert_eq!(groups[0].rules[0].ip_ranges, vec!["0.0.0.0/0"]);
        assert_eq!(groups[0].rules[1].ip_ranges, vec!["10.0.4.0/24"]);
        assert_eq!(c.security_group_name(&groups[0]), "demo-lb-3f1c");

        let for_worker = c.security_groups_for(&[], Role::Worker).unwrap();
        assert_eq!(for_worker.len(), 2);
    }

    #[test]
    fn test_bastion_adds_group_and_ssh_rule() {
        let mut network = single_subregion();
        network.bastion.enable = true;
        let c = cluster(network);
        let groups = c.security_groups().unwrap();
        assert_eq!(groups.len(), 5);
        let node = &groups[3];
        let ssh = node.rules.last().unwrap();
        assert_eq!(ssh.from_port_range, 22);
        assert_eq!(ssh.ip_ranges, vec!["10.0.2.0/24"]);
        assert_eq!(c.bastion_client_token(), "bastion-3f1c");
    }

    #[test]
    fn test_nat_client_token() {
        let c = cluster(single_subregion());
        let nats = c.nat_services().unwrap();
        assert_eq!(nats.len(), 1);
        assert_eq!(c.nat_service_client_token(&nats[0]), "eu-west-2a-3f1c");

        let named = NatServiceSpec {
            name: "x".repeat(70),
            ..Default::default()
        };
        let token = c.nat_service_client_token(&named);
        assert_eq!(token.len(), 64);
        assert!(token.ends_with("-3f1c"));
    }

    #[test]
    fn test_use_existing_net_has_no_nat() {
        let mut network = single_subregion();
        network.use_existing.net = true;
        assert!(cluster(network).nat_services().unwrap().is_empty());
    }

    #[test]
    fn test_load_balancer_defaults() {
        let c = cluster(single_subregion());
        let lb = c.load_balancer();
        assert_eq!(lb.name, "demo-k8s");
        assert_eq!(lb.health_check.port, 6443);
        assert_eq!(c.load_balancer_subnet().unwrap().ip_range, "10.0.2.0/24");
        assert_eq!(c.load_balancer_security_group().unwrap().name, "demo-lb");
    }
}
