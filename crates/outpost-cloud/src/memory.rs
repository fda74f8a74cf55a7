//! In-memory cloud
//!
//! A single shared world behind every tenant. Each API call is recorded with
//! the tenant it ran under, so callers can assert on which calls were made and
//! in which order. Deletions follow the provider's dependency rules closely
//! enough to surface ordering mistakes: a net with subnets cannot be deleted,
//! an attached public IP cannot be released, and so on.

use crate::error::{CloudError, Result};
use crate::model::{
    HealthCheck, Image, InternetService, Keypair, LoadBalancer, LoadBalancerRequest, NatPublicIp,
    NatService, Net, NetAccessPoint, NetPeering, NetPeeringState, PublicIp, Route, RouteTable,
    RouteTableLink, RouteTarget, RuleRequest, SecurityGroup, SecurityGroupRule, Subnet, Vm,
    VmRequest, VmState, Volume, VolumeRequest, VolumeState, net_access_point_service_name,
};
use crate::service::{
    Cloud, ImageApi, InternetServiceApi, KeypairApi, LoadBalancerApi, NatServiceApi,
    NetAccessPointApi, NetApi, NetPeeringApi, PublicIpApi, RouteTableApi, SecurityGroupApi,
    SubnetApi, TagApi, VmApi, VolumeApi,
};
use crate::tag::{self, ResourceTag, ResourceType, Tag};
use crate::tenant::Tenant;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub tenant: String,
    pub op: &'static str,
    pub target: String,
}

struct World {
    seq: u64,
    calls: Vec<Call>,
    failures: HashMap<&'static str, CloudError>,
    default_vm_state: VmState,
    nets: BTreeMap<String, Net>,
    subnets: BTreeMap<String, Subnet>,
    internet_services: BTreeMap<String, InternetService>,
    route_tables: BTreeMap<String, RouteTable>,
    nat_services: BTreeMap<String, NatService>,
    public_ips: BTreeMap<String, PublicIp>,
    security_groups: BTreeMap<String, SecurityGroup>,
    load_balancers: BTreeMap<String, LoadBalancer>,
    vms: BTreeMap<String, Vm>,
    volumes: BTreeMap<String, Volume>,
    keypairs: BTreeMap<String, Keypair>,
    images: BTreeMap<String, Image>,
    net_peerings: BTreeMap<String, NetPeering>,
    net_access_points: BTreeMap<String, NetAccessPoint>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            seq: 0,
            calls: Vec::new(),
            failures: HashMap::new(),
            default_vm_state: VmState::Pending,
            nets: BTreeMap::new(),
            subnets: BTreeMap::new(),
            internet_services: BTreeMap::new(),
            route_tables: BTreeMap::new(),
            nat_services: BTreeMap::new(),
            public_ips: BTreeMap::new(),
            security_groups: BTreeMap::new(),
            load_balancers: BTreeMap::new(),
            vms: BTreeMap::new(),
            volumes: BTreeMap::new(),
            keypairs: BTreeMap::new(),
            images: BTreeMap::new(),
            net_peerings: BTreeMap::new(),
            net_access_points: BTreeMap::new(),
        }
    }
}

impl World {
    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{}-{:08x}", prefix, self.seq)
    }

    fn record(&mut self, tenant: &str, op: &'static str, target: &str) -> Result<()> {
        tracing::trace!(tenant, op, target, "memory cloud call");
        self.calls.push(Call {
            tenant: tenant.to_string(),
            op,
            target: target.to_string(),
        });
        match self.failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn tags_mut(&mut self, resource_id: &str) -> Option<&mut Vec<Tag>> {
        if let Some(r) = self.nets.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.subnets.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.internet_services.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.route_tables.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.nat_services.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.public_ips.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.security_groups.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.load_balancers.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.vms.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.volumes.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.net_peerings.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        if let Some(r) = self.net_access_points.get_mut(resource_id) {
            return Some(&mut r.tags);
        }
        None
    }

    /// Live resources of a type with their tags
    fn tagged(&self, resource_type: ResourceType) -> Vec<(&str, &[Tag])> {
        fn collect<'a, T>(
            map: &'a BTreeMap<String, T>,
            tags: impl Fn(&'a T) -> Option<&'a [Tag]>,
        ) -> Vec<(&'a str, &'a [Tag])> {
            map.iter()
                .filter_map(|(id, r)| tags(r).map(|t| (id.as_str(), t)))
                .collect()
        }
        match resource_type {
            ResourceType::Net => collect(&self.nets, |r| Some(r.tags.as_slice())),
            ResourceType::Subnet => collect(&self.subnets, |r| Some(r.tags.as_slice())),
            ResourceType::InternetService => collect(&self.internet_services, |r| Some(r.tags.as_slice())),
            ResourceType::RouteTable => collect(&self.route_tables, |r| Some(r.tags.as_slice())),
            ResourceType::NatService => collect(&self.nat_services, |r| {
                (r.state != "deleted").then_some(r.tags.as_slice())
            }),
            ResourceType::PublicIp => collect(&self.public_ips, |r| Some(r.tags.as_slice())),
            ResourceType::SecurityGroup => collect(&self.security_groups, |r| Some(r.tags.as_slice())),
            ResourceType::LoadBalancer => collect(&self.load_balancers, |r| Some(r.tags.as_slice())),
            ResourceType::Vm => {
                collect(&self.vms, |r| (!r.state.is_gone()).then_some(r.tags.as_slice()))
            }
            ResourceType::Image => Vec::new(),
            ResourceType::NetPeering => {
                collect(&self.net_peerings, |r| r.state.is_live().then_some(r.tags.as_slice()))
            }
            ResourceType::NetAccessPoint => collect(&self.net_access_points, |r| Some(r.tags.as_slice())),
            ResourceType::Volume => collect(&self.volumes, |r| Some(r.tags.as_slice())),
        }
    }

    fn find_tag(&self, resource_type: ResourceType, key: &str, value: &str) -> Option<ResourceTag> {
        self.tagged(resource_type).into_iter().find_map(|(id, tags)| {
            tags.iter()
                .find(|t| t.key == key && t.value == value)
                .map(|t| ResourceTag {
                    resource_id: id.to_string(),
                    resource_type,
                    key: t.key.clone(),
                    value: t.value.clone(),
                })
        })
    }

    fn detach_public_ip(&mut self, public_ip_id: &str) {
        if let Some(ip) = self.public_ips.get_mut(public_ip_id) {
            ip.link_public_ip_id = None;
        }
    }
}

fn owned_tags(cluster_uid: &str, name: &str) -> Vec<Tag> {
    vec![Tag::name(name), Tag::owner(cluster_uid)]
}

fn not_found(kind: &str, id: &str) -> CloudError {
    CloudError::ResourceNotFound(format!("{} {}", kind, id))
}

/// Shared in-memory cloud
#[derive(Clone, Default)]
pub struct MemoryCloud {
    world: Arc<Mutex<World>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scoped(&self, tenant: &Tenant) -> Arc<Scoped> {
        Arc::new(Scoped {
            world: self.world.clone(),
            tenant: tenant.name().to_string(),
            region: tenant.region().to_string(),
        })
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Operation names recorded so far, in order
    pub fn ops(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(|c| c.op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of calls whose operation starts with `prefix` (`create_`, `delete_`, ...)
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op.starts_with(prefix))
            .count()
    }

    /// Index of the first call to `op`
    pub fn position(&self, op: &str) -> Option<usize> {
        self.lock().calls.iter().position(|c| c.op == op)
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make the next call to `op` fail with `err`
    pub fn fail_next(&self, op: &'static str, err: CloudError) {
        self.lock().failures.insert(op, err);
    }

    /// State given to newly created VMs
    pub fn set_default_vm_state(&self, state: VmState) {
        self.lock().default_vm_state = state;
    }

    pub fn set_vm_state(&self, vm_id: &str, state: VmState) -> bool {
        match self.lock().vms.get_mut(vm_id) {
            Some(vm) => {
                vm.state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_net_peering_state(&self, net_peering_id: &str, state: NetPeeringState) -> bool {
        match self.lock().net_peerings.get_mut(net_peering_id) {
            Some(peering) => {
                peering.state = state;
                true
            }
            None => false,
        }
    }

    pub fn add_image(&self, name: &str, account_id: &str) -> Image {
        let mut w = self.lock();
        let image = Image {
            image_id: w.next_id("ami"),
            image_name: name.to_string(),
            account_id: account_id.to_string(),
        };
        w.images.insert(image.image_id.clone(), image.clone());
        image
    }

    /// Add an address to a shared pool, optionally already attached elsewhere
    pub fn add_pool_ip(&self, pool: &str, attached: bool) -> PublicIp {
        let mut w = self.lock();
        let id = w.next_id("eipalloc");
        let link = attached.then(|| w.next_id("eipassoc"));
        let ip = PublicIp {
            public_ip_id: id.clone(),
            public_ip: format!("203.0.113.{}", w.seq % 250 + 1),
            link_public_ip_id: link,
            tags: vec![Tag::new(tag::POOL_KEY, pool)],
        };
        w.public_ips.insert(id, ip.clone());
        ip
    }

    /// Seed a net that exists outside any cluster (for example a management net)
    pub fn add_net(&self, ip_range: &str) -> Net {
        let mut w = self.lock();
        let net = Net {
            net_id: w.next_id("vpc"),
            ip_range: ip_range.to_string(),
            state: "available".to_string(),
            tags: Vec::new(),
        };
        w.nets.insert(net.net_id.clone(), net.clone());
        net
    }

    /// Seed a subnet outside any cluster
    pub fn add_subnet(&self, net_id: &str, ip_range: &str) -> Subnet {
        let mut w = self.lock();
        let subnet = Subnet {
            subnet_id: w.next_id("subnet"),
            net_id: net_id.to_string(),
            ip_range: ip_range.to_string(),
            subregion_name: String::new(),
            tags: Vec::new(),
        };
        w.subnets.insert(subnet.subnet_id.clone(), subnet.clone());
        subnet
    }

    /// Seed a route table, linked to `subnet_id` when given
    pub fn add_route_table(&self, net_id: &str, subnet_id: Option<&str>) -> RouteTable {
        let mut w = self.lock();
        let id = w.next_id("rtb");
        let links = match subnet_id {
            Some(subnet_id) => vec![RouteTableLink {
                link_route_table_id: w.next_id("rtbassoc"),
                subnet_id: subnet_id.to_string(),
            }],
            None => Vec::new(),
        };
        let rtb = RouteTable {
            route_table_id: id.clone(),
            net_id: net_id.to_string(),
            links,
            routes: Vec::new(),
            tags: Vec::new(),
        };
        w.route_tables.insert(id, rtb.clone());
        rtb
    }

    /// Seed a resource tag without recording a call
    pub fn tag_resource(&self, resource_id: &str, tag: Tag) -> bool {
        match self.lock().tags_mut(resource_id) {
            Some(tags) => {
                tags.push(tag);
                true
            }
            None => false,
        }
    }

    /// Drop a resource behind the controller's back
    pub fn remove(&self, resource_id: &str) -> bool {
        let mut w = self.lock();
        w.nets.remove(resource_id).is_some()
            || w.subnets.remove(resource_id).is_some()
            || w.internet_services.remove(resource_id).is_some()
            || w.route_tables.remove(resource_id).is_some()
            || w.nat_services.remove(resource_id).is_some()
            || w.public_ips.remove(resource_id).is_some()
            || w.security_groups.remove(resource_id).is_some()
            || w.load_balancers.remove(resource_id).is_some()
            || w.vms.remove(resource_id).is_some()
            || w.volumes.remove(resource_id).is_some()
            || w.keypairs.remove(resource_id).is_some()
            || w.net_peerings.remove(resource_id).is_some()
            || w.net_access_points.remove(resource_id).is_some()
    }

    pub fn nets(&self) -> Vec<Net> {
        self.lock().nets.values().cloned().collect()
    }

    pub fn subnets(&self) -> Vec<Subnet> {
        self.lock().subnets.values().cloned().collect()
    }

    pub fn internet_services(&self) -> Vec<InternetService> {
        self.lock().internet_services.values().cloned().collect()
    }

    pub fn route_tables(&self) -> Vec<RouteTable> {
        self.lock().route_tables.values().cloned().collect()
    }

    pub fn nat_services(&self) -> Vec<NatService> {
        self.lock().nat_services.values().cloned().collect()
    }

    pub fn public_ips(&self) -> Vec<PublicIp> {
        self.lock().public_ips.values().cloned().collect()
    }

    pub fn security_groups(&self) -> Vec<SecurityGroup> {
        self.lock().security_groups.values().cloned().collect()
    }

    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.lock().load_balancers.values().cloned().collect()
    }

    pub fn vms(&self) -> Vec<Vm> {
        self.lock().vms.values().cloned().collect()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.lock().volumes.values().cloned().collect()
    }

    pub fn keypairs(&self) -> Vec<Keypair> {
        self.lock().keypairs.values().cloned().collect()
    }

    pub fn net_peerings(&self) -> Vec<NetPeering> {
        self.lock().net_peerings.values().cloned().collect()
    }

    pub fn net_access_points(&self) -> Vec<NetAccessPoint> {
        self.lock().net_access_points.values().cloned().collect()
    }
}

impl Cloud for MemoryCloud {
    fn net(&self, tenant: &Tenant) -> Arc<dyn NetApi> {
        self.scoped(tenant)
    }
    fn subnet(&self, tenant: &Tenant) -> Arc<dyn SubnetApi> {
        self.scoped(tenant)
    }
    fn internet_service(&self, tenant: &Tenant) -> Arc<dyn InternetServiceApi> {
        self.scoped(tenant)
    }
    fn route_table(&self, tenant: &Tenant) -> Arc<dyn RouteTableApi> {
        self.scoped(tenant)
    }
    fn nat_service(&self, tenant: &Tenant) -> Arc<dyn NatServiceApi> {
        self.scoped(tenant)
    }
    fn public_ip(&self, tenant: &Tenant) -> Arc<dyn PublicIpApi> {
        self.scoped(tenant)
    }
    fn security_group(&self, tenant: &Tenant) -> Arc<dyn SecurityGroupApi> {
        self.scoped(tenant)
    }
    fn load_balancer(&self, tenant: &Tenant) -> Arc<dyn LoadBalancerApi> {
        self.scoped(tenant)
    }
    fn vm(&self, tenant: &Tenant) -> Arc<dyn VmApi> {
        self.scoped(tenant)
    }
    fn volume(&self, tenant: &Tenant) -> Arc<dyn VolumeApi> {
        self.scoped(tenant)
    }
    fn keypair(&self, tenant: &Tenant) -> Arc<dyn KeypairApi> {
        self.scoped(tenant)
    }
    fn image(&self, tenant: &Tenant) -> Arc<dyn ImageApi> {
        self.scoped(tenant)
    }
    fn net_peering(&self, tenant: &Tenant) -> Arc<dyn NetPeeringApi> {
        self.scoped(tenant)
    }
    fn net_access_point(&self, tenant: &Tenant) -> Arc<dyn NetAccessPointApi> {
        self.scoped(tenant)
    }
    fn tag(&self, tenant: &Tenant) -> Arc<dyn TagApi> {
        self.scoped(tenant)
    }
}

/// Service handle bound to one tenant
struct Scoped {
    world: Arc<Mutex<World>>,
    tenant: String,
    region: String,
}

impl Scoped {
    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the world and record the call
    fn call(&self, op: &'static str, target: &str) -> Result<MutexGuard<'_, World>> {
        let mut w = self.lock();
        w.record(&self.tenant, op, target)?;
        Ok(w)
    }
}

#[async_trait]
impl NetApi for Scoped {
    async fn get_net(&self, net_id: &str) -> Result<Option<Net>> {
        let w = self.call("get_net", net_id)?;
        Ok(w.nets.get(net_id).cloned())
    }

    async fn create_net(&self, ip_range: &str, cluster_uid: &str, name: &str) -> Result<Net> {
        let mut w = self.call("create_net", name)?;
        let net = Net {
            net_id: w.next_id("vpc"),
            ip_range: ip_range.to_string(),
            state: "available".to_string(),
            tags: owned_tags(cluster_uid, name),
        };
        let default_sg = SecurityGroup {
            security_group_id: w.next_id("sg"),
            security_group_name: "default".to_string(),
            description: "default security group".to_string(),
            net_id: net.net_id.clone(),
            rules: Vec::new(),
            tags: Vec::new(),
        };
        w.security_groups
            .insert(default_sg.security_group_id.clone(), default_sg);
        w.nets.insert(net.net_id.clone(), net.clone());
        Ok(net)
    }

    async fn delete_net(&self, net_id: &str) -> Result<()> {
        let mut w = self.call("delete_net", net_id)?;
        if !w.nets.contains_key(net_id) {
            return Err(not_found("net", net_id));
        }
        if w.subnets.values().any(|s| s.net_id == net_id) {
            return Err(CloudError::Conflict(format!("net {} still has subnets", net_id)));
        }
        if w
            .internet_services
            .values()
            .any(|i| i.net_id.as_deref() == Some(net_id))
        {
            return Err(CloudError::Conflict(format!(
                "net {} still has an internet service",
                net_id
            )));
        }
        if w
            .security_groups
            .values()
            .any(|sg| sg.net_id == net_id && sg.security_group_name != "default")
        {
            return Err(CloudError::Conflict(format!(
                "net {} still has security groups",
                net_id
            )));
        }
        w.security_groups.retain(|_, sg| sg.net_id != net_id);
        w.route_tables.retain(|_, rtb| rtb.net_id != net_id);
        w.nets.remove(net_id);
        Ok(())
    }
}

#[async_trait]
impl SubnetApi for Scoped {
    async fn get_subnet(&self, subnet_id: &str) -> Result<Option<Subnet>> {
        let w = self.call("get_subnet", subnet_id)?;
        Ok(w.subnets.get(subnet_id).cloned())
    }

    async fn get_subnet_from_net(&self, net_id: &str, ip_range: &str) -> Result<Option<Subnet>> {
        let w = self.call("get_subnet_from_net", ip_range)?;
        Ok(w.subnets
            .values()
            .find(|s| s.net_id == net_id && s.ip_range == ip_range)
            .cloned())
    }

    async fn create_subnet(
        &self,
        net_id: &str,
        ip_range: &str,
        subregion: &str,
        cluster_uid: &str,
        name: &str,
    ) -> Result<Subnet> {
        let mut w = self.call("create_subnet", ip_range)?;
        if !w.nets.contains_key(net_id) {
            return Err(not_found("net", net_id));
        }
        let subnet = Subnet {
            subnet_id: w.next_id("subnet"),
            net_id: net_id.to_string(),
            ip_range: ip_range.to_string(),
            subregion_name: subregion.to_string(),
            tags: owned_tags(cluster_uid, name),
        };
        w.subnets.insert(subnet.subnet_id.clone(), subnet.clone());
        Ok(subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let mut w = self.call("delete_subnet", subnet_id)?;
        if !w.subnets.contains_key(subnet_id) {
            return Err(not_found("subnet", subnet_id));
        }
        let busy = w
            .nat_services
            .values()
            .any(|n| n.subnet_id == subnet_id && n.state != "deleted")
            || w
                .vms
                .values()
                .any(|vm| vm.subnet_id == subnet_id && !vm.state.is_gone());
        if busy {
            return Err(CloudError::Conflict(format!("subnet {} is in use", subnet_id)));
        }
        w.subnets.remove(subnet_id);
        Ok(())
    }
}

#[async_trait]
impl InternetServiceApi for Scoped {
    async fn get_internet_service(
        &self,
        internet_service_id: &str,
    ) -> Result<Option<InternetService>> {
        let w = self.call("get_internet_service", internet_service_id)?;
        Ok(w.internet_services.get(internet_service_id).cloned())
    }

    async fn get_internet_service_for_net(&self, net_id: &str) -> Result<Option<InternetService>> {
        let w = self.call("get_internet_service_for_net", net_id)?;
        Ok(w.internet_services
            .values()
            .find(|i| i.net_id.as_deref() == Some(net_id))
            .cloned())
    }

    async fn create_internet_service(
        &self,
        cluster_uid: &str,
        name: &str,
    ) -> Result<InternetService> {
        let mut w = self.call("create_internet_service", name)?;
        let igw = InternetService {
            internet_service_id: w.next_id("igw"),
            net_id: None,
            tags: owned_tags(cluster_uid, name),
        };
        w.internet_services
            .insert(igw.internet_service_id.clone(), igw.clone());
        Ok(igw)
    }

    async fn link_internet_service(&self, internet_service_id: &str, net_id: &str) -> Result<()> {
        let mut w = self.call("link_internet_service", internet_service_id)?;
        let igw = w
            .internet_services
            .get_mut(internet_service_id)
            .ok_or_else(|| not_found("internet service", internet_service_id))?;
        if igw.net_id.is_some() {
            return Err(CloudError::Conflict(format!(
                "internet service {} is already linked",
                internet_service_id
            )));
        }
        igw.net_id = Some(net_id.to_string());
        Ok(())
    }

    async fn unlink_internet_service(&self, internet_service_id: &str, net_id: &str) -> Result<()> {
        let mut w = self.call("unlink_internet_service", internet_service_id)?;
        let igw = w
            .internet_services
            .get_mut(internet_service_id)
            .ok_or_else(|| not_found("internet service", internet_service_id))?;
        if igw.net_id.as_deref() != Some(net_id) {
            return Err(CloudError::InvalidRequest(format!(
                "internet service {} is not linked to {}",
                internet_service_id, net_id
            )));
        }
        igw.net_id = None;
        Ok(())
    }

    async fn delete_internet_service(&self, internet_service_id: &str) -> Result<()> {
        let mut w = self.call("delete_internet_service", internet_service_id)?;
        match w.internet_services.get(internet_service_id) {
            None => Err(not_found("internet service", internet_service_id)),
            Some(igw) if igw.net_id.is_some() => Err(CloudError::Conflict(format!(
                "internet service {} is still linked",
                internet_service_id
            ))),
            Some(_) => {
                w.internet_services.remove(internet_service_id);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RouteTableApi for Scoped {
    async fn get_route_table(&self, route_table_id: &str) -> Result<Option<RouteTable>> {
        let w = self.call("get_route_table", route_table_id)?;
        Ok(w.route_tables.get(route_table_id).cloned())
    }

    async fn get_route_tables_from_net(&self, net_id: &str) -> Result<Vec<RouteTable>> {
        let w = self.call("get_route_tables_from_net", net_id)?;
        Ok(w.route_tables
            .values()
            .filter(|r| r.net_id == net_id)
            .cloned()
            .collect())
    }

    async fn create_route_table(
        &self,
        net_id: &str,
        cluster_uid: &str,
        name: &str,
    ) -> Result<RouteTable> {
        let mut w = self.call("create_route_table", name)?;
        let rtb = RouteTable {
            route_table_id: w.next_id("rtb"),
            net_id: net_id.to_string(),
            links: Vec::new(),
            routes: Vec::new(),
            tags: owned_tags(cluster_uid, name),
        };
        w.route_tables.insert(rtb.route_table_id.clone(), rtb.clone());
        Ok(rtb)
    }

    async fn link_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<String> {
        let mut w = self.call("link_route_table", route_table_id)?;
        if w.route_tables.values().any(|r| r.is_linked_to(subnet_id)) {
            return Err(CloudError::Conflict(format!(
                "subnet {} already has a route table",
                subnet_id
            )));
        }
        let link_id = w.next_id("rtbassoc");
        let rtb = w
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| not_found("route table", route_table_id))?;
        rtb.links.push(RouteTableLink {
            link_route_table_id: link_id.clone(),
            subnet_id: subnet_id.to_string(),
        });
        Ok(link_id)
    }

    async fn unlink_route_table(&self, link_route_table_id: &str) -> Result<()> {
        let mut w = self.call("unlink_route_table", link_route_table_id)?;
        let rtb = w
            .route_tables
            .values_mut()
            .find(|r| {
                r.links
                    .iter()
                    .any(|l| l.link_route_table_id == link_route_table_id)
            })
            .ok_or_else(|| not_found("route table link", link_route_table_id))?;
        rtb.links
            .retain(|l| l.link_route_table_id != link_route_table_id);
        Ok(())
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_ip_range: &str,
        target: &RouteTarget,
    ) -> Result<RouteTable> {
        let mut w = self.call("create_route", route_table_id)?;
        let rtb = w
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| not_found("route table", route_table_id))?;
        if rtb.has_route_to(destination_ip_range) {
            return Err(CloudError::Conflict(format!(
                "route to {} already exists in {}",
                destination_ip_range, route_table_id
            )));
        }
        rtb.routes.push(Route {
            destination_ip_range: destination_ip_range.to_string(),
            target: target.clone(),
        });
        Ok(rtb.clone())
    }

    async fn delete_route(&self, route_table_id: &str, destination_ip_range: &str) -> Result<()> {
        let mut w = self.call("delete_route", route_table_id)?;
        let rtb = w
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| not_found("route table", route_table_id))?;
        if !rtb.has_route_to(destination_ip_range) {
            return Err(not_found("route", destination_ip_range));
        }
        rtb.routes
            .retain(|r| r.destination_ip_range != destination_ip_range);
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<()> {
        let mut w = self.call("delete_route_table", route_table_id)?;
        match w.route_tables.get(route_table_id) {
            None => Err(not_found("route table", route_table_id)),
            Some(rtb) if !rtb.links.is_empty() => Err(CloudError::Conflict(format!(
                "route table {} is still linked",
                route_table_id
            ))),
            Some(_) => {
                w.route_tables.remove(route_table_id);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl NatServiceApi for Scoped {
    async fn get_nat_service(&self, nat_service_id: &str) -> Result<Option<NatService>> {
        let w = self.call("get_nat_service", nat_service_id)?;
        Ok(w.nat_services.get(nat_service_id).cloned())
    }

    async fn get_nat_service_from_client_token(
        &self,
        client_token: &str,
    ) -> Result<Option<NatService>> {
        let w = self.call("get_nat_service_from_client_token", client_token)?;
        Ok(w.nat_services
            .values()
            .find(|n| n.client_token == client_token && n.state != "deleted")
            .cloned())
    }

    async fn list_nat_services(&self, net_id: &str) -> Result<Vec<NatService>> {
        let w = self.call("list_nat_services", net_id)?;
        Ok(w.nat_services
            .values()
            .filter(|n| n.net_id == net_id)
            .cloned()
            .collect())
    }

    async fn create_nat_service(
        &self,
        public_ip_id: &str,
        subnet_id: &str,
        client_token: &str,
        cluster_uid: &str,
        name: &str,
    ) -> Result<NatService> {
        let mut w = self.call("create_nat_service", client_token)?;
        if let Some(existing) = w
            .nat_services
            .values()
            .find(|n| n.client_token == client_token && n.state != "deleted")
        {
            return Ok(existing.clone());
        }
        let net_id = w
            .subnets
            .get(subnet_id)
            .map(|s| s.net_id.clone())
            .ok_or_else(|| not_found("subnet", subnet_id))?;
        let ip = w
            .public_ips
            .get(public_ip_id)
            .cloned()
            .ok_or_else(|| not_found("public ip", public_ip_id))?;
        if ip.is_attached() {
            return Err(CloudError::Conflict(format!(
                "public ip {} is already attached",
                public_ip_id
            )));
        }
        let link = w.next_id("eipassoc");
        if let Some(stored) = w.public_ips.get_mut(public_ip_id) {
            stored.link_public_ip_id = Some(link);
        }
        let nat = NatService {
            nat_service_id: w.next_id("nat"),
            net_id,
            subnet_id: subnet_id.to_string(),
            state: "available".to_string(),
            client_token: client_token.to_string(),
            public_ips: vec![NatPublicIp {
                public_ip_id: ip.public_ip_id,
                public_ip: ip.public_ip,
            }],
            tags: owned_tags(cluster_uid, name),
        };
        w.nat_services.insert(nat.nat_service_id.clone(), nat.clone());
        Ok(nat)
    }

    async fn delete_nat_service(&self, nat_service_id: &str) -> Result<()> {
        let mut w = self.call("delete_nat_service", nat_service_id)?;
        let nat = w
            .nat_services
            .get_mut(nat_service_id)
            .filter(|n| n.state != "deleted")
            .ok_or_else(|| not_found("nat service", nat_service_id))?;
        nat.state = "deleted".to_string();
        let ips: Vec<String> = nat.public_ips.iter().map(|p| p.public_ip_id.clone()).collect();
        for id in ips {
            w.detach_public_ip(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl PublicIpApi for Scoped {
    async fn get_public_ip(&self, public_ip_id: &str) -> Result<Option<PublicIp>> {
        let w = self.call("get_public_ip", public_ip_id)?;
        Ok(w.public_ips.get(public_ip_id).cloned())
    }

    async fn get_public_ip_by_ip(&self, public_ip: &str) -> Result<Option<PublicIp>> {
        let w = self.call("get_public_ip_by_ip", public_ip)?;
        Ok(w.public_ips
            .values()
            .find(|p| p.public_ip == public_ip)
            .cloned())
    }

    async fn list_public_ips_from_pool(&self, pool: &str) -> Result<Vec<PublicIp>> {
        let w = self.call("list_public_ips_from_pool", pool)?;
        Ok(w.public_ips
            .values()
            .filter(|p| p.pool() == Some(pool))
            .cloned()
            .collect())
    }

    async fn create_public_ip(&self, cluster_uid: &str, name: &str) -> Result<PublicIp> {
        let mut w = self.call("create_public_ip", name)?;
        let id = w.next_id("eipalloc");
        let ip = PublicIp {
            public_ip_id: id.clone(),
            public_ip: format!("198.51.100.{}", w.seq % 250 + 1),
            link_public_ip_id: None,
            tags: owned_tags(cluster_uid, name),
        };
        w.public_ips.insert(id, ip.clone());
        Ok(ip)
    }

    async fn delete_public_ip(&self, public_ip_id: &str) -> Result<()> {
        let mut w = self.call("delete_public_ip", public_ip_id)?;
        match w.public_ips.get(public_ip_id) {
            None => Err(not_found("public ip", public_ip_id)),
            Some(ip) if ip.is_attached() => Err(CloudError::Conflict(format!(
                "public ip {} is still attached",
                public_ip_id
            ))),
            Some(_) => {
                w.public_ips.remove(public_ip_id);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SecurityGroupApi for Scoped {
    async fn get_security_group(&self, security_group_id: &str) -> Result<Option<SecurityGroup>> {
        let w = self.call("get_security_group", security_group_id)?;
        Ok(w.security_groups.get(security_group_id).cloned())
    }

    async fn get_security_group_from_name(
        &self,
        net_id: &str,
        name: &str,
    ) -> Result<Option<SecurityGroup>> {
        let w = self.call("get_security_group_from_name", name)?;
        Ok(w.security_groups
            .values()
            .find(|sg| sg.net_id == net_id && sg.security_group_name == name)
            .cloned())
    }

    async fn list_security_groups_from_net(&self, net_id: &str) -> Result<Vec<SecurityGroup>> {
        let w = self.call("list_security_groups_from_net", net_id)?;
        Ok(w.security_groups
            .values()
            .filter(|sg| sg.net_id == net_id)
            .cloned()
            .collect())
    }

    async fn create_security_group(
        &self,
        net_id: &str,
        cluster_uid: &str,
        name: &str,
        description: &str,
        main_tag: bool,
    ) -> Result<SecurityGroup> {
        let mut w = self.call("create_security_group", name)?;
        if w
            .security_groups
            .values()
            .any(|sg| sg.net_id == net_id && sg.security_group_name == name)
        {
            return Err(CloudError::Conflict(format!(
                "security group {} already exists",
                name
            )));
        }
        let mut tags = owned_tags(cluster_uid, name);
        if main_tag {
            tags.push(Tag::new(
                format!("{}{}", tag::MAIN_SG_KEY_PREFIX, cluster_uid),
                "True",
            ));
        }
        let sg = SecurityGroup {
            security_group_id: w.next_id("sg"),
            security_group_name: name.to_string(),
            description: description.to_string(),
            net_id: net_id.to_string(),
            rules: Vec::new(),
            tags,
        };
        w.security_groups
            .insert(sg.security_group_id.clone(), sg.clone());
        Ok(sg)
    }

    async fn create_security_group_rule(
        &self,
        security_group_id: &str,
        rule: &RuleRequest,
    ) -> Result<SecurityGroup> {
        let mut w = self.call("create_security_group_rule", security_group_id)?;
        let sg = w
            .security_groups
            .get_mut(security_group_id)
            .ok_or_else(|| not_found("security group", security_group_id))?;
        let index = match sg.rules.iter().position(|r| {
            r.flow == rule.flow
                && r.same_ports(&rule.ip_protocol, rule.from_port_range, rule.to_port_range)
        }) {
            Some(index) => index,
            None => {
                sg.rules.push(SecurityGroupRule {
                    flow: rule.flow,
                    ip_protocol: rule.ip_protocol.clone(),
                    from_port_range: rule.from_port_range,
                    to_port_range: rule.to_port_range,
                    ip_ranges: Vec::new(),
                    security_groups_members: Vec::new(),
                });
                sg.rules.len() - 1
            }
        };
        let target = &mut sg.rules[index];
        if let Some(range) = &rule.ip_range {
            if target.ip_ranges.contains(range) {
                return Err(CloudError::Conflict(format!("duplicate rule for {}", range)));
            }
            target.ip_ranges.push(range.clone());
        }
        if let Some(member) = &rule.member_security_group_id {
            if target.security_groups_members.contains(member) {
                return Err(CloudError::Conflict(format!("duplicate rule for {}", member)));
            }
            target.security_groups_members.push(member.clone());
        }
        Ok(sg.clone())
    }

    async fn delete_security_group_rule(
        &self,
        security_group_id: &str,
        rule: &RuleRequest,
    ) -> Result<()> {
        let mut w = self.call("delete_security_group_rule", security_group_id)?;
        let sg = w
            .security_groups
            .get_mut(security_group_id)
            .ok_or_else(|| not_found("security group", security_group_id))?;
        let target = sg
            .rules
            .iter_mut()
            .find(|r| {
                r.flow == rule.flow
                    && r.same_ports(&rule.ip_protocol, rule.from_port_range, rule.to_port_range)
            })
            .ok_or_else(|| not_found("security group rule", security_group_id))?;
        if let Some(range) = &rule.ip_range {
            target.ip_ranges.retain(|r| r != range);
        }
        if let Some(member) = &rule.member_security_group_id {
            target.security_groups_members.retain(|m| m != member);
        }
        sg.rules
            .retain(|r| !r.ip_ranges.is_empty() || !r.security_groups_members.is_empty());
        Ok(())
    }

    async fn delete_security_group(&self, security_group_id: &str) -> Result<()> {
        let mut w = self.call("delete_security_group", security_group_id)?;
        if w.security_groups.remove(security_group_id).is_none() {
            return Err(not_found("security group", security_group_id));
        }
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerApi for Scoped {
    async fn get_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>> {
        let w = self.call("get_load_balancer", name)?;
        Ok(w.load_balancers.get(name).cloned())
    }

    async fn create_load_balancer(&self, request: &LoadBalancerRequest) -> Result<LoadBalancer> {
        let mut w = self.call("create_load_balancer", &request.name)?;
        if w.load_balancers.contains_key(&request.name) {
            return Err(CloudError::Conflict(format!(
                "load balancer {} already exists",
                request.name
            )));
        }
        let lb = LoadBalancer {
            load_balancer_name: request.name.clone(),
            dns_name: format!("{}.{}.lbu.outscale.com", request.name, self.region),
            load_balancer_type: request.load_balancer_type.clone(),
            subnets: vec![request.subnet_id.clone()],
            security_groups: vec![request.security_group_id.clone()],
            backend_vm_ids: Vec::new(),
            listeners: vec![request.listener.clone()],
            health_check: None,
            tags: request.tags.clone(),
        };
        w.load_balancers.insert(request.name.clone(), lb.clone());
        Ok(lb)
    }

    async fn configure_health_check(
        &self,
        name: &str,
        health_check: &HealthCheck,
    ) -> Result<LoadBalancer> {
        let mut w = self.call("configure_health_check", name)?;
        let lb = w
            .load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("load balancer", name))?;
        lb.health_check = Some(health_check.clone());
        Ok(lb.clone())
    }

    async fn link_backend_vms(&self, name: &str, vm_ids: &[String]) -> Result<()> {
        let mut w = self.call("link_backend_vms", name)?;
        let lb = w
            .load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("load balancer", name))?;
        for id in vm_ids {
            if !lb.backend_vm_ids.contains(id) {
                lb.backend_vm_ids.push(id.clone());
            }
        }
        Ok(())
    }

    async fn unlink_backend_vms(&self, name: &str, vm_ids: &[String]) -> Result<()> {
        let mut w = self.call("unlink_backend_vms", name)?;
        let lb = w
            .load_balancers
            .get_mut(name)
            .ok_or_else(|| not_found("load balancer", name))?;
        lb.backend_vm_ids.retain(|id| !vm_ids.contains(id));
        Ok(())
    }

    async fn delete_load_balancer(&self, name: &str) -> Result<()> {
        let mut w = self.call("delete_load_balancer", name)?;
        if w.load_balancers.remove(name).is_none() {
            return Err(not_found("load balancer", name));
        }
        Ok(())
    }
}

#[async_trait]
impl VmApi for Scoped {
    async fn get_vm(&self, vm_id: &str) -> Result<Option<Vm>> {
        let w = self.call("get_vm", vm_id)?;
        Ok(w.vms.get(vm_id).cloned())
    }

    async fn get_vm_from_client_token(&self, client_token: &str) -> Result<Option<Vm>> {
        let w = self.call("get_vm_from_client_token", client_token)?;
        Ok(w.vms
            .values()
            .find(|vm| vm.client_token == client_token && !vm.state.is_gone())
            .cloned())
    }

    async fn create_vm(&self, request: &VmRequest) -> Result<Vm> {
        let mut w = self.call("create_vm", &request.name)?;
        if let Some(existing) = w
            .vms
            .values()
            .find(|vm| vm.client_token == request.client_token && !vm.state.is_gone())
        {
            return Ok(existing.clone());
        }
        let subnet = w
            .subnets
            .get(&request.subnet_id)
            .cloned()
            .ok_or_else(|| not_found("subnet", &request.subnet_id))?;
        let host = 10 + w.vms.len();
        let private_ip = match request.private_ips.first() {
            Some(ip) => ip.clone(),
            None => {
                let base = subnet.ip_range.split('/').next().unwrap_or("10.0.0.0");
                let prefix: Vec<&str> = base.split('.').take(3).collect();
                format!("{}.{}", prefix.join("."), host)
            }
        };
        let mut public_ip = None;
        if let Some(address) = tag::tag_value(tag::AUTO_ATTACH_PUBLIC_IP_KEY, &request.tags) {
            let link = w.next_id("eipassoc");
            let ip = w
                .public_ips
                .values_mut()
                .find(|p| p.public_ip == address)
                .ok_or_else(|| not_found("public ip", address))?;
            ip.link_public_ip_id = Some(link);
            public_ip = Some(ip.public_ip.clone());
        }
        let mut tags = request.tags.clone();
        tags.push(Tag::name(&request.name));
        let vm = Vm {
            vm_id: w.next_id("i"),
            state: w.default_vm_state,
            subnet_id: request.subnet_id.clone(),
            vm_type: request.vm_type.clone(),
            image_id: request.image_id.clone(),
            client_token: request.client_token.clone(),
            private_dns_name: Some(format!(
                "ip-{}.{}.compute.internal",
                private_ip.replace('.', "-"),
                self.region
            )),
            private_ip: Some(private_ip),
            public_ip,
            security_group_ids: request.security_group_ids.clone(),
            tags,
        };
        w.vms.insert(vm.vm_id.clone(), vm.clone());
        Ok(vm)
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<()> {
        let mut w = self.call("delete_vm", vm_id)?;
        let vm = w
            .vms
            .get_mut(vm_id)
            .filter(|vm| !vm.state.is_gone())
            .ok_or_else(|| not_found("vm", vm_id))?;
        vm.state = VmState::Terminated;
        let attached = tag::tag_value(tag::AUTO_ATTACH_PUBLIC_IP_KEY, &vm.tags).map(str::to_string);
        for volume in w
            .volumes
            .values_mut()
            .filter(|v| v.linked_vm_id.as_deref() == Some(vm_id))
        {
            volume.state = VolumeState::Available;
            volume.linked_vm_id = None;
            volume.device_name = None;
        }
        if let Some(address) = attached {
            let ip_id = w
                .public_ips
                .values()
                .find(|p| p.public_ip == address)
                .map(|p| p.public_ip_id.clone());
            if let Some(ip_id) = ip_id {
                w.detach_public_ip(&ip_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeApi for Scoped {
    async fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>> {
        let w = self.call("get_volume", volume_id)?;
        Ok(w.volumes.get(volume_id).cloned())
    }

    async fn create_volume(&self, request: &VolumeRequest) -> Result<Volume> {
        let mut w = self.call("create_volume", &request.name)?;
        if request.size == 0 {
            return Err(CloudError::InvalidRequest(format!(
                "volume {} has no size",
                request.name
            )));
        }
        let mut tags = request.tags.clone();
        tags.push(Tag::name(&request.name));
        let volume = Volume {
            volume_id: w.next_id("vol"),
            state: VolumeState::Available,
            size: request.size,
            volume_type: request.volume_type.clone(),
            iops: request.iops,
            subregion_name: request.subregion_name.clone(),
            linked_vm_id: None,
            device_name: None,
            tags,
        };
        w.volumes.insert(volume.volume_id.clone(), volume.clone());
        Ok(volume)
    }

    async fn link_volume(&self, volume_id: &str, vm_id: &str, device_name: &str) -> Result<()> {
        let mut w = self.call("link_volume", volume_id)?;
        if !w.vms.get(vm_id).is_some_and(|vm| !vm.state.is_gone()) {
            return Err(not_found("vm", vm_id));
        }
        let volume = w
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        if volume.state != VolumeState::Available {
            return Err(CloudError::Conflict(format!(
                "volume {} is {}",
                volume_id, volume.state
            )));
        }
        volume.state = VolumeState::InUse;
        volume.linked_vm_id = Some(vm_id.to_string());
        volume.device_name = Some(device_name.to_string());
        Ok(())
    }

    async fn unlink_volume(&self, volume_id: &str) -> Result<()> {
        let mut w = self.call("unlink_volume", volume_id)?;
        let volume = w
            .volumes
            .get_mut(volume_id)
            .filter(|v| v.linked_vm_id.is_some())
            .ok_or_else(|| not_found("volume link", volume_id))?;
        volume.state = VolumeState::Available;
        volume.linked_vm_id = None;
        volume.device_name = None;
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let mut w = self.call("delete_volume", volume_id)?;
        let volume = w
            .volumes
            .get(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        if volume.state == VolumeState::InUse {
            return Err(CloudError::Conflict(format!("volume {} is in use", volume_id)));
        }
        w.volumes.remove(volume_id);
        Ok(())
    }
}

#[async_trait]
impl KeypairApi for Scoped {
    async fn get_keypair(&self, name: &str) -> Result<Option<Keypair>> {
        let w = self.call("get_keypair", name)?;
        Ok(w.keypairs.get(name).cloned())
    }

    async fn create_keypair(&self, name: &str) -> Result<Keypair> {
        let mut w = self.call("create_keypair", name)?;
        if w.keypairs.contains_key(name) {
            return Err(CloudError::Conflict(format!("keypair {} already exists", name)));
        }
        let seq = w.next_id("fp");
        let keypair = Keypair {
            keypair_name: name.to_string(),
            fingerprint: seq,
        };
        w.keypairs.insert(name.to_string(), keypair.clone());
        Ok(keypair)
    }

    async fn delete_keypair(&self, name: &str) -> Result<()> {
        let mut w = self.call("delete_keypair", name)?;
        w.keypairs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("keypair", name))
    }
}

#[async_trait]
impl ImageApi for Scoped {
    async fn get_image(&self, image_id: &str) -> Result<Option<Image>> {
        let w = self.call("get_image", image_id)?;
        Ok(w.images.get(image_id).cloned())
    }

    async fn get_image_by_name(
        &self,
        name: &str,
        account_id: Option<&str>,
    ) -> Result<Option<Image>> {
        let w = self.call("get_image_by_name", name)?;
        Ok(w.images
            .values()
            .find(|i| i.image_name == name && account_id.is_none_or(|a| a == i.account_id))
            .cloned())
    }
}

#[async_trait]
impl NetPeeringApi for Scoped {
    async fn get_net_peering(&self, net_peering_id: &str) -> Result<Option<NetPeering>> {
        let w = self.call("get_net_peering", net_peering_id)?;
        Ok(w.net_peerings.get(net_peering_id).cloned())
    }

    async fn list_net_peerings(&self, net_id: &str) -> Result<Vec<NetPeering>> {
        let w = self.call("list_net_peerings", net_id)?;
        Ok(w.net_peerings
            .values()
            .filter(|p| p.source_net_id == net_id || p.accepter_net_id == net_id)
            .cloned()
            .collect())
    }

    async fn create_net_peering(
        &self,
        net_id: &str,
        accepter_net_id: &str,
        accepter_account_id: &str,
        cluster_uid: &str,
    ) -> Result<NetPeering> {
        let mut w = self.call("create_net_peering", net_id)?;
        let peering = NetPeering {
            net_peering_id: w.next_id("pcx"),
            state: NetPeeringState::PendingAcceptance,
            source_net_id: net_id.to_string(),
            accepter_net_id: accepter_net_id.to_string(),
            accepter_account_id: accepter_account_id.to_string(),
            tags: vec![Tag::owner(cluster_uid)],
        };
        w.net_peerings
            .insert(peering.net_peering_id.clone(), peering.clone());
        Ok(peering)
    }

    async fn accept_net_peering(&self, net_peering_id: &str) -> Result<()> {
        let mut w = self.call("accept_net_peering", net_peering_id)?;
        let peering = w
            .net_peerings
            .get_mut(net_peering_id)
            .ok_or_else(|| not_found("net peering", net_peering_id))?;
        if peering.state != NetPeeringState::PendingAcceptance {
            return Err(CloudError::InvalidRequest(format!(
                "net peering {} is not pending acceptance",
                net_peering_id
            )));
        }
        peering.state = NetPeeringState::Active;
        Ok(())
    }

    async fn delete_net_peering(&self, net_peering_id: &str) -> Result<()> {
        let mut w = self.call("delete_net_peering", net_peering_id)?;
        let peering = w
            .net_peerings
            .get_mut(net_peering_id)
            .filter(|p| p.state.is_live())
            .ok_or_else(|| not_found("net peering", net_peering_id))?;
        peering.state = NetPeeringState::Deleted;
        Ok(())
    }
}

#[async_trait]
impl NetAccessPointApi for Scoped {
    async fn get_net_access_point(&self, id: &str) -> Result<Option<NetAccessPoint>> {
        let w = self.call("get_net_access_point", id)?;
        Ok(w.net_access_points.get(id).cloned())
    }

    async fn get_net_access_point_for(
        &self,
        net_id: &str,
        region: &str,
        service: &str,
    ) -> Result<Option<NetAccessPoint>> {
        let w = self.call("get_net_access_point_for", service)?;
        let service_name = net_access_point_service_name(region, service);
        Ok(w.net_access_points
            .values()
            .find(|n| n.net_id == net_id && n.service_name == service_name)
            .cloned())
    }

    async fn list_net_access_points(&self, net_id: &str) -> Result<Vec<NetAccessPoint>> {
        let w = self.call("list_net_access_points", net_id)?;
        Ok(w.net_access_points
            .values()
            .filter(|n| n.net_id == net_id)
            .cloned()
            .collect())
    }

    async fn create_net_access_point(
        &self,
        net_id: &str,
        region: &str,
        service: &str,
        route_table_ids: &[String],
        cluster_uid: &str,
    ) -> Result<NetAccessPoint> {
        let mut w = self.call("create_net_access_point", service)?;
        let nap = NetAccessPoint {
            net_access_point_id: w.next_id("vpce"),
            net_id: net_id.to_string(),
            service_name: net_access_point_service_name(region, service),
            route_table_ids: route_table_ids.to_vec(),
            state: "available".to_string(),
            tags: vec![Tag::owner(cluster_uid)],
        };
        w.net_access_points
            .insert(nap.net_access_point_id.clone(), nap.clone());
        Ok(nap)
    }

    async fn delete_net_access_point(&self, id: &str) -> Result<()> {
        let mut w = self.call("delete_net_access_point", id)?;
        if w.net_access_points.remove(id).is_none() {
            return Err(not_found("net access point", id));
        }
        Ok(())
    }
}

#[async_trait]
impl TagApi for Scoped {
    async fn read_owned_by_tag(
        &self,
        resource_type: ResourceType,
        cluster_uid: &str,
    ) -> Result<Option<ResourceTag>> {
        let w = self.call("read_owned_by_tag", resource_type.as_str())?;
        Ok(w.find_tag(resource_type, &tag::owner_key(cluster_uid), tag::OWNED_VALUE))
    }

    async fn read_tag(
        &self,
        resource_type: ResourceType,
        key: &str,
        value: &str,
    ) -> Result<Option<ResourceTag>> {
        let w = self.call("read_tag", resource_type.as_str())?;
        Ok(w.find_tag(resource_type, key, value))
    }

    async fn add_tag(&self, resource_id: &str, key: &str, value: &str) -> Result<()> {
        let mut w = self.call("add_tag", resource_id)?;
        let tags = w
            .tags_mut(resource_id)
            .ok_or_else(|| not_found("resource", resource_id))?;
        tags.retain(|t| t.key != key);
        tags.push(Tag::new(key, value));
        Ok(())
    }
}
