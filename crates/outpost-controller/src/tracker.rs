//! Resource tracker
//!
//! Resolves a logical resource to its provider id. The order is fixed: a
//! pinned id from the cluster spec, then the resource map, then provider lookups in
//! the order the caller lists them. Nothing here creates resources; callers
//! create on [`ReconcileError::NotFound`] and track the new id themselves.

use crate::error::{ReconcileError, Result, ResultExt};
use outpost_cloud::{Cloud, ResourceType, Tenant};
use outpost_core::ResourceMap;

/// A provider-side lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<'a> {
    /// First resource of the type carrying the owner tag
    Owner(ResourceType),
    /// Legacy `Name` tag
    Name(ResourceType, &'a str),
    SubnetInNet { net_id: &'a str, ip_range: &'a str },
    InternetServiceForNet(&'a str),
    NatToken(&'a str),
    SecurityGroupName { net_id: &'a str, name: &'a str },
    LoadBalancerName(&'a str),
    VmToken(&'a str),
    NetAccessPoint { net_id: &'a str, service: &'a str },
}

/// What to resolve: a resource map key, an optional pinned id and the
/// lookups to try when neither is known
#[derive(Debug, Clone)]
pub struct Target<'a> {
    key: &'a str,
    pinned: Option<&'a str>,
    probes: Vec<Probe<'a>>,
}

impl<'a> Target<'a> {
    pub fn new(key: &'a str) -> Self {
        Self {
            key,
            pinned: None,
            probes: Vec::new(),
        }
    }

    pub fn pinned(mut self, id: Option<&'a str>) -> Self {
        self.pinned = id.filter(|id| !id.is_empty());
        self
    }

    pub fn probe(mut self, probe: Probe<'a>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn key(&self) -> &str {
        self.key
    }
}

pub struct Tracker<'a> {
    cloud: &'a dyn Cloud,
    tenant: &'a Tenant,
    owner: &'a str,
}

impl<'a> Tracker<'a> {
    pub fn new(cloud: &'a dyn Cloud, tenant: &'a Tenant, owner: &'a str) -> Self {
        Self {
            cloud,
            tenant,
            owner,
        }
    }

    /// Resolve `target`, caching ids found by provider lookups in `map`
    pub async fn resolve(&self, map: &mut ResourceMap, target: &Target<'_>) -> Result<String> {
        if let Some(id) = target.pinned {
            tracing::debug!(key = target.key, id, "Using pinned id");
            return Ok(id.to_string());
        }
        if let Some(id) = map.get(target.key) {
            tracing::debug!(key = target.key, id, "Using tracked id");
            return Ok(id.to_string());
        }
        for probe in &target.probes {
            if let Some(id) = self.discover(probe).await? {
                tracing::debug!(key = target.key, id = %id, ?probe, "Found untracked resource");
                map.track(target.key, &id);
                return Ok(id);
            }
        }
        Err(ReconcileError::NotFound)
    }

    /// Run one provider lookup
    pub async fn discover(&self, probe: &Probe<'_>) -> Result<Option<String>> {
        let tenant = self.tenant;
        let found = match probe {
            Probe::Owner(resource_type) => self
                .cloud
                .tag(tenant)
                .read_owned_by_tag(*resource_type, self.owner)
                .await
                .context("failed to look up by owner tag")?
                .map(|t| t.resource_id),
            Probe::Name(resource_type, name) => self
                .cloud
                .tag(tenant)
                .read_tag(*resource_type, outpost_cloud::tag::NAME_KEY, name)
                .await
                .context("failed to look up by name tag")?
                .map(|t| t.resource_id),
            Probe::SubnetInNet { net_id, ip_range } => self
                .cloud
                .subnet(tenant)
                .get_subnet_from_net(net_id, ip_range)
                .await
                .context("failed to look up subnet")?
                .map(|s| s.subnet_id),
            Probe::InternetServiceForNet(net_id) => self
                .cloud
                .internet_service(tenant)
                .get_internet_service_for_net(net_id)
                .await
                .context("failed to look up internet service")?
                .map(|i| i.internet_service_id),
            Probe::NatToken(token) => self
                .cloud
                .nat_service(tenant)
                .get_nat_service_from_client_token(token)
                .await
                .context("failed to look up nat service")?
                .map(|n| n.nat_service_id),
            Probe::SecurityGroupName { net_id, name } => self
                .cloud
                .security_group(tenant)
                .get_security_group_from_name(net_id, name)
                .await
                .context("failed to look up security group")?
                .map(|sg| sg.security_group_id),
            Probe::LoadBalancerName(name) => self
                .cloud
                .load_balancer(tenant)
                .get_load_balancer(name)
                .await
                .context("failed to look up load balancer")?
                .map(|lb| lb.load_balancer_name),
            Probe::VmToken(token) => self
                .cloud
                .vm(tenant)
                .get_vm_from_client_token(token)
                .await
                .context("failed to look up vm")?
                .map(|vm| vm.vm_id),
            Probe::NetAccessPoint { net_id, service } => self
                .cloud
                .net_access_point(tenant)
                .get_net_access_point_for(net_id, tenant.region(), service)
                .await
                .context("failed to look up net access point")?
                .map(|nap| nap.net_access_point_id),
        };
        Ok(found)
    }

    /// Check that a pinned or tracked id still exists
    ///
    /// Never falls back to other lookups: a vanished id is drift, reported
    /// as [`ReconcileError::MissingResource`].
    pub async fn resolve_strict(&self, resource_type: ResourceType, id: &str) -> Result<()> {
        let tenant = self.tenant;
        let exists = match resource_type {
            ResourceType::Net => self.cloud.net(tenant).get_net(id).await?.is_some(),
            ResourceType::Subnet => self.cloud.subnet(tenant).get_subnet(id).await?.is_some(),
            ResourceType::InternetService => self
                .cloud
                .internet_service(tenant)
                .get_internet_service(id)
                .await?
                .is_some(),
            ResourceType::RouteTable => self
                .cloud
                .route_table(tenant)
                .get_route_table(id)
                .await?
                .is_some(),
            ResourceType::NatService => self
                .cloud
                .nat_service(tenant)
                .get_nat_service(id)
                .await?
                .is_some_and(|n| n.state != "deleted"),
            ResourceType::PublicIp => self.cloud.public_ip(tenant).get_public_ip(id).await?.is_some(),
            ResourceType::SecurityGroup => self
                .cloud
                .security_group(tenant)
                .get_security_group(id)
                .await?
                .is_some(),
            ResourceType::LoadBalancer => self
                .cloud
                .load_balancer(tenant)
                .get_load_balancer(id)
                .await?
                .is_some(),
            ResourceType::Vm => self
                .cloud
                .vm(tenant)
                .get_vm(id)
                .await?
                .is_some_and(|vm| !vm.state.is_gone()),
            ResourceType::Volume => self.cloud.volume(tenant).get_volume(id).await?.is_some(),
            ResourceType::Image => self.cloud.image(tenant).get_image(id).await?.is_some(),
            ResourceType::NetPeering => self
                .cloud
                .net_peering(tenant)
                .get_net_peering(id)
                .await?
                .is_some_and(|p| p.state.is_live()),
            ResourceType::NetAccessPoint => self
                .cloud
                .net_access_point(tenant)
                .get_net_access_point(id)
                .await?
                .is_some(),
        };
        if !exists {
            return Err(ReconcileError::MissingResource(format!("{} {}", resource_type, id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use outpost_cloud::{MemoryCloud, Tag};

    fn tenant() -> Tenant {
        Tenant::new("workload", "eu-west-2", "AK", "SK")
    }

    #[tokio::test]
    async fn test_pinned_wins_without_calls() {
        let cloud = MemoryCloud::new();
        let t = tenant();
        let tracker = Tracker::new(&cloud, &t, "uid-1");
        let mut map = ResourceMap::new();
        map.track("default", "vpc-cached");

        let target = Target::new("default")
            .pinned(Some("vpc-pinned"))
            .probe(Probe::Owner(ResourceType::Net));
        assert_eq!(tracker.resolve(&mut map, &target).await.unwrap(), "vpc-pinned");
        assert!(cloud.calls().is_empty());
        assert_eq!(map.get("default"), Some("vpc-cached"));
    }

    #[tokio::test]
    async fn test_owner_tag_before_name_tag() {
        let cloud = MemoryCloud::new();
        let t = tenant();
        let owned = cloud.add_net("10.0.0.0/16");
        cloud.tag_resource(&owned.net_id, Tag::owner("uid-1"));
        let legacy = cloud.add_net("10.1.0.0/16");
        cloud.tag_resource(&legacy.net_id, Tag::name("Net for demo"));

        let tracker = Tracker::new(&cloud, &t, "uid-1");
        let mut map = ResourceMap::new();
        let target = Target::new("default")
            .probe(Probe::Owner(ResourceType::Net))
            .probe(Probe::Name(ResourceType::Net, "Net for demo"));

        let id = tracker.resolve(&mut map, &target).await.unwrap();
        assert_eq!(id, owned.net_id);
        assert_eq!(map.get("default"), Some(owned.net_id.as_str()));
        assert_eq!(cloud.ops(), vec!["read_owned_by_tag"]);
    }

    #[tokio::test]
    async fn test_legacy_name_tag_fallback() {
        let cloud = MemoryCloud::new();
        let t = tenant();
        let legacy = cloud.add_net("10.1.0.0/16");
        cloud.tag_resource(&legacy.net_id, Tag::name("Net for demo"));

        let tracker = Tracker::new(&cloud, &t, "uid-1");
        let mut map = ResourceMap::new();
        let target = Target::new("default")
            .probe(Probe::Owner(ResourceType::Net))
            .probe(Probe::Name(ResourceType::Net, "Net for demo"));
        assert_eq!(tracker.resolve(&mut map, &target).await.unwrap(), legacy.net_id);
    }

    #[tokio::test]
    async fn test_not_found_when_exhausted() {
        let cloud = MemoryCloud::new();
        let t = tenant();
        let tracker = Tracker::new(&cloud, &t, "uid-1");
        let mut map = ResourceMap::new();
        let target = Target::new("10.0.2.0/24").probe(Probe::SubnetInNet {
            net_id: "vpc-1",
            ip_range: "10.0.2.0/24",
        });
        let err = tracker.resolve(&mut map, &target).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(map.is_empty());
        assert_eq!(cloud.count_prefix("create_"), 0);
    }

    #[tokio::test]
    async fn test_strict_reports_missing() {
        let cloud = MemoryCloud::new();
        let t = tenant();
        let net = cloud.add_net("10.0.0.0/16");
        let tracker = Tracker::new(&cloud, &t, "uid-1");

        tracker.resolve_strict(ResourceType::Net, &net.net_id).await.unwrap();
        cloud.remove(&net.net_id);
        let err = tracker
            .resolve_strict(ResourceType::Net, &net.net_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingResource);
        assert_eq!(cloud.count("read_owned_by_tag"), 0);
    }

    #[tokio::test]
    async fn test_strict_checks_route_tables_by_id() {
        let cloud = MemoryCloud::new();
        let t = tenant();
        let net = cloud.add_net("10.0.0.0/16");
        let table = cloud.add_route_table(&net.net_id, None);
        let tracker = Tracker::new(&cloud, &t, "uid-1");

        tracker
            .resolve_strict(ResourceType::RouteTable, &table.route_table_id)
            .await
            .unwrap();
        assert!(cloud.remove(&table.route_table_id));
        let err = tracker
            .resolve_strict(ResourceType::RouteTable, &table.route_table_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingResource);
        assert_eq!(cloud.ops(), vec!["get_route_table", "get_route_table"]);
    }
}
