//! Per-resource-kind service traits
//!
//! Each resource kind exposes a fixed capability set. Reads return `Ok(None)`
//! when the provider has no matching resource; only transport, permission or
//! validation failures are errors.

use crate::error::Result;
use crate::model::{
    HealthCheck, Image, InternetService, Keypair, LoadBalancer, LoadBalancerRequest, NatService,
    Net, NetAccessPoint, NetPeering, PublicIp, RouteTable, RouteTarget, RuleRequest,
    SecurityGroup, Subnet, Vm, VmRequest, Volume, VolumeRequest,
};
use crate::tag::{ResourceTag, ResourceType};
use crate::tenant::Tenant;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait NetApi: Send + Sync {
    async fn get_net(&self, net_id: &str) -> Result<Option<Net>>;
    async fn create_net(&self, ip_range: &str, cluster_uid: &str, name: &str) -> Result<Net>;
    async fn delete_net(&self, net_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SubnetApi: Send + Sync {
    async fn get_subnet(&self, subnet_id: &str) -> Result<Option<Subnet>>;
    async fn get_subnet_from_net(&self, net_id: &str, ip_range: &str) -> Result<Option<Subnet>>;
    async fn create_subnet(
        &self,
        net_id: &str,
        ip_range: &str,
        subregion: &str,
        cluster_uid: &str,
        name: &str,
    ) -> Result<Subnet>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;
}

#[async_trait]
pub trait InternetServiceApi: Send + Sync {
    async fn get_internet_service(&self, internet_service_id: &str)
    -> Result<Option<InternetService>>;
    async fn get_internet_service_for_net(&self, net_id: &str) -> Result<Option<InternetService>>;
    async fn create_internet_service(&self, cluster_uid: &str, name: &str)
    -> Result<InternetService>;
    async fn link_internet_service(&self, internet_service_id: &str, net_id: &str) -> Result<()>;
    async fn unlink_internet_service(&self, internet_service_id: &str, net_id: &str) -> Result<()>;
    async fn delete_internet_service(&self, internet_service_id: &str) -> Result<()>;
}

#[async_trait]
pub trait RouteTableApi: Send + Sync {
    async fn get_route_table(&self, route_table_id: &str) -> Result<Option<RouteTable>>;
    async fn get_route_tables_from_net(&self, net_id: &str) -> Result<Vec<RouteTable>>;
    async fn create_route_table(&self, net_id: &str, cluster_uid: &str, name: &str)
    -> Result<RouteTable>;
    /// Returns the link identifier
    async fn link_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<String>;
    async fn unlink_route_table(&self, link_route_table_id: &str) -> Result<()>;
    async fn create_route(
        &self,
        route_table_id: &str,
        destination_ip_range: &str,
        target: &RouteTarget,
    ) -> Result<RouteTable>;
    async fn delete_route(&self, route_table_id: &str, destination_ip_range: &str) -> Result<()>;
    async fn delete_route_table(&self, route_table_id: &str) -> Result<()>;
}

#[async_trait]
pub trait NatServiceApi: Send + Sync {
    async fn get_nat_service(&self, nat_service_id: &str) -> Result<Option<NatService>>;
    async fn get_nat_service_from_client_token(&self, client_token: &str)
    -> Result<Option<NatService>>;
    async fn list_nat_services(&self, net_id: &str) -> Result<Vec<NatService>>;
    async fn create_nat_service(
        &self,
        public_ip_id: &str,
        subnet_id: &str,
        client_token: &str,
        cluster_uid: &str,
        name: &str,
    ) -> Result<NatService>;
    async fn delete_nat_service(&self, nat_service_id: &str) -> Result<()>;
}

#[async_trait]
pub trait PublicIpApi: Send + Sync {
    async fn get_public_ip(&self, public_ip_id: &str) -> Result<Option<PublicIp>>;
    async fn get_public_ip_by_ip(&self, public_ip: &str) -> Result<Option<PublicIp>>;
    async fn list_public_ips_from_pool(&self, pool: &str) -> Result<Vec<PublicIp>>;
    async fn create_public_ip(&self, cluster_uid: &str, name: &str) -> Result<PublicIp>;
    async fn delete_public_ip(&self, public_ip_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SecurityGroupApi: Send + Sync {
    async fn get_security_group(&self, security_group_id: &str) -> Result<Option<SecurityGroup>>;
    async fn get_security_group_from_name(&self, net_id: &str, name: &str)
    -> Result<Option<SecurityGroup>>;
    async fn list_security_groups_from_net(&self, net_id: &str) -> Result<Vec<SecurityGroup>>;
    async fn create_security_group(
        &self,
        net_id: &str,
        cluster_uid: &str,
        name: &str,
        description: &str,
        main_tag: bool,
    ) -> Result<SecurityGroup>;
    async fn create_security_group_rule(
        &self,
        security_group_id: &str,
        rule: &RuleRequest,
    ) -> Result<SecurityGroup>;
    async fn delete_security_group_rule(&self, security_group_id: &str, rule: &RuleRequest)
    -> Result<()>;
    async fn delete_security_group(&self, security_group_id: &str) -> Result<()>;
}

#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn get_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>>;
    async fn create_load_balancer(&self, request: &LoadBalancerRequest) -> Result<LoadBalancer>;
    async fn configure_health_check(&self, name: &str, health_check: &HealthCheck)
    -> Result<LoadBalancer>;
    async fn link_backend_vms(&self, name: &str, vm_ids: &[String]) -> Result<()>;
    async fn unlink_backend_vms(&self, name: &str, vm_ids: &[String]) -> Result<()>;
    async fn delete_load_balancer(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait VmApi: Send + Sync {
    async fn get_vm(&self, vm_id: &str) -> Result<Option<Vm>>;
    async fn get_vm_from_client_token(&self, client_token: &str) -> Result<Option<Vm>>;
    async fn create_vm(&self, request: &VmRequest) -> Result<Vm>;
    async fn delete_vm(&self, vm_id: &str) -> Result<()>;
}

#[async_trait]
pub trait VolumeApi: Send + Sync {
    async fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>>;
    async fn create_volume(&self, request: &VolumeRequest) -> Result<Volume>;
    async fn link_volume(&self, volume_id: &str, vm_id: &str, device_name: &str) -> Result<()>;
    async fn unlink_volume(&self, volume_id: &str) -> Result<()>;
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;
}

/// Keypairs are addressed by name
#[async_trait]
pub trait KeypairApi: Send + Sync {
    async fn get_keypair(&self, name: &str) -> Result<Option<Keypair>>;
    async fn create_keypair(&self, name: &str) -> Result<Keypair>;
    async fn delete_keypair(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn get_image(&self, image_id: &str) -> Result<Option<Image>>;
    async fn get_image_by_name(&self, name: &str, account_id: Option<&str>)
    -> Result<Option<Image>>;
}

#[async_trait]
pub trait NetPeeringApi: Send + Sync {
    async fn get_net_peering(&self, net_peering_id: &str) -> Result<Option<NetPeering>>;
    async fn list_net_peerings(&self, net_id: &str) -> Result<Vec<NetPeering>>;
    async fn create_net_peering(
        &self,
        net_id: &str,
        accepter_net_id: &str,
        accepter_account_id: &str,
        cluster_uid: &str,
    ) -> Result<NetPeering>;
    async fn accept_net_peering(&self, net_peering_id: &str) -> Result<()>;
    async fn delete_net_peering(&self, net_peering_id: &str) -> Result<()>;
}

#[async_trait]
pub trait NetAccessPointApi: Send + Sync {
    async fn get_net_access_point(&self, id: &str) -> Result<Option<NetAccessPoint>>;
    async fn get_net_access_point_for(
        &self,
        net_id: &str,
        region: &str,
        service: &str,
    ) -> Result<Option<NetAccessPoint>>;
    async fn list_net_access_points(&self, net_id: &str) -> Result<Vec<NetAccessPoint>>;
    async fn create_net_access_point(
        &self,
        net_id: &str,
        region: &str,
        service: &str,
        route_table_ids: &[String],
        cluster_uid: &str,
    ) -> Result<NetAccessPoint>;
    async fn delete_net_access_point(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait TagApi: Send + Sync {
    /// First resource of `resource_type` carrying the owner tag of `cluster_uid`
    async fn read_owned_by_tag(
        &self,
        resource_type: ResourceType,
        cluster_uid: &str,
    ) -> Result<Option<ResourceTag>>;
    async fn read_tag(
        &self,
        resource_type: ResourceType,
        key: &str,
        value: &str,
    ) -> Result<Option<ResourceTag>>;
    async fn add_tag(&self, resource_id: &str, key: &str, value: &str) -> Result<()>;
}

/// Entry point to the provider: hands out service clients bound to a tenant
pub trait Cloud: Send + Sync {
    fn net(&self, tenant: &Tenant) -> Arc<dyn NetApi>;
    fn subnet(&self, tenant: &Tenant) -> Arc<dyn SubnetApi>;
    fn internet_service(&self, tenant: &Tenant) -> Arc<dyn InternetServiceApi>;
    fn route_table(&self, tenant: &Tenant) -> Arc<dyn RouteTableApi>;
    fn nat_service(&self, tenant: &Tenant) -> Arc<dyn NatServiceApi>;
    fn public_ip(&self, tenant: &Tenant) -> Arc<dyn PublicIpApi>;
    fn security_group(&self, tenant: &Tenant) -> Arc<dyn SecurityGroupApi>;
    fn load_balancer(&self, tenant: &Tenant) -> Arc<dyn LoadBalancerApi>;
    fn vm(&self, tenant: &Tenant) -> Arc<dyn VmApi>;
    fn volume(&self, tenant: &Tenant) -> Arc<dyn VolumeApi>;
    fn keypair(&self, tenant: &Tenant) -> Arc<dyn KeypairApi>;
    fn image(&self, tenant: &Tenant) -> Arc<dyn ImageApi>;
    fn net_peering(&self, tenant: &Tenant) -> Arc<dyn NetPeeringApi>;
    fn net_access_point(&self, tenant: &Tenant) -> Arc<dyn NetAccessPointApi>;
    fn tag(&self, tenant: &Tenant) -> Arc<dyn TagApi>;
}
