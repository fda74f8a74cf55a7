//! Tag vocabulary
//!
//! Tags are only ever used as lookup predicates: the owner tag written on
//! creation and the legacy `Name` tag of resources created by older releases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of the legacy name tag
pub const NAME_KEY: &str = "Name";

/// Prefix of the owner tag key, followed by the cluster uid
pub const OWNER_KEY_PREFIX: &str = "OscK8sClusterID/";

/// Value carried by owner tags
pub const OWNED_VALUE: &str = "owned";

/// Key of the tag the cloud controller manager uses to map VMs to nodes
pub const NODE_NAME_KEY: &str = "OscK8sNodeName";

/// Prefix of the tag marking the main security group of a cluster
pub const MAIN_SG_KEY_PREFIX: &str = "OscK8sMainSG/";

/// Prefix of the tag carrying a subnet role
pub const ROLE_KEY_PREFIX: &str = "OscK8sRole/";

/// Key of the tag naming the shared pool a public IP belongs to
pub const POOL_KEY: &str = "OscK8sIPPool";

/// Key of the tag asking the provider to attach a public IP on VM boot
pub const AUTO_ATTACH_PUBLIC_IP_KEY: &str = "osc.fcu.eip.auto-attach";

/// Closed set of taggable resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Net,
    Subnet,
    InternetService,
    RouteTable,
    NatService,
    PublicIp,
    SecurityGroup,
    LoadBalancer,
    Vm,
    Image,
    NetPeering,
    NetAccessPoint,
    Volume,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Net => "vpc",
            ResourceType::Subnet => "subnet",
            ResourceType::InternetService => "internet-gateway",
            ResourceType::RouteTable => "route-table",
            ResourceType::NatService => "natgateway",
            ResourceType::PublicIp => "public-ip",
            ResourceType::SecurityGroup => "security-group",
            ResourceType::LoadBalancer => "load-balancer",
            ResourceType::Vm => "instance",
            ResourceType::Image => "image",
            ResourceType::NetPeering => "vpc-peering-connection",
            ResourceType::NetAccessPoint => "vpc-endpoint",
            ResourceType::Volume => "volume",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key/value pair attached to a provider resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new(NAME_KEY, value)
    }

    /// Owner tag for a cluster uid
    pub fn owner(cluster_uid: &str) -> Self {
        Self::new(owner_key(cluster_uid), OWNED_VALUE)
    }
}

/// A tag found on a resource by a tag lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTag {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub key: String,
    pub value: String,
}

pub fn owner_key(cluster_uid: &str) -> String {
    format!("{}{}", OWNER_KEY_PREFIX, cluster_uid)
}

/// Value of `key` among `tags`, if present
pub fn tag_value<'a>(key: &str, tags: &'a [Tag]) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_tag() {
        let tag = Tag::owner("3f1c");
        assert_eq!(tag.key, "OscK8sClusterID/3f1c");
        assert_eq!(tag.value, "owned");
    }

    #[test]
    fn test_tag_value() {
        let tags = vec![Tag::name("web"), Tag::new(POOL_KEY, "edge")];
        assert_eq!(tag_value(POOL_KEY, &tags), Some("edge"));
        assert_eq!(tag_value(NODE_NAME_KEY, &tags), None);
    }
}
