//! Machine object

use super::cluster::ObjectMeta;
use super::network::{ImageSpec, Role};
use crate::status::{Conditions, Generations, MachineResources};
use outpost_cloud::VmState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extra block device created with the machine and linked to its VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSpec {
    pub name: String,
    pub device_name: String,
    /// Size in GiB
    pub size: u32,
    pub volume_type: String,
    /// Only meaningful for `io1`
    pub iops: Option<u32>,
    pub subregion_name: String,
    pub resource_id: Option<String>,
}

impl Default for VolumeSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            device_name: String::new(),
            size: 0,
            volume_type: "standard".to_string(),
            iops: None,
            subregion_name: String::new(),
            resource_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmSpec {
    pub resource_id: Option<String>,
    pub vm_type: String,
    pub image: ImageSpec,
    pub keypair_name: String,
    /// Delete the keypair along with the machine
    pub delete_keypair: bool,
    pub subnet_name: String,
    pub subregion_name: String,
    pub security_group_names: Vec<String>,
    pub private_ips: Vec<String>,
    pub public_ip: bool,
    /// Shared pool to draw the public IP from; dedicated allocation when empty
    pub public_ip_pool: String,
    pub volumes: Vec<VolumeSpec>,
    pub tags: BTreeMap<String, String>,
}

impl Default for VmSpec {
    fn default() -> Self {
        Self {
            resource_id: None,
            vm_type: "tinav3.c4r8p1".to_string(),
            image: ImageSpec::default(),
            keypair_name: String::new(),
            delete_keypair: false,
            subnet_name: String::new(),
            subregion_name: String::new(),
            security_group_names: Vec::new(),
            private_ips: Vec::new(),
            public_ip: false,
            public_ip_pool: String::new(),
            volumes: Vec::new(),
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub cluster_name: String,
    /// `worker` or `controlplane`
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub vm: VmSpec,
    /// Subregion (or legacy subnet name) the machine is pinned to
    #[serde(default)]
    pub failure_domain: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub bootstrap_data: Option<String>,
}

fn default_role() -> Role {
    Role::Worker
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressKind {
    InternalIp,
    ExternalIp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub kind: AddressKind,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineStatus {
    pub ready: bool,
    pub vm_state: Option<VmState>,
    pub addresses: Vec<NodeAddress>,
    pub failure_domain: Option<String>,
    pub resources: MachineResources,
    pub reconcilers: Generations,
    pub conditions: Conditions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub metadata: ObjectMeta,
    pub spec: MachineSpec,
    #[serde(default)]
    pub status: MachineStatus,
}

impl Machine {
    pub fn new(
        name: impl Into<String>,
        uid: impl Into<String>,
        cluster_name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(name, uid),
            spec: MachineSpec {
                cluster_name: cluster_name.into(),
                role,
                vm: VmSpec::default(),
                failure_domain: None,
                provider_id: None,
                bootstrap_data: None,
            },
            status: MachineStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    pub fn is_control_plane(&self) -> bool {
        self.spec.role == Role::ControlPlane
    }
}
