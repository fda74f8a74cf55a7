//! Cluster object

use super::network::NetworkSpec;
use crate::status::{ClusterResources, Conditions, Generations};
use outpost_cloud::VmState;
use serde::{Deserialize, Serialize};

/// Identity shared by every reconciled object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub uid: String,
    /// Bumped on every spec change
    #[serde(default = "default_generation")]
    pub generation: i64,
    #[serde(default)]
    pub deletion_requested: bool,
}

fn default_generation() -> i64 {
    1
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            generation: 1,
            deletion_requested: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    pub network: NetworkSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStatus {
    pub ready: bool,
    pub resources: ClusterResources,
    pub reconcilers: Generations,
    pub conditions: Conditions,
    pub control_plane_endpoint: Option<ApiEndpoint>,
    pub bastion_state: Option<VmState>,
    /// Subregions machines may be placed in
    pub failure_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Cluster {
    pub fn new(name: impl Into<String>, uid: impl Into<String>, network: NetworkSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(name, uid),
            spec: ClusterSpec { network },
            status: ClusterStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    pub fn network(&self) -> &NetworkSpec {
        &self.spec.network
    }
}
