pub mod defaults;
pub mod simulate;

use anyhow::Context;
use clap::Args;
use outpost_core::{Cluster, Machine, NetworkSpec};
use serde::Deserialize;
use std::path::PathBuf;

/// Where the cluster comes from: a manifest, or flags describing a default one
#[derive(Args)]
pub struct ClusterArgs {
    /// YAML manifest with a `cluster` and optional `machines`
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,
    /// Cluster name
    #[arg(long, default_value = "demo")]
    pub name: String,
    /// Cluster uid, used in tags and client tokens
    #[arg(long, default_value = "5e1f0c2a")]
    pub uid: String,
    /// Region of the workload tenant
    #[arg(long, env = "OSC_REGION", default_value = "eu-west-2")]
    pub region: String,
    /// Subregion of the default subnets (`<region>a` when omitted)
    #[arg(long)]
    pub subregion: Option<String>,
    /// Add a bastion VM and its security group
    #[arg(long)]
    pub bastion: bool,
}

#[derive(Deserialize)]
pub struct Manifest {
    pub cluster: Cluster,
    #[serde(default)]
    pub machines: Vec<Machine>,
}

impl ClusterArgs {
    pub fn read_manifest(&self) -> anyhow::Result<Option<Manifest>> {
        let Some(path) = &self.manifest else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        Ok(Some(manifest))
    }

    /// The cluster described by the flags
    pub fn cluster(&self) -> Cluster {
        let mut network = NetworkSpec {
            subregion_name: self
                .subregion
                .clone()
                .unwrap_or_else(|| format!("{}a", self.region)),
            ..Default::default()
        };
        network.bastion.enable = self.bastion;
        Cluster::new(&self.name, &self.uid, network)
    }

    /// The manifest cluster when given, the flag cluster otherwise
    pub fn load(&self) -> anyhow::Result<(Cluster, Option<Vec<Machine>>)> {
        match self.read_manifest()? {
            Some(manifest) => Ok((manifest.cluster, Some(manifest.machines))),
            None => Ok((self.cluster(), None)),
        }
    }
}
