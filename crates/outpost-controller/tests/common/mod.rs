use outpost_cloud::{Image, MemoryCloud, Tenant};
use outpost_config::ControllerConfig;
use outpost_controller::{ClusterReconciler, Services};
use outpost_core::{Cluster, Machine, MemoryRecorder, NetworkSpec, Role};
use std::sync::Arc;

pub const REGION: &str = "eu-west-2";
pub const SUBREGION: &str = "eu-west-2a";

pub struct Harness {
    pub cloud: MemoryCloud,
    pub recorder: MemoryRecorder,
    pub services: Services,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let cloud = MemoryCloud::new();
        let recorder = MemoryRecorder::new();
        let services = Services::new(Arc::new(cloud.clone()), tenant("workload"))
            .with_recorder(Arc::new(recorder.clone()))
            .with_config(config);
        Self {
            cloud,
            recorder,
            services,
        }
    }

    /// Reconcile `cluster` once, expecting it to become ready
    #[allow(dead_code)]
    pub async fn ready(&self, cluster: &mut Cluster) {
        ClusterReconciler::new(&self.services)
            .reconcile(cluster, &[])
            .await
            .unwrap();
        assert!(cluster.status.ready, "cluster did not become ready");
    }
}

pub fn tenant(name: &str) -> Tenant {
    Tenant::new(name, REGION, "AK", "SK")
}

pub fn network() -> NetworkSpec {
    NetworkSpec {
        subregion_name: SUBREGION.into(),
        ..Default::default()
    }
}

pub fn cluster() -> Cluster {
    Cluster::new("demo", "3f1c9a", network())
}

#[allow(dead_code)]
pub fn machine(name: &str, role: Role, image: &Image) -> Machine {
    let mut machine = Machine::new(name, format!("{}-uid", name), "demo", role);
    machine.spec.vm.image.id = image.image_id.clone();
    machine
}
