//! Derived machine placement and naming

use super::client_token;
use crate::model::{Cluster, Machine, VolumeSpec};
use crate::status::Reconciler;

/// Prefix of provider ids set on machines
pub const PROVIDER_ID_PREFIX: &str = "aws:///";

impl Machine {
    /// Idempotency token of the VM creation
    pub fn vm_client_token(&self, cluster: &Cluster) -> String {
        client_token(self.name(), cluster.uid())
    }

    /// Name tag set on VMs created before client tokens were recorded
    pub fn legacy_vm_name(&self, cluster: &Cluster) -> String {
        format!("{}-{}", self.name(), cluster.uid())
    }

    /// Subnet name and subregion the VM is placed in
    ///
    /// A failure domain naming one of the cluster subregions pins the
    /// subregion; any other value is taken as a subnet name.
    pub fn placement(&self, cluster: &Cluster) -> (String, String) {
        let vm = &self.spec.vm;
        let mut subnet = vm.subnet_name.clone();
        let mut subregion = vm.subregion_name.clone();
        if let Some(fd) = self.spec.failure_domain.as_deref().filter(|fd| !fd.is_empty()) {
            if cluster.subregions().iter().any(|s| s == fd) {
                subregion = fd.to_string();
                subnet.clear();
            } else {
                subnet = fd.to_string();
            }
        }
        (subnet, subregion)
    }

    /// Name tag of a machine volume, unique per machine
    pub fn volume_name(&self, volume: &VolumeSpec) -> String {
        format!("{}-{}", volume.name, self.uid())
    }

    pub fn set_provider_id(&mut self, subregion: &str, vm_id: &str) {
        self.spec.provider_id = Some(format!("{}{}/{}", PROVIDER_ID_PREFIX, subregion, vm_id));
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
    use crate::model::{Cluster, Machine, NetworkSpec, Role, VolumeSpec};

    fn cluster() -> Cluster {
        Cluster::new(
            "demo",
            "3f1c",
            NetworkSpec {
                subregions: vec!["eu-west-2a".into(), "eu-west-2b".into()],
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_failure_domain_as_subregion() {
        let c = cluster();
        let mut m = Machine::new("demo-cp-0", "m1", "demo", Role::ControlPlane);
        m.spec.vm.subnet_name = "custom".into();
        m.spec.failure_domain = Some("eu-west-2b".into());
        assert_eq!(m.placement(&c), (String::new(), "eu-west-2b".to_string()));
    }

    #[test]
    fn test_failure_domain_as_subnet_name() {
        let c = cluster();
        let mut m = Machine::new("demo-md-0", "m2", "demo", Role::Worker);
        m.spec.failure_domain = Some("Worker subnet for demo/eu-west-2a".into());
        let (subnet, subregion) = m.placement(&c);
        assert_eq!(subnet, "Worker subnet for demo/eu-west-2a");
        assert!(subregion.is_empty());
    }

    #[test]
    fn test_naming() {
        let c = cluster();
        let mut m = Machine::new("demo-md-0", "m2", "demo", Role::Worker);
        assert_eq!(m.vm_client_token(&c), "demo-md-0-3f1c");
        assert_eq!(m.legacy_vm_name(&c), "demo-md-0-3f1c");
        let data = VolumeSpec {
            name: "data".into(),
            ..Default::default()
        };
        assert_eq!(m.volume_name(&data), "data-m2");
        m.set_provider_id("eu-west-2a", "i-1234");
        assert_eq!(m.spec.provider_id.as_deref(), Some("aws:///eu-west-2a/i-1234"));
    }
}
