//! Declarative objects reconciled by the controller
//!
//! A [`Cluster`] owns the network infrastructure; a [`Machine`] owns one VM
//! placed inside it.

mod cluster;
mod machine;
mod network;

// Re-exports
pub use cluster::*;
pub use machine::*;
pub use network::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_from_yaml_like_json() {
        let json = r#"{
            "metadata": {"name": "demo", "uid": "3f1c"},
            "spec": {"network": {"subregion_name": "eu-west-2a", "bastion": {"enable": true}}}
        }"#;
        let cluster: Cluster = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.name(), "demo");
        assert_eq!(cluster.metadata.generation, 1);
        assert!(cluster.network().bastion.enable);
        assert_eq!(cluster.network().bastion.vm_type, "tinav3.c2r2p1");
        assert!(!cluster.status.ready);
    }

    #[test]
    fn test_machine_defaults_to_worker() {
        let json = r#"{
            "metadata": {"name": "demo-md-0", "uid": "a1"},
            "spec": {"cluster_name": "demo"}
        }"#;
        let machine: Machine = serde_json::from_str(json).unwrap();
        assert!(!machine.is_control_plane());
        assert_eq!(machine.spec.vm.vm_type, "tinav3.c4r8p1");
    }
}
