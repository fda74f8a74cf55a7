mod common;

use common::Harness;
use outpost_cloud::{CloudError, VmState};
use outpost_controller::{ClusterReconciler, ErrorKind, Outcome};
use outpost_core::{ConditionType, DEFAULT_KEY, EventType};
use std::time::Duration;

#[tokio::test]
async fn test_fresh_cluster_creates_each_resource_once() {
    let h = Harness::new();
    let mut cluster = common::cluster();

    let outcome = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Done);
    assert!(cluster.status.ready);
    assert_eq!(h.cloud.count("create_net"), 1);
    assert_eq!(h.cloud.count("create_subnet"), 3);
    assert_eq!(h.cloud.count("create_internet_service"), 1);
    assert_eq!(h.cloud.count("link_internet_service"), 1);
    assert_eq!(h.cloud.count("create_route_table"), 3);
    assert_eq!(h.cloud.count("link_route_table"), 3);
    assert_eq!(h.cloud.count("create_route"), 3);
    assert_eq!(h.cloud.count("create_public_ip"), 1);
    assert_eq!(h.cloud.count("create_nat_service"), 1);
    assert_eq!(h.cloud.count("create_security_group"), 4);
    assert_eq!(h.cloud.count("create_load_balancer"), 1);
    assert_eq!(h.cloud.count("create_vm"), 0);

    let endpoint = cluster.status.control_plane_endpoint.clone().unwrap();
    assert_eq!(endpoint.host, "demo-k8s.eu-west-2.lbu.outscale.com");
    assert_eq!(endpoint.port, 6443);
    assert_eq!(cluster.status.failure_domains, vec![common::SUBREGION.to_string()]);
    assert!(cluster.status.conditions.is_true(ConditionType::SecurityGroupsReady));
    assert!(h.recorder.reasons().contains(&"ClusterReady".to_string()));
}

#[tokio::test]
async fn test_second_pass_creates_nothing() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    let reconciler = ClusterReconciler::new(&h.services);
    reconciler.reconcile(&mut cluster, &[]).await.unwrap();

    h.cloud.clear_calls();
    reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    assert_eq!(h.cloud.count_prefix("create_"), 0);
    assert_eq!(h.cloud.count_prefix("delete_"), 0);

    // Without generation markers every step looks again and still finds everything
    cluster.status.reconcilers.clear();
    h.cloud.clear_calls();
    let outcome = reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count_prefix("create_"), 0);
    assert_eq!(h.cloud.count_prefix("link_"), 0);
    assert_eq!(h.cloud.count_prefix("delete_"), 0);
}

#[tokio::test]
async fn test_lost_status_is_rebuilt_from_provider_lookups() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    let reconciler = ClusterReconciler::new(&h.services);
    reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    let net_id = cluster.status.resources.net.get(DEFAULT_KEY).unwrap().to_string();

    let mut fresh = common::cluster();
    h.cloud.clear_calls();
    reconciler.reconcile(&mut fresh, &[]).await.unwrap();

    assert_eq!(h.cloud.count("create_net"), 0);
    assert_eq!(h.cloud.count("create_subnet"), 0);
    assert_eq!(h.cloud.count("create_nat_service"), 0);
    assert_eq!(h.cloud.count("create_security_group"), 0);
    assert_eq!(h.cloud.count("create_load_balancer"), 0);
    assert_eq!(fresh.status.resources.net.get(DEFAULT_KEY), Some(net_id.as_str()));
    assert_eq!(fresh.status.resources.subnet.len(), 3);
}

#[tokio::test]
async fn test_steps_run_in_dependency_order() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap();

    let at = |op: &str| h.cloud.position(op).unwrap();
    assert!(at("create_net") < at("create_subnet"));
    assert!(at("create_subnet") < at("create_internet_service"));
    assert!(at("link_internet_service") < at("create_route_table"));
    assert!(at("create_route_table") < at("create_nat_service"));
    assert!(at("create_nat_service") < at("create_security_group"));
    assert!(at("create_security_group") < at("create_load_balancer"));
}

#[tokio::test]
async fn test_failed_step_aborts_the_pass() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    let reconciler = ClusterReconciler::new(&h.services);
    h.cloud
        .fail_next("create_nat_service", CloudError::Throttled("slow down".into()));

    let err = reconciler.reconcile(&mut cluster, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cloud);
    assert!(!cluster.status.ready);
    assert_eq!(h.cloud.count("create_security_group"), 0);
    assert_eq!(h.cloud.count("create_load_balancer"), 0);

    let condition = cluster
        .status
        .conditions
        .get(ConditionType::NatServicesReady)
        .unwrap();
    assert!(!condition.status);
    assert_eq!(condition.reason, "NatServicesReconciliationFailed");
    assert!(cluster.status.conditions.is_true(ConditionType::NetReady));
    let warnings: Vec<String> = h
        .recorder
        .events()
        .into_iter()
        .filter(|e| e.event_type == EventType::Warning)
        .map(|e| e.reason)
        .collect();
    assert_eq!(warnings, vec!["NatServicesReconciliationFailed".to_string()]);

    // The address allocated before the failure is reused
    reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    assert!(cluster.status.ready);
    assert_eq!(h.cloud.count("create_public_ip"), 1);
    assert_eq!(h.cloud.count("create_nat_service"), 2);
    assert!(cluster.status.conditions.is_true(ConditionType::NatServicesReady));
}

#[tokio::test]
async fn test_disabled_internet_skips_gateway_and_nat() {
    let h = Harness::new();
    let mut network = common::network();
    network.disable.internet = true;
    let mut cluster = outpost_core::Cluster::new("demo", "3f1c9a", network);

    h.ready(&mut cluster).await;
    assert_eq!(h.cloud.count("create_internet_service"), 0);
    assert_eq!(h.cloud.count("create_nat_service"), 0);
    assert_eq!(h.cloud.count("create_route"), 0);
    assert_eq!(h.cloud.count("create_route_table"), 3);
}

#[tokio::test]
async fn test_bastion_gates_readiness() {
    let h = Harness::new();
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let mut network = common::network();
    network.bastion.enable = true;
    network.bastion.image.id = image.image_id.clone();
    let mut cluster = outpost_core::Cluster::new("demo", "3f1c9a", network);
    let reconciler = ClusterReconciler::new(&h.services);

    let outcome = reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    assert_eq!(outcome, Outcome::Requeue(Duration::from_secs(30)));
    assert!(!cluster.status.ready);
    assert_eq!(cluster.status.bastion_state, Some(VmState::Pending));
    assert_eq!(h.cloud.count("create_security_group"), 5);
    assert_eq!(h.cloud.count("create_public_ip"), 2);

    let bastion_id = cluster
        .status
        .resources
        .bastion
        .get(DEFAULT_KEY)
        .unwrap()
        .to_string();
    let vm = h
        .cloud
        .vms()
        .into_iter()
        .find(|vm| vm.vm_id == bastion_id)
        .unwrap();
    assert!(vm.public_ip.is_some());

    h.cloud.set_vm_state(&bastion_id, VmState::Running);
    let outcome = reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert!(cluster.status.ready);
    assert_eq!(h.cloud.count("create_vm"), 1);
}
