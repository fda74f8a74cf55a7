mod common;

use common::Harness;
use outpost_controller::{ClusterReconciler, Outcome};
use outpost_core::{DEFAULT_KEY, Machine, Role};
use std::time::Duration;

#[tokio::test]
async fn test_deletion_waits_for_machines() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let machine = Machine::new("worker-0", "w0", "demo", Role::Worker);

    cluster.metadata.deletion_requested = true;
    h.cloud.clear_calls();
    let outcome = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, std::slice::from_ref(&machine))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Requeue(Duration::from_secs(10)));
    assert!(h.cloud.calls().is_empty());
    assert!(cluster.status.ready);
}

#[tokio::test]
async fn test_machines_of_other_clusters_do_not_block_deletion() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let stranger = Machine::new("worker-0", "w0", "other", Role::Worker);

    cluster.metadata.deletion_requested = true;
    let outcome = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[stranger])
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert!(h.cloud.nets().is_empty());
}

#[tokio::test]
async fn test_deletion_runs_in_reverse_order() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;

    cluster.metadata.deletion_requested = true;
    h.cloud.clear_calls();
    let outcome = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);

    assert_eq!(h.cloud.count("delete_load_balancer"), 1);
    assert_eq!(h.cloud.count("delete_security_group"), 4);
    assert_eq!(h.cloud.count("delete_route_table"), 3);
    assert_eq!(h.cloud.count("delete_nat_service"), 1);
    assert_eq!(h.cloud.count("delete_public_ip"), 1);
    assert_eq!(h.cloud.count("delete_internet_service"), 1);
    assert_eq!(h.cloud.count("delete_subnet"), 3);
    assert_eq!(h.cloud.count("delete_net"), 1);

    let at = |op: &str| h.cloud.position(op).unwrap();
    assert!(at("delete_load_balancer") < at("delete_security_group"));
    assert!(at("delete_security_group") < at("delete_route_table"));
    assert!(at("delete_route_table") < at("delete_nat_service"));
    assert!(at("delete_nat_service") < at("delete_public_ip"));
    assert!(at("delete_public_ip") < at("delete_internet_service"));
    assert!(at("delete_internet_service") < at("delete_subnet"));
    assert!(at("delete_subnet") < at("delete_net"));

    assert!(h.cloud.nets().is_empty());
    assert!(h.cloud.subnets().is_empty());
    assert!(h.cloud.public_ips().is_empty());
    assert!(h.cloud.security_groups().is_empty());
    assert!(h.cloud.load_balancers().is_empty());
    assert!(!cluster.status.ready);
    assert!(cluster.status.control_plane_endpoint.is_none());
    assert!(cluster.status.resources.net.is_empty());
    assert!(cluster.status.resources.public_ip.is_empty());
    assert!(h.recorder.reasons().contains(&"ClusterDeleted".to_string()));
}

#[tokio::test]
async fn test_deletion_tolerates_resources_removed_out_of_band() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;

    let lb = cluster
        .status
        .resources
        .load_balancer
        .get(DEFAULT_KEY)
        .unwrap()
        .to_string();
    let (_, sg) = cluster
        .status
        .resources
        .security_group
        .iter()
        .next()
        .map(|(k, id)| (k.to_string(), id.to_string()))
        .unwrap();
    let (_, subnet) = cluster
        .status
        .resources
        .subnet
        .iter()
        .next()
        .map(|(k, id)| (k.to_string(), id.to_string()))
        .unwrap();
    assert!(h.cloud.remove(&lb));
    assert!(h.cloud.remove(&sg));
    assert!(h.cloud.remove(&subnet));

    cluster.metadata.deletion_requested = true;
    let reconciler = ClusterReconciler::new(&h.services);
    let outcome = reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count("delete_load_balancer"), 0);
    assert!(h.cloud.nets().is_empty());

    // Deleting again finds nothing and succeeds
    h.cloud.clear_calls();
    let outcome = reconciler.reconcile(&mut cluster, &[]).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count_prefix("delete_"), 0);
}
