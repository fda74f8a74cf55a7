mod common;

use common::Harness;
use outpost_controller::{ClusterReconciler, ErrorKind};
use outpost_core::{Cluster, ConditionType};

#[tokio::test]
async fn test_pinned_net_is_used_as_is() {
    let h = Harness::new();
    let net = h.cloud.add_net("10.0.0.0/16");
    let mut network = common::network();
    network.net.resource_id = Some(net.net_id.clone());
    let mut cluster = Cluster::new("demo", "3f1c9a", network);

    h.ready(&mut cluster).await;

    assert_eq!(h.cloud.count("create_net"), 0);
    assert_eq!(h.cloud.nets().len(), 1);
    assert!(h.cloud.subnets().iter().all(|s| s.net_id == net.net_id));
}

#[tokio::test]
async fn test_vanished_pinned_net_is_missing_resource() {
    let h = Harness::new();
    let net = h.cloud.add_net("10.0.0.0/16");
    assert!(h.cloud.remove(&net.net_id));
    let mut network = common::network();
    network.net.resource_id = Some(net.net_id.clone());
    let mut cluster = Cluster::new("demo", "3f1c9a", network);

    let err = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingResource);
    assert_eq!(h.cloud.count("create_net"), 0);
    assert_eq!(h.cloud.count("create_subnet"), 0);
    assert!(!cluster.status.conditions.is_true(ConditionType::NetReady));
}

#[tokio::test]
async fn test_internet_service_of_another_net_is_refused() {
    let h = Harness::new();
    let other = h.cloud.add_net("172.16.0.0/16");
    let api = h.services.cloud.internet_service(&h.services.tenant);
    let igw = api.create_internet_service("someone-else", "igw-other").await.unwrap();
    api.link_internet_service(&igw.internet_service_id, &other.net_id)
        .await
        .unwrap();
    let mut network = common::network();
    network.internet_service.resource_id = Some(igw.internet_service_id.clone());
    let mut cluster = Cluster::new("demo", "3f1c9a", network);
    h.cloud.clear_calls();

    let err = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingResource);
    assert_eq!(h.cloud.count("link_internet_service"), 0);
    assert_eq!(h.cloud.count("create_nat_service"), 0);
    assert!(!cluster.status.conditions.is_true(ConditionType::InternetServicesReady));
    let linked = h
        .cloud
        .internet_services()
        .into_iter()
        .find(|i| i.internet_service_id == igw.internet_service_id)
        .unwrap();
    assert_eq!(linked.net_id.as_deref(), Some(other.net_id.as_str()));
}
