mod common;

use common::Harness;
use outpost_cloud::{NetPeeringState, RouteTarget};
use outpost_controller::{ClusterReconciler, ErrorKind, Outcome};
use outpost_core::{Cluster, ConditionType, DEFAULT_KEY};

const MANAGEMENT_RANGE: &str = "10.99.0.0/16";

fn peered_cluster(management_net_id: &str) -> Cluster {
    let mut network = common::network();
    network.net_peering.enable = true;
    network.net_peering.management_account_id = "123456789012".into();
    network.net_peering.management_net_id = management_net_id.into();
    Cluster::new("demo", "3f1c9a", network)
}

#[tokio::test]
async fn test_peering_is_accepted_from_management_tenant() {
    let mut h = Harness::new();
    let management = h.cloud.add_net(MANAGEMENT_RANGE);
    let management_table = h.cloud.add_route_table(&management.net_id, None);
    h.services = h.services.with_management(common::tenant("management"));
    let mut cluster = peered_cluster(&management.net_id);

    h.ready(&mut cluster).await;

    let calls = h.cloud.calls();
    let created = calls.iter().find(|c| c.op == "create_net_peering").unwrap();
    assert_eq!(created.tenant, "workload");
    let accepted = calls.iter().find(|c| c.op == "accept_net_peering").unwrap();
    assert_eq!(accepted.tenant, "management");

    let peering_id = cluster
        .status
        .resources
        .net_peering
        .get(DEFAULT_KEY)
        .unwrap()
        .to_string();
    let peering = &h.cloud.net_peerings()[0];
    assert_eq!(peering.net_peering_id, peering_id);
    assert_eq!(peering.state, NetPeeringState::Active);
    assert_eq!(peering.accepter_net_id, management.net_id);

    let target = RouteTarget::NetPeering(peering_id.clone());
    for table in h.cloud.route_tables() {
        if table.route_table_id == management_table.route_table_id {
            let route = table
                .routes
                .iter()
                .find(|r| r.destination_ip_range == "10.0.0.0/16")
                .unwrap();
            assert_eq!(route.target, target);
        } else {
            assert!(table.has_route_to(MANAGEMENT_RANGE));
        }
    }
    assert!(cluster.status.conditions.is_true(ConditionType::NetPeeringReady));
}

#[tokio::test]
async fn test_deletion_removes_management_routes() {
    let mut h = Harness::new();
    let management = h.cloud.add_net(MANAGEMENT_RANGE);
    let management_table = h.cloud.add_route_table(&management.net_id, None);
    h.services = h.services.with_management(common::tenant("management"));
    let mut cluster = peered_cluster(&management.net_id);
    h.ready(&mut cluster).await;

    cluster.metadata.deletion_requested = true;
    let outcome = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count("delete_net_peering"), 1);
    assert!(cluster.status.resources.net_peering.is_empty());

    let table = h
        .cloud
        .route_tables()
        .into_iter()
        .find(|t| t.route_table_id == management_table.route_table_id)
        .unwrap();
    assert!(table.routes.is_empty());
    assert_eq!(h.cloud.nets().len(), 1);
    assert!(!h.cloud.net_peerings()[0].state.is_live());
}

#[tokio::test]
async fn test_peering_without_management_net_is_a_spec_error() {
    let h = Harness::new();
    let mut network = common::network();
    network.net_peering.enable = true;
    let mut cluster = Cluster::new("demo", "3f1c9a", network);

    let err = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Spec);
    assert_eq!(h.cloud.count("create_net_peering"), 0);
    assert_eq!(h.cloud.count("create_security_group"), 0);
    let condition = cluster
        .status
        .conditions
        .get(ConditionType::NetPeeringReady)
        .unwrap();
    assert_eq!(condition.reason, "NetPeeringReconciliationFailed");
}

#[tokio::test]
async fn test_vanished_peering_is_not_recreated() {
    let mut h = Harness::new();
    let management = h.cloud.add_net(MANAGEMENT_RANGE);
    h.cloud.add_route_table(&management.net_id, None);
    h.services = h.services.with_management(common::tenant("management"));
    let mut cluster = peered_cluster(&management.net_id);
    h.ready(&mut cluster).await;
    let peering_id = cluster
        .status
        .resources
        .net_peering
        .get(DEFAULT_KEY)
        .unwrap()
        .to_string();

    assert!(h.cloud.remove(&peering_id));
    cluster.metadata.generation += 1;
    h.cloud.clear_calls();
    let err = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingResource);
    assert_eq!(h.cloud.count("create_net_peering"), 0);
    assert_eq!(
        cluster.status.resources.net_peering.get(DEFAULT_KEY),
        Some(peering_id.as_str())
    );
    assert!(!cluster.status.conditions.is_true(ConditionType::NetPeeringReady));
}

#[tokio::test]
async fn test_rejected_peering_is_replaced() {
    let mut h = Harness::new();
    let management = h.cloud.add_net(MANAGEMENT_RANGE);
    h.cloud.add_route_table(&management.net_id, None);
    h.services = h.services.with_management(common::tenant("management"));
    let mut cluster = peered_cluster(&management.net_id);
    h.ready(&mut cluster).await;
    let old_id = cluster
        .status
        .resources
        .net_peering
        .get(DEFAULT_KEY)
        .unwrap()
        .to_string();

    assert!(h.cloud.set_net_peering_state(&old_id, NetPeeringState::Rejected));
    cluster.metadata.generation += 1;
    h.cloud.clear_calls();
    h.ready(&mut cluster).await;

    assert_eq!(h.cloud.count("create_net_peering"), 1);
    assert_eq!(h.cloud.count("accept_net_peering"), 1);
    let new_id = cluster.status.resources.net_peering.get(DEFAULT_KEY).unwrap();
    assert_ne!(new_id, old_id);
    let replacement = h
        .cloud
        .net_peerings()
        .into_iter()
        .find(|p| p.net_peering_id == new_id)
        .unwrap();
    assert_eq!(replacement.state, NetPeeringState::Active);
}

#[tokio::test]
async fn test_untracked_peering_is_still_deleted() {
    let mut h = Harness::new();
    let management = h.cloud.add_net(MANAGEMENT_RANGE);
    let management_table = h.cloud.add_route_table(&management.net_id, None);
    h.services = h.services.with_management(common::tenant("management"));
    let mut cluster = peered_cluster(&management.net_id);
    h.ready(&mut cluster).await;

    cluster.status.resources.net_peering.untrack(DEFAULT_KEY);
    cluster.metadata.deletion_requested = true;
    let outcome = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count("delete_net_peering"), 1);
    assert!(h.cloud.net_peerings().iter().all(|p| !p.state.is_live()));
    let table = h
        .cloud
        .route_tables()
        .into_iter()
        .find(|t| t.route_table_id == management_table.route_table_id)
        .unwrap();
    assert!(table.routes.is_empty());
}
