mod common;

use common::Harness;
use outpost_cloud::{Flow, RuleRequest, SecurityGroup, SecurityGroupRule};
use outpost_controller::{ClusterReconciler, Outcome};
use outpost_core::{API_PORT, Cluster};

fn group(h: &Harness, name: &str) -> SecurityGroup {
    let provider_name = format!("{}-3f1c9a", name);
    h.cloud
        .security_groups()
        .into_iter()
        .find(|sg| sg.security_group_name == provider_name)
        .unwrap()
}

fn rule<'a>(sg: &'a SecurityGroup, flow: Flow, protocol: &str, from: i32, to: i32) -> &'a SecurityGroupRule {
    sg.rules
        .iter()
        .find(|r| r.flow == flow && r.same_ports(protocol, from, to))
        .unwrap()
}

#[tokio::test]
async fn test_net_access_point_serves_node_route_tables() {
    let h = Harness::new();
    let mut network = common::network();
    network.net_access_points = vec!["api".into()];
    let mut cluster = Cluster::new("demo", "3f1c9a", network);

    h.ready(&mut cluster).await;

    assert_eq!(h.cloud.count("create_net_access_point"), 1);
    let nap = &h.cloud.net_access_points()[0];
    assert_eq!(nap.service_name, "com.outscale.eu-west-2.api");
    assert!(!nap.route_table_ids.is_empty());
    assert_eq!(
        cluster.status.resources.net_access_point.get("api").unwrap(),
        nap.net_access_point_id
    );

    // Nothing new on the next pass
    h.cloud.clear_calls();
    cluster.metadata.generation += 1;
    h.ready(&mut cluster).await;
    assert_eq!(h.cloud.count("create_net_access_point"), 0);

    cluster.metadata.deletion_requested = true;
    let outcome = ClusterReconciler::new(&h.services)
        .reconcile(&mut cluster, &[])
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count("delete_net_access_point"), 1);
    assert!(h.cloud.net_access_points().is_empty());
}

#[tokio::test]
async fn test_restricted_api_admits_nat_addresses() {
    let h = Harness::new();
    let mut network = common::network();
    network.allow_from_ip_ranges = vec!["198.51.100.0/24".into()];
    let mut cluster = Cluster::new("demo", "3f1c9a", network);

    h.ready(&mut cluster).await;

    let nat_ip = h.cloud.nat_services()[0].public_ips[0].public_ip.clone();
    let lb_group = h
        .cloud
        .security_groups()
        .into_iter()
        .find(|sg| sg.security_group_name.starts_with("demo-lb-"))
        .unwrap();
    let api_rule = lb_group
        .rules
        .iter()
        .find(|r| r.flow == Flow::Inbound && r.same_ports("tcp", API_PORT, API_PORT))
        .unwrap();
    assert!(api_rule.ip_ranges.contains(&format!("{}/32", nat_ip)));
}

#[tokio::test]
async fn test_default_groups_get_their_rules() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;

    let lb = group(&h, "demo-lb");
    assert_eq!(rule(&lb, Flow::Inbound, "tcp", API_PORT, API_PORT).ip_ranges, vec!["0.0.0.0/0"]);
    assert_eq!(rule(&lb, Flow::Outbound, "tcp", API_PORT, API_PORT).ip_ranges, vec!["10.0.4.0/24"]);

    let worker = group(&h, "demo-worker");
    let node_ports = &rule(&worker, Flow::Inbound, "tcp", 30000, 32767).ip_ranges;
    assert!(node_ports.contains(&"10.0.3.0/24".to_string()));
    assert!(node_ports.contains(&"10.0.4.0/24".to_string()));
    assert!(!node_ports.contains(&"10.0.2.0/24".to_string()));
    rule(&worker, Flow::Inbound, "tcp", 10250, 10250);

    let controlplane = group(&h, "demo-controlplane");
    assert_eq!(
        rule(&controlplane, Flow::Inbound, "tcp", API_PORT, API_PORT).ip_ranges,
        vec!["10.0.0.0/16"]
    );
    assert_eq!(rule(&controlplane, Flow::Inbound, "tcp", 2378, 2380).ip_ranges, vec!["10.0.4.0/24"]);
    assert_eq!(rule(&controlplane, Flow::Inbound, "tcp", 10250, 10252).ip_ranges, vec!["10.0.4.0/24"]);

    let node = group(&h, "demo-node");
    assert_eq!(rule(&node, Flow::Inbound, "icmp", 8, 8).ip_ranges, vec!["10.0.0.0/16"]);
    assert_eq!(rule(&node, Flow::Inbound, "udp", 4789, 4789).ip_ranges, vec!["10.0.0.0/16"]);
}

#[tokio::test]
async fn test_undeclared_rules_are_removed_from_authoritative_groups() {
    let h = Harness::new();
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;

    let worker = group(&h, "demo-worker");
    let lb = group(&h, "demo-lb");
    let api = h.services.cloud.security_group(&h.services.tenant);
    api.create_security_group_rule(
        &worker.security_group_id,
        &RuleRequest::ip_range(Flow::Inbound, "tcp", 22, 22, "192.0.2.0/24"),
    )
    .await
    .unwrap();
    api.create_security_group_rule(
        &worker.security_group_id,
        &RuleRequest::member(Flow::Inbound, "tcp", 9100, 9100, lb.security_group_id.as_str()),
    )
    .await
    .unwrap();
    let before = group(&h, "demo-worker").rules.len();

    cluster.metadata.generation += 1;
    h.cloud.clear_calls();
    h.ready(&mut cluster).await;

    assert_eq!(h.cloud.count("delete_security_group_rule"), 1);
    assert_eq!(h.cloud.count("create_security_group_rule"), 0);
    let worker = group(&h, "demo-worker");
    assert_eq!(worker.rules.len(), before - 1);
    assert!(worker.rules.iter().all(|r| !r.same_ports("tcp", 22, 22)));
    let member = rule(&worker, Flow::Inbound, "tcp", 9100, 9100);
    assert_eq!(member.security_groups_members, vec![lb.security_group_id.clone()]);
}
