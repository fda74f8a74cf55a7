mod common;

use common::Harness;
use outpost_cloud::{VmState, tag};
use outpost_controller::{ErrorKind, MachineReconciler, Outcome};
use outpost_core::{AddressKind, ConditionType, DEFAULT_KEY, Role};
use std::time::Duration;

#[tokio::test]
async fn test_machine_waits_for_cluster() {
    let h = Harness::new();
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let cluster = common::cluster();
    let mut machine = common::machine("worker-0", Role::Worker, &image);

    let outcome = MachineReconciler::new(&h.services)
        .reconcile(&cluster, &mut machine)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Requeue(Duration::from_secs(30)));
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_control_plane_is_linked_once_running() {
    let h = Harness::new();
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let mut machine = common::machine("cp-0", Role::ControlPlane, &image);
    let reconciler = MachineReconciler::new(&h.services);

    h.cloud.clear_calls();
    let outcome = reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(outcome, Outcome::Requeue(Duration::from_secs(30)));
    assert_eq!(h.cloud.count("create_vm"), 1);
    assert_eq!(h.cloud.count("link_backend_vms"), 0);
    assert_eq!(h.cloud.count("add_tag"), 0);
    assert!(!machine.status.ready);
    assert_eq!(machine.status.vm_state, Some(VmState::Pending));

    let vm_id = machine
        .status
        .resources
        .vm
        .get(DEFAULT_KEY)
        .unwrap()
        .to_string();
    assert_eq!(
        machine.spec.provider_id,
        Some(format!("aws:///{}/{}", common::SUBREGION, vm_id))
    );

    // Still pending: nothing new is created
    reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(h.cloud.count("create_vm"), 1);
    assert_eq!(h.cloud.count("link_backend_vms"), 0);

    assert!(h.cloud.set_vm_state(&vm_id, VmState::Running));
    let outcome = reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert!(machine.status.ready);
    assert!(machine.status.conditions.is_true(ConditionType::VmReady));
    assert_eq!(h.cloud.count("link_backend_vms"), 1);
    assert_eq!(h.cloud.count("add_tag"), 1);
    assert_eq!(machine.status.failure_domain.as_deref(), Some(common::SUBREGION));
    assert_eq!(machine.status.addresses.len(), 1);
    assert_eq!(machine.status.addresses[0].kind, AddressKind::InternalIp);

    let lb = &h.cloud.load_balancers()[0];
    assert_eq!(lb.backend_vm_ids, vec![vm_id.clone()]);
    let vm = h.cloud.vms().into_iter().find(|vm| vm.vm_id == vm_id).unwrap();
    assert!(tag::tag_value(tag::NODE_NAME_KEY, &vm.tags).is_some());

    reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(h.cloud.count("link_backend_vms"), 1);
    assert_eq!(h.cloud.count("add_tag"), 1);
}

#[tokio::test]
async fn test_worker_is_not_registered_with_load_balancer() {
    let h = Harness::new();
    h.cloud.set_default_vm_state(VmState::Running);
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let mut machine = common::machine("worker-0", Role::Worker, &image);

    let outcome = MachineReconciler::new(&h.services)
        .reconcile(&cluster, &mut machine)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count("link_backend_vms"), 0);
    assert!(machine.status.failure_domain.is_none());

    let vm = &h.cloud.vms()[0];
    let worker_sg = cluster.status.resources.security_group.get("demo-worker").unwrap();
    let node_sg = cluster.status.resources.security_group.get("demo-node").unwrap();
    assert_eq!(vm.security_group_ids, vec![worker_sg.to_string(), node_sg.to_string()]);
    let worker_subnet = cluster.status.resources.subnet.get("10.0.3.0/24").unwrap();
    assert_eq!(vm.subnet_id, worker_subnet);
}

#[tokio::test]
async fn test_dedicated_public_ip_is_released_with_the_vm() {
    let h = Harness::new();
    h.cloud.set_default_vm_state(VmState::Running);
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let mut machine = common::machine("worker-0", Role::Worker, &image);
    machine.spec.vm.public_ip = true;
    let reconciler = MachineReconciler::new(&h.services);

    h.cloud.clear_calls();
    reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(h.cloud.count("create_public_ip"), 1);
    let kinds: Vec<AddressKind> = machine.status.addresses.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AddressKind::InternalIp, AddressKind::ExternalIp]);

    machine.metadata.deletion_requested = true;
    let outcome = reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count("delete_vm"), 1);
    assert_eq!(h.cloud.count("delete_public_ip"), 1);
    assert!(machine.status.resources.vm.is_empty());
    assert!(machine.status.resources.public_ip.is_empty());
    assert!(!machine.status.ready);
    // Only the NAT address is left
    assert_eq!(h.cloud.public_ips().len(), 1);
}

#[tokio::test]
async fn test_pool_address_goes_back_to_the_pool() {
    let h = Harness::new();
    h.cloud.set_default_vm_state(VmState::Running);
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    h.cloud.add_pool_ip("edge", true);
    let free = h.cloud.add_pool_ip("edge", false);
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let mut machine = common::machine("worker-0", Role::Worker, &image);
    machine.spec.vm.public_ip_pool = "edge".into();
    let reconciler = MachineReconciler::new(&h.services);

    h.cloud.clear_calls();
    reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(h.cloud.count("create_public_ip"), 0);
    assert_eq!(
        machine.status.resources.public_ip.get(DEFAULT_KEY),
        Some(free.public_ip_id.as_str())
    );

    machine.metadata.deletion_requested = true;
    reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    assert_eq!(h.cloud.count("delete_public_ip"), 0);
    assert!(machine.status.resources.public_ip.is_empty());
    let back = h
        .cloud
        .public_ips()
        .into_iter()
        .find(|ip| ip.public_ip_id == free.public_ip_id)
        .unwrap();
    assert!(!back.is_attached());
}

#[tokio::test]
async fn test_exhausted_pool_fails_without_creating_a_vm() {
    let h = Harness::new();
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    h.cloud.add_pool_ip("edge", true);
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let mut machine = common::machine("worker-0", Role::Worker, &image);
    machine.spec.vm.public_ip_pool = "edge".into();

    let err = MachineReconciler::new(&h.services)
        .reconcile(&cluster, &mut machine)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyPool);
    assert_eq!(h.cloud.count("create_vm"), 0);
    let condition = machine.status.conditions.get(ConditionType::VmReady).unwrap();
    assert!(!condition.status);
    assert_eq!(condition.reason, "VmReconciliationFailed");
}

#[tokio::test]
async fn test_lost_machine_status_is_recovered() {
    let h = Harness::new();
    h.cloud.set_default_vm_state(VmState::Running);
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let mut cluster = common::cluster();
    h.ready(&mut cluster).await;
    let mut machine = common::machine("worker-0", Role::Worker, &image);
    machine.spec.vm.public_ip = true;
    let reconciler = MachineReconciler::new(&h.services);
    reconciler.reconcile(&cluster, &mut machine).await.unwrap();
    let vm_id = machine.status.resources.vm.get(DEFAULT_KEY).unwrap().to_string();
    let ip_id = machine
        .status
        .resources
        .public_ip
        .get(DEFAULT_KEY)
        .unwrap()
        .to_string();

    machine.status.resources.vm.untrack(DEFAULT_KEY);
    machine.status.resources.public_ip.untrack(DEFAULT_KEY);
    machine.metadata.generation += 1;
    h.cloud.clear_calls();
    let outcome = reconciler.reconcile(&cluster, &mut machine).await.unwrap();

    assert_eq!(outcome, Outcome::Done);
    assert_eq!(h.cloud.count("create_vm"), 0);
    assert_eq!(h.cloud.count("create_public_ip"), 0);
    assert_eq!(machine.status.resources.vm.get(DEFAULT_KEY), Some(vm_id.as_str()));
    assert_eq!(machine.status.resources.public_ip.get(DEFAULT_KEY), Some(ip_id.as_str()));
}
