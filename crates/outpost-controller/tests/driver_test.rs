mod common;

use common::Harness;
use outpost_cloud::VmState;
use outpost_controller::{Deployment, Outcome, run_until_settled};
use outpost_core::Role;

#[tokio::test(start_paused = true)]
async fn test_deployment_lifecycle() {
    let h = Harness::new();
    h.cloud.set_default_vm_state(VmState::Running);
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let machines = vec![
        common::machine("cp-0", Role::ControlPlane, &image),
        common::machine("worker-0", Role::Worker, &image),
    ];
    let mut deployment = Deployment::new(&h.services, common::cluster(), machines);
    let config = h.services.config.clone();

    let outcome = run_until_settled(&mut deployment, &config, Some(5))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert!(deployment.cluster.status.ready);
    assert!(deployment.machines.iter().all(|m| m.status.ready));
    assert_eq!(h.cloud.count("create_vm"), 2);
    assert_eq!(h.cloud.load_balancers()[0].backend_vm_ids.len(), 1);

    deployment.request_deletion();
    let outcome = run_until_settled(&mut deployment, &config, Some(5))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert!(deployment.machines.is_empty());
    assert!(!deployment.cluster.status.ready);
    assert!(h.cloud.nets().is_empty());
    assert!(h.cloud.vms().iter().all(|vm| vm.state.is_gone()));
}

#[tokio::test(start_paused = true)]
async fn test_deployment_waits_for_pending_vms() {
    let h = Harness::new();
    let image = h.cloud.add_image("ubuntu-2204", "671899555720");
    let machines = vec![common::machine("worker-0", Role::Worker, &image)];
    let mut deployment = Deployment::new(&h.services, common::cluster(), machines);
    let config = h.services.config.clone();

    let outcome = run_until_settled(&mut deployment, &config, Some(3))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Requeue(_)));
    assert!(deployment.cluster.status.ready);
    assert!(!deployment.machines[0].status.ready);
    assert_eq!(h.cloud.count("create_vm"), 1);
}
