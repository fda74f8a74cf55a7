use super::ClusterArgs;
use anyhow::Context;
use clap::Args;
use colored::Colorize;
use outpost_cloud::{MemoryCloud, Tenant, VmState};
use outpost_config::ControllerConfig;
use outpost_controller::{Deployment, Outcome, Services, run_until_settled};
use outpost_core::{
    Cluster, ImageSpec, Machine, OPEN_SOURCE_IMAGE_ACCOUNTS, Role, StatusStore, StoredObject,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const IMAGE_NAME: &str = "ubuntu-2204-kubernetes";
const MANAGEMENT_RANGE: &str = "10.99.0.0/16";

#[derive(Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,
    /// Control-plane machines to add when no manifest lists machines
    #[arg(long, default_value = "1")]
    pub control_planes: usize,
    /// Worker machines to add when no manifest lists machines
    #[arg(long, default_value = "1")]
    pub workers: usize,
    /// Give up after this many reconcile passes
    #[arg(long, default_value = "20")]
    pub max_passes: u32,
    /// Delete the machines and the cluster once everything is ready
    #[arg(long)]
    pub teardown: bool,
    /// Save the cluster and machine objects under this directory
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

fn default_machines(cluster: &Cluster, control_planes: usize, workers: usize) -> Vec<Machine> {
    let roles = std::iter::repeat_n(Role::ControlPlane, control_planes)
        .chain(std::iter::repeat_n(Role::Worker, workers));
    let mut counts: BTreeMap<Role, usize> = BTreeMap::new();
    roles
        .map(|role| {
            let index = counts.entry(role).or_default();
            let name = format!("{}-{}-{}", cluster.name(), role, index);
            *index += 1;
            let uid = format!("{}-{}", cluster.uid(), name);
            let mut machine = Machine::new(name, uid, cluster.name(), role);
            machine.spec.vm.vm_type = "tinav6.c4r8p2".to_string();
            machine
        })
        .collect()
}

fn needs_image(spec: &ImageSpec) -> bool {
    spec.id.is_empty() && spec.name.is_empty()
}

/// Seed what the simulated account already has: an image, and a management
/// net when peering is enabled without one
fn seed(cloud: &MemoryCloud, region: &str, cluster: &mut Cluster, machines: &mut [Machine]) {
    let account = OPEN_SOURCE_IMAGE_ACCOUNTS
        .iter()
        .find(|(r, _)| *r == region)
        .map(|(_, account)| *account)
        .unwrap_or("000000000000");
    let image = cloud.add_image(IMAGE_NAME, account);
    let bastion = &mut cluster.spec.network.bastion;
    if bastion.enable && needs_image(&bastion.image) {
        bastion.image.id = image.image_id.clone();
    }
    for machine in machines.iter_mut() {
        if needs_image(&machine.spec.vm.image) {
            machine.spec.vm.image.id = image.image_id.clone();
        }
    }

    let peering = &mut cluster.spec.network.net_peering;
    if peering.enable && peering.management_net_id.is_empty() {
        let net = cloud.add_net(MANAGEMENT_RANGE);
        cloud.add_route_table(&net.net_id, None);
        peering.management_net_id = net.net_id;
        if peering.management_account_id.is_empty() {
            peering.management_account_id = account.to_string();
        }
        tracing::info!(net_id = %peering.management_net_id, "Seeded management net");
    }
}

async fn settle(deployment: &mut Deployment<'_>, config: &ControllerConfig, max_passes: u32) -> anyhow::Result<()> {
    match run_until_settled(deployment, config, Some(max_passes)).await? {
        Outcome::Done => Ok(()),
        Outcome::Requeue(delay) => anyhow::bail!(
            "still converging after {} passes (next pass in {:?})",
            max_passes,
            delay
        ),
    }
}

async fn save<T: StoredObject>(store: &StatusStore, object: &T, name: &str) -> anyhow::Result<()> {
    let expected = store
        .load::<T>(name)
        .await?
        .map(|stored| stored.resource_version)
        .unwrap_or(0);
    store.save(object, expected).await?;
    Ok(())
}

async fn persist(dir: &Path, deployment: &Deployment<'_>) -> anyhow::Result<()> {
    let store = StatusStore::new(dir);
    save(&store, &deployment.cluster, deployment.cluster.name())
        .await
        .context("failed to save cluster")?;
    for machine in &deployment.machines {
        save(&store, machine, machine.name())
            .await
            .with_context(|| format!("failed to save machine {}", machine.name()))?;
    }
    println!("  state saved to {}", dir.display().to_string().cyan());
    Ok(())
}

fn print_summary(deployment: &Deployment<'_>, cloud: &MemoryCloud) {
    let cluster = &deployment.cluster;
    let resources = &cluster.status.resources;
    println!("{}", format!("✓ Cluster {} is ready", cluster.name()).green().bold());
    if let Some(endpoint) = &cluster.status.control_plane_endpoint {
        println!("  endpoint: {}:{}", endpoint.host.cyan(), endpoint.port);
    }
    println!("  failure domains: {}", cluster.status.failure_domains.join(", "));
    println!(
        "  subnets: {}, route tables: {}, nat services: {}, security groups: {}, public ips: {}",
        resources.subnet.len(),
        resources.route_table.len(),
        resources.nat_service.len(),
        resources.security_group.len(),
        resources.public_ip.len()
    );
    if let Some(state) = cluster.status.bastion_state {
        println!("  bastion: {}", state);
    }

    println!("  machines:");
    for machine in &deployment.machines {
        let state = machine
            .status
            .vm_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let addresses: Vec<&str> = machine
            .status
            .addresses
            .iter()
            .map(|a| a.address.as_str())
            .collect();
        println!(
            "    - {} ({}) {} {}",
            machine.name().cyan(),
            machine.spec.role,
            state,
            addresses.join(", ")
        );
    }
    print_calls(cloud);
}

fn print_calls(cloud: &MemoryCloud) {
    let mut verbs: BTreeMap<&str, usize> = BTreeMap::new();
    for op in cloud.ops() {
        let verb = op.split('_').next().unwrap_or(op);
        *verbs.entry(verb).or_default() += 1;
    }
    let summary: Vec<String> = verbs
        .iter()
        .map(|(verb, count)| format!("{} {}", verb, count))
        .collect();
    println!("  provider calls: {}", summary.join(", "));
}

pub async fn handle(args: &SimulateArgs, config: ControllerConfig) -> anyhow::Result<()> {
    let (mut cluster, listed) = args.cluster.load()?;
    let mut machines = match listed {
        Some(machines) if !machines.is_empty() => machines,
        _ => default_machines(&cluster, args.control_planes, args.workers),
    };
    let region = args.cluster.region.clone();

    let cloud = MemoryCloud::new();
    cloud.set_default_vm_state(VmState::Running);
    seed(&cloud, &region, &mut cluster, &mut machines);

    let workload = Tenant::new("workload", &region, "simulated", "simulated");
    let management = Tenant::new("management", &region, "simulated", "simulated");
    let services = Services::new(Arc::new(cloud.clone()), workload)
        .with_management(management)
        .with_config(config);

    println!(
        "{}",
        format!(
            "Simulating cluster {} in {} with {} machines...",
            cluster.name(),
            region,
            machines.len()
        )
        .blue()
    );
    let mut deployment = Deployment::new(&services, cluster, machines);
    settle(&mut deployment, &services.config, args.max_passes)
        .await
        .context("cluster did not converge")?;
    print_summary(&deployment, &cloud);
    if let Some(dir) = &args.state_dir {
        persist(dir, &deployment).await?;
    }

    if args.teardown {
        println!();
        println!("{}", "Tearing down...".blue());
        cloud.clear_calls();
        deployment.request_deletion();
        settle(&mut deployment, &services.config, args.max_passes)
            .await
            .context("teardown did not complete")?;
        println!(
            "{}",
            format!("✓ Cluster {} deleted", deployment.cluster.name())
                .green()
                .bold()
        );
        print_calls(&cloud);
        if !cloud.subnets().is_empty() || !cloud.public_ips().is_empty() {
            println!("  {}", "provider resources left behind".yellow());
        }
        if let Some(dir) = &args.state_dir {
            persist(dir, &deployment).await?;
        }
    }
    Ok(())
}
