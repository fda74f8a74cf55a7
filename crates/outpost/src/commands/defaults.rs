use super::ClusterArgs;
use clap::{Args, ValueEnum};
use colored::Colorize;
use outpost_core::{
    Cluster, LoadBalancerSpec, NatServiceSpec, NetSpec, Role, RouteTableSpec, RouteTargetKind,
    SecurityGroupSpec, SubnetSpec,
};
use serde::Serialize;

#[derive(Clone, Copy, ValueEnum)]
pub enum Format {
    Text,
    Yaml,
    Json,
}

#[derive(Args)]
pub struct DefaultsArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: Format,
}

/// Everything the reconcilers derive before touching the provider
#[derive(Serialize)]
struct Layout {
    net: NetSpec,
    subregions: Vec<String>,
    subnets: Vec<SubnetSpec>,
    route_tables: Vec<RouteTableSpec>,
    nat_services: Vec<NatServiceSpec>,
    security_groups: Vec<SecurityGroupSpec>,
    load_balancer: LoadBalancerSpec,
}

impl Layout {
    fn derive(cluster: &Cluster) -> anyhow::Result<Self> {
        let mut net = cluster.net_spec();
        net.name = cluster.net_name();
        Ok(Self {
            net,
            subregions: cluster.subregions(),
            subnets: cluster.subnets()?,
            route_tables: cluster.route_tables()?,
            nat_services: cluster.nat_services()?,
            security_groups: cluster.security_groups()?,
            load_balancer: cluster.load_balancer(),
        })
    }
}

fn roles(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
}

pub fn handle(args: &DefaultsArgs) -> anyhow::Result<()> {
    let (cluster, _) = args.cluster.load()?;
    let layout = Layout::derive(&cluster)?;
    match args.output {
        Format::Yaml => print!("{}", serde_yaml::to_string(&layout)?),
        Format::Json => println!("{}", serde_json::to_string_pretty(&layout)?),
        Format::Text => print_text(&cluster, &layout)?,
    }
    Ok(())
}

fn print_text(cluster: &Cluster, layout: &Layout) -> anyhow::Result<()> {
    println!(
        "{} {} ({})",
        "Cluster".bold(),
        cluster.name().cyan(),
        cluster.uid()
    );
    println!("  net: {} \"{}\"", layout.net.ip_range.cyan(), layout.net.name);
    println!("  subregions: {}", layout.subregions.join(", "));

    println!();
    println!("{}", "Subnets".bold());
    for subnet in &layout.subnets {
        println!(
            "  {:<16} {:<14} {}",
            subnet.ip_range.cyan(),
            cluster.subnet_subregion(subnet),
            roles(&subnet.roles)
        );
    }

    println!();
    println!("{}", "Route tables".bold());
    for table in &layout.route_tables {
        let subnets: Vec<String> = cluster
            .route_table_subnets(table)?
            .into_iter()
            .map(|s| s.ip_range)
            .collect();
        println!("  {}", subnets.join(", ").cyan());
        for route in &table.routes {
            let target = match route.target {
                RouteTargetKind::Gateway => "internet service",
                RouteTargetKind::Nat => "nat service",
            };
            println!("    {} -> {}", route.destination, target);
        }
    }

    println!();
    println!("{}", "NAT services".bold());
    if layout.nat_services.is_empty() {
        println!("  (none)");
    }
    for nat in &layout.nat_services {
        let subnet = cluster.nat_service_subnet(nat)?;
        println!(
            "  {} in {}",
            cluster.nat_service_name(nat).cyan(),
            subnet.ip_range
        );
    }

    println!();
    println!("{}", "Security groups".bold());
    for sg in &layout.security_groups {
        let main = if sg.main { " (main)" } else { "" };
        println!(
            "  {:<20} {:<14} {} rules{}",
            cluster.security_group_name(sg).cyan(),
            roles(&sg.roles),
            sg.rules.len(),
            main
        );
    }

    println!();
    println!("{}", "Load balancer".bold());
    let lb = &layout.load_balancer;
    if cluster.network().disable.load_balancer {
        println!("  {}", "disabled".yellow());
    } else {
        println!(
            "  {} {}:{} -> {}:{}",
            lb.name.cyan(),
            lb.listener.load_balancer_protocol,
            lb.listener.load_balancer_port,
            lb.listener.backend_protocol,
            lb.listener.backend_port
        );
    }
    Ok(())
}
