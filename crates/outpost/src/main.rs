mod commands;

use clap::{Parser, Subcommand};
use outpost_config::ControllerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "outpost")]
#[command(about = "Cluster infrastructure for Outscale, reconciled in order", long_about = None)]
struct Cli {
    /// Controller config file (OUTPOST_CONFIG and the usual locations otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a cluster and its machines against an in-memory cloud
    Simulate(commands::simulate::SimulateArgs),
    /// Print the network layout derived for a cluster
    Defaults(commands::defaults::DefaultsArgs),
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Commands::Version => {
            println!("outpost {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Defaults(args) => commands::defaults::handle(&args),
        Commands::Simulate(args) => {
            let config = match &cli.config {
                Some(path) => {
                    let mut config = ControllerConfig::from_file(path)?;
                    config.apply_env();
                    config
                }
                None => ControllerConfig::load()?,
            };
            commands::simulate::handle(&args, config).await
        }
    }
}
