use std::path::PathBuf;
use std::sync::Arc;
use clap::{Parser, Subcommand};
use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachetree::api::{ApiServer, ApiServerConfig};
use cachetree::simulate::{self, Workload};
use cachetree_core::{CacheSystem, Topology};

#[derive(Parser)]
#[command(name = "cachetree")]
#[command(about = "Tiered cache tree with crash/recover fault injection", long_about = None)]
struct Cli {
    /// Configuration file (YAML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the cache tree and its HTTP control surface
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Print the tree built from the configuration
    Topology,

    /// Run a random workload across all clients and print per-node stats
    Simulate {
        /// Operations per client
        #[arg(long, default_value = "100")]
        ops: usize,

        /// Fraction of operations that are writes
        #[arg(long, default_value = "0.2")]
        write_ratio: f64,

        /// Cache node to crash before the workload starts (repeatable)
        #[arg(long = "crash")]
        crash: Vec<String>,

        /// Seed for reproducible workloads
        #[arg(long)]
        seed: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "cachetree=info,cachetree_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cachetree::config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { ref host, port } => {
            let system = Arc::new(CacheSystem::start(config).await?);
            let server = ApiServer::new(
                ApiServerConfig {
                    host: host.clone(),
                    port,
                },
                system,
            );

            println!("Starting control API on {}:{}", host, port);
            server.start().await?;
        }

        Commands::Topology => {
            let topology = Topology::build(&config.topology)?;
            println!("{} nodes", topology.len());
            print!("{}", topology.render());
        }

        Commands::Simulate { ops, write_ratio, ref crash, seed, json } => {
            let workload = Workload {
                ops_per_client: ops,
                write_ratio,
                key_space: config.store.initial_keys,
                value_range: config.store.value_range,
                seed,
            };

            let system = CacheSystem::start(config).await?;
            let injector = system.fault_injector();
            for node in crash {
                injector.crash(node)?;
                println!("Crashed {}", node);
            }

            let report = simulate::run(&system, &workload).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }

            system.shutdown().await;
        }
    }

    Ok(())
}
