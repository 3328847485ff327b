use clap::{Parser, Subcommand};
use simulation::{simulate, SimulationOptions};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use trolley_dynamo::ClusterConfig;

pub mod scenario;
pub mod simulation;

#[derive(Parser)]
#[command(name = "trolley")]
#[command(about = "Collaborative shopping lists on a Dynamo-style replicated CRDT store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clients against an in-process cluster while nodes fail
    Simulate {
        /// Path to a cluster configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Number of storage nodes
        #[arg(long, default_value_t = 5)]
        nodes: usize,

        /// Number of concurrent clients
        #[arg(long, default_value_t = 8)]
        clients: usize,

        /// Read-modify-write operations per client
        #[arg(long, default_value_t = 50)]
        ops: usize,

        /// Chance per tick that a node crashes
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,
    },
    /// Walk through the concurrent-edit, add-wins and handoff scenarios
    Scenario {
        /// Path to a cluster configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn load_config(path: Option<String>) -> ClusterConfig {
    match path {
        Some(path) => {
            tracing::info!("Loading cluster config from {}", path);
            match ClusterConfig::from_file(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => ClusterConfig::default(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trolley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            nodes,
            clients,
            ops,
            failure_rate,
        } => {
            let cfg = load_config(config);

            let options = SimulationOptions {
                nodes,
                clients,
                ops_per_client: ops,
                failure_rate,
            };
            match simulate(cfg, options).await {
                Ok(stats) => stats.print(),
                Err(e) => {
                    tracing::error!("Simulation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Scenario { config } => {
            let cfg = load_config(config);
            if let Err(e) = scenario::concurrent_edits(&cfg).await {
                tracing::error!("Scenario failed: {}", e);
                std::process::exit(1);
            }
            scenario::add_wins();
            if let Err(e) = scenario::hinted_handoff(&cfg).await {
                tracing::error!("Scenario failed: {}", e);
                std::process::exit(1);
            }
            println!("\n✓ All scenarios completed successfully!");
        }
    }
}
