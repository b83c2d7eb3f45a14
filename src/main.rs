use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cronfleet::config::{Config, ConfigOverrides};
use cronfleet::{master, shutdown, worker};

#[derive(Parser, Debug)]
#[command(name = "cronfleet")]
#[command(about = "A distributed cron-style job scheduler backed by etcd and MongoDB")]
struct Args {
    #[command(subcommand)]
    role: Role,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Etcd endpoints (comma-separated), overrides config/env
    #[arg(long, global = true)]
    etcd: Option<String>,

    /// Worker unique ID, overrides config/env
    #[arg(long, global = true)]
    worker_id: Option<String>,

    /// API server port, overrides config/env
    #[arg(long, global = true)]
    api_port: Option<u16>,

    /// MongoDB URI, overrides config/env
    #[arg(long, global = true)]
    mongo: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the control-plane master (HTTP API, registries, log manager)
    Master,
    /// Run an execution worker (scheduler, executor, log sink)
    Worker,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let overrides = ConfigOverrides {
        etcd_endpoints: args.etcd,
        worker_id: args.worker_id,
        api_port: args.api_port,
        mongo_uri: args.mongo,
    };

    let config = match Config::load(args.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let token = shutdown::install_handler();

    let result = match args.role {
        Role::Master => master::run_master(config, token).await,
        Role::Worker => worker::run_worker(config, token).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}
