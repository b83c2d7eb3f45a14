//! Master-side control plane.
//!
//! The master is stateless given the stores: job definitions live in etcd,
//! execution logs in MongoDB. It exposes the HTTP control surface and a
//! read-only view of worker registrations:
//!
//! - [`jobs::JobRegistry`]: job CRUD, enable/disable, kill markers
//! - [`workers::WorkerRegistry`]: heartbeat-backed fleet view
//! - [`logs::LogManager`]: log pagination, statistics, retention
//! - [`api`]: axum router and JSON envelope

pub mod api;
pub mod jobs;
pub mod logs;
pub mod workers;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::store::{KvGateway, LogStore};

/// Wire up and run a master until the shutdown token fires.
pub async fn run_master(config: Config, shutdown: CancellationToken) -> Result<()> {
    let kv = KvGateway::connect(&config.etcd_endpoints, config.etcd_dial_timeout).await?;
    let store = LogStore::connect(&config.mongo_uri, config.mongo_connect_timeout).await?;

    let jobs = jobs::JobRegistry::new(kv.clone());

    let workers = workers::WorkerRegistry::new(kv, config.heartbeat_interval).await?;
    workers.start_watch(shutdown.clone());

    let logs = logs::LogManager::new(store);
    logs.start_cleaner(config.log_retention_days, shutdown.clone());

    tracing::info!(api_port = config.api_port, "Master started");

    api::serve(
        config.api_port,
        api::ApiState {
            jobs,
            workers,
            logs,
        },
        shutdown,
    )
    .await?;

    tracing::info!("Master shutdown complete");
    Ok(())
}
