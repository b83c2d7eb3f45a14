use std::time::Duration;

use chrono::Utc;
use sysinfo::System;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::model::{worker_key, WorkerInfo};
use crate::store::KvGateway;

/// Publishes this worker's liveness record at `/cron/workers/<id>` under a
/// lease of `max(5s, 2 × heartbeatInterval)`. Every heartbeat rewrites the
/// value with a fresh lease, so a stopped worker expires by TTL.
pub struct Register {
    kv: KvGateway,
    info: WorkerInfo,
    registry_key: String,
    heartbeat_interval: Duration,
    ttl: i64,
    sys: System,
}

impl Register {
    pub fn new(kv: KvGateway, config: &Config) -> Self {
        let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());
        let info = WorkerInfo {
            id: config.worker_id.clone(),
            hostname,
            cpu_usage: 0.0,
            mem_usage: 0.0,
            last_seen_ms: Utc::now().timestamp_millis(),
        };

        Self {
            kv,
            registry_key: worker_key(&config.worker_id),
            info,
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval),
            ttl: config.register_ttl_secs(),
            sys: System::new(),
        }
    }

    /// Register once, then hand the heartbeat loop off to its own task.
    /// The initial registration failing is a startup error.
    pub async fn start(mut self, shutdown: CancellationToken) -> Result<()> {
        self.do_register().await?;
        tracing::info!(worker_id = %self.info.id, ttl = self.ttl, "Worker registered");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Heartbeat loop stopped");
                        break;
                    }
                    _ = tokio::time::sleep(self.heartbeat_interval) => {
                        if let Err(e) = self.do_register().await {
                            // Transient; the next heartbeat retries.
                            tracing::error!(worker_id = %self.info.id, error = %e, "Heartbeat failed");
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn do_register(&mut self) -> Result<()> {
        self.collect_system_stats();
        self.info.last_seen_ms = Utc::now().timestamp_millis();

        let data = serde_json::to_string(&self.info)?;
        self.kv
            .put_with_lease(&self.registry_key, &data, self.ttl)
            .await?;

        tracing::debug!(worker_id = %self.info.id, "Heartbeat registered");
        Ok(())
    }

    /// Best-effort host metrics; failures here never block the heartbeat.
    fn collect_system_stats(&mut self) {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        self.info.cpu_usage = self.sys.global_cpu_info().cpu_usage() as f64;
        let total = self.sys.total_memory();
        if total > 0 {
            self.info.mem_usage = self.sys.used_memory() as f64 / total as f64;
        }
    }
}
