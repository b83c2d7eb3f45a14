use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{strip_prefix, WorkerInfo, WORKER_KEY_PREFIX};
use crate::store::KvGateway;

/// Aggregate view of the fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub avg_cpu_usage: f64,
    pub avg_mem_usage: f64,
}

/// Master-side read-only view of worker registrations.
///
/// Heartbeat keys under `/cron/workers/` are snapshotted at construction
/// and kept current by a watch task; lease expiry shows up as a Delete.
#[derive(Clone)]
pub struct WorkerRegistry {
    kv: KvGateway,
    workers: Arc<RwLock<HashMap<String, WorkerInfo>>>,
    heartbeat_interval_ms: u64,
}

impl WorkerRegistry {
    pub async fn new(kv: KvGateway, heartbeat_interval_ms: u64) -> Result<Self> {
        let mut workers = HashMap::new();
        for (key, value) in kv.get_prefix(WORKER_KEY_PREFIX).await? {
            let worker_id = strip_prefix(&key, WORKER_KEY_PREFIX).to_string();
            match serde_json::from_slice::<WorkerInfo>(&value) {
                Ok(info) => {
                    workers.insert(worker_id, info);
                }
                Err(e) => {
                    tracing::error!(worker_id = %worker_id, error = %e, "Skipping undecodable worker record");
                }
            }
        }
        tracing::info!(count = workers.len(), "Workers loaded");

        Ok(Self {
            kv,
            workers: Arc::new(RwLock::new(workers)),
            heartbeat_interval_ms,
        })
    }

    pub fn start_watch(&self, shutdown: CancellationToken) {
        let registry = self.clone();

        tokio::spawn(async move {
            let (_watcher, mut stream) = match registry.kv.watch_prefix(WORKER_KEY_PREFIX).await {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to open worker watch");
                    return;
                }
            };
            tracing::info!("Worker watcher started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = stream.message() => match msg {
                        Ok(Some(resp)) => {
                            for event in resp.events() {
                                registry.handle_worker_event(event).await;
                            }
                        }
                        Ok(None) => {
                            tracing::warn!("Worker watch stream closed");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Worker watch stream failed");
                            break;
                        }
                    },
                }
            }
        });
    }

    async fn handle_worker_event(&self, event: &etcd_client::Event) {
        let Some(kv_pair) = event.kv() else { return };
        let key = String::from_utf8_lossy(kv_pair.key()).to_string();
        let worker_id = strip_prefix(&key, WORKER_KEY_PREFIX).to_string();

        match event.event_type() {
            etcd_client::EventType::Put => {
                match serde_json::from_slice::<WorkerInfo>(kv_pair.value()) {
                    Ok(info) => {
                        tracing::debug!(worker_id = %worker_id, hostname = %info.hostname, "Worker heartbeat");
                        self.workers.write().await.insert(worker_id, info);
                    }
                    Err(e) => {
                        tracing::error!(worker_id = %worker_id, error = %e, "Failed to decode worker record");
                    }
                }
            }
            etcd_client::EventType::Delete => {
                self.workers.write().await.remove(&worker_id);
                tracing::info!(worker_id = %worker_id, "Worker unregistered");
            }
        }
    }

    pub async fn list(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// Count online/offline workers and average the resource usage of the
    /// online ones. Liveness follows [`WorkerInfo::is_online`].
    pub async fn stats(&self) -> WorkerStats {
        let workers = self.workers.read().await;
        let now = Utc::now();

        let total = workers.len();
        let mut online = 0;
        let mut total_cpu = 0.0;
        let mut total_mem = 0.0;

        for info in workers.values() {
            if info.is_online(now, self.heartbeat_interval_ms) {
                online += 1;
                total_cpu += info.cpu_usage;
                total_mem += info.mem_usage;
            }
        }

        let (avg_cpu_usage, avg_mem_usage) = if online > 0 {
            (total_cpu / online as f64, total_mem / online as f64)
        } else {
            (0.0, 0.0)
        };

        WorkerStats {
            total,
            online,
            offline: total - online,
            avg_cpu_usage,
            avg_mem_usage,
        }
    }
}
