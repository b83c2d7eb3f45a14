use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{strip_prefix, Job, JobEvent, JobEventKind, JOB_KEY_PREFIX};
use crate::store::KvGateway;

/// Capacity of the job-event channel. When full, events are dropped with a
/// warning; the etcd snapshot remains the source of truth.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Each worker's mirror of the job set under `/cron/jobs/`.
///
/// Construction performs a full prefix scan; `start_watch` then follows the
/// etcd watch stream, keeping the map current and pushing save/delete events
/// to the scheduler.
#[derive(Clone)]
pub struct JobCache {
    kv: KvGateway,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    event_tx: mpsc::Sender<JobEvent>,
}

impl JobCache {
    pub async fn new(kv: KvGateway) -> Result<(Self, mpsc::Receiver<JobEvent>)> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut jobs = HashMap::new();
        for (key, value) in kv.get_prefix(JOB_KEY_PREFIX).await? {
            match serde_json::from_slice::<Job>(&value) {
                Ok(job) => {
                    jobs.insert(job.name.clone(), job);
                }
                Err(e) => {
                    tracing::error!(key, error = %e, "Skipping undecodable job definition");
                }
            }
        }
        tracing::info!(count = jobs.len(), "Jobs loaded into cache");

        let cache = Self {
            kv,
            jobs: Arc::new(RwLock::new(jobs)),
            event_tx,
        };

        Ok((cache, event_rx))
    }

    /// Spawn the watch task. Events arrive in etcd commit order; decode
    /// failures skip the offending delta.
    pub fn start_watch(&self, shutdown: CancellationToken) {
        let cache = self.clone();

        tokio::spawn(async move {
            let (_watcher, mut stream) = match cache.kv.watch_prefix(JOB_KEY_PREFIX).await {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to open job watch");
                    return;
                }
            };
            tracing::info!("Job watcher started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = stream.message() => match msg {
                        Ok(Some(resp)) => {
                            for event in resp.events() {
                                cache.handle_watch_event(event);
                            }
                        }
                        Ok(None) => {
                            tracing::warn!("Job watch stream closed");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Job watch stream failed");
                            break;
                        }
                    },
                }
            }
        });
    }

    fn handle_watch_event(&self, event: &etcd_client::Event) {
        let Some(kv) = event.kv() else { return };
        let key = String::from_utf8_lossy(kv.key()).to_string();
        let name = strip_prefix(&key, JOB_KEY_PREFIX).to_string();

        let job_event = match event.event_type() {
            etcd_client::EventType::Put => match serde_json::from_slice::<Job>(kv.value()) {
                Ok(job) => {
                    self.jobs.write().insert(job.name.clone(), job.clone());
                    tracing::info!(job_name = %job.name, "Job saved");
                    JobEvent {
                        kind: JobEventKind::Save,
                        job,
                    }
                }
                Err(e) => {
                    tracing::error!(job_name = %name, error = %e, "Failed to decode job from watch");
                    return;
                }
            },
            etcd_client::EventType::Delete => {
                // The delete delta carries no value; emit the cached copy.
                let Some(job) = self.jobs.write().remove(&name) else {
                    return;
                };
                tracing::info!(job_name = %name, "Job deleted");
                JobEvent {
                    kind: JobEventKind::Delete,
                    job,
                }
            }
        };

        if let Err(e) = self.event_tx.try_send(job_event) {
            tracing::warn!(error = %e, "Job event channel full, dropping event");
        }
    }

    pub fn get(&self, name: &str) -> Option<Job> {
        self.jobs.read().get(name).cloned()
    }

    /// Snapshot of all cached jobs.
    pub fn list(&self) -> Vec<Job> {
        self.jobs.read().values().cloned().collect()
    }
}
