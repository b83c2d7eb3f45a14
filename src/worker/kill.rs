use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::{strip_prefix, KILL_KEY_PREFIX};
use crate::store::KvGateway;

/// Watch `/cron/kill/` and forward the job name of every marker that
/// appears to the scheduler's kill channel. Markers are short-lived leased
/// keys written by the master; their expiry (a Delete event) is ignored.
pub fn start_kill_watch(
    kv: KvGateway,
    kill_tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let (_watcher, mut stream) = match kv.watch_prefix(KILL_KEY_PREFIX).await {
            Ok(watch) => watch,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open kill watch");
                return;
            }
        };
        tracing::info!("Kill watcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = stream.message() => match msg {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            if event.event_type() != etcd_client::EventType::Put {
                                continue;
                            }
                            let Some(kv_pair) = event.kv() else { continue };
                            let key = String::from_utf8_lossy(kv_pair.key()).to_string();
                            let job_name = strip_prefix(&key, KILL_KEY_PREFIX).to_string();

                            tracing::info!(job_name = %job_name, "Kill marker observed");
                            if kill_tx.try_send(job_name).is_err() {
                                tracing::warn!("Kill channel full, request dropped");
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("Kill watch stream closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Kill watch stream failed");
                        break;
                    }
                },
            }
        }
    });
}
