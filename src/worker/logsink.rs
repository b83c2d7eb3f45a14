use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::JobLog;
use crate::store::LogStore;

/// Capacity of the ingress channel. `append` drops when it is full: log
/// completeness is traded for the scheduler's liveness.
const INGRESS_CHANNEL_CAPACITY: usize = 1000;

/// Local hour at which the daily retention sweep runs.
const SWEEP_HOUR: u32 = 3;

/// Accumulates execution records until the batch reaches capacity.
/// The time-based trigger lives in the sink loop.
pub struct LogBatch {
    entries: Vec<JobLog>,
    capacity: usize,
}

impl LogBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a record; returns true once the batch is due for a flush.
    pub fn push(&mut self, log: JobLog) -> bool {
        self.entries.push(log);
        self.entries.len() >= self.capacity
    }

    pub fn take(&mut self) -> Vec<JobLog> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cheap handle for feeding execution records to the sink task.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<JobLog>,
}

impl LogSink {
    /// Spawn the sink task. It batches inbound records and commits them
    /// when the batch fills or the commit timer fires; on shutdown it
    /// drains the channel and flushes what remains.
    pub fn start(
        store: LogStore,
        batch_size: usize,
        commit_timeout_ms: u64,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INGRESS_CHANNEL_CAPACITY);
        let handle = tokio::spawn(sink_loop(store, rx, batch_size, commit_timeout_ms, shutdown));
        (Self { tx }, handle)
    }

    /// Nonblocking enqueue. A full channel drops the record with a warning.
    pub fn append(&self, log: JobLog) {
        if let Err(e) = self.tx.try_send(log) {
            match e {
                mpsc::error::TrySendError::Full(log) => {
                    tracing::warn!(
                        job_name = %log.job_name,
                        start_at = log.start_at,
                        "Log channel full, record discarded"
                    );
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::warn!("Log sink stopped, record discarded");
                }
            }
        }
    }
}

async fn sink_loop(
    store: LogStore,
    mut rx: mpsc::Receiver<JobLog>,
    batch_size: usize,
    commit_timeout_ms: u64,
    shutdown: CancellationToken,
) {
    let mut batch = LogBatch::new(batch_size);
    let mut timer = tokio::time::interval(Duration::from_millis(commit_timeout_ms.max(1)));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(log) = rx.recv() => {
                if batch.push(log) {
                    flush(&store, &mut batch).await;
                    timer.reset();
                }
            }
            _ = timer.tick() => {
                if !batch.is_empty() {
                    flush(&store, &mut batch).await;
                }
            }
        }
    }

    // Final synchronous flush: whatever is already queued goes out,
    // best-effort.
    while let Ok(log) = rx.try_recv() {
        if batch.push(log) {
            flush(&store, &mut batch).await;
        }
    }
    flush(&store, &mut batch).await;

    tracing::info!("Log sink stopped");
}

/// Commit the batch. Failures are logged and the batch discarded; the sink
/// prefers forward progress over redelivery.
async fn flush(store: &LogStore, batch: &mut LogBatch) {
    if batch.is_empty() {
        return;
    }

    let logs = batch.take();
    let count = logs.len();
    match store.insert_many(logs).await {
        Ok(_) => tracing::info!(count, "Committed execution logs"),
        Err(e) => tracing::error!(count, error = %e, "Failed to commit execution logs"),
    }
}

/// Spawn the daily retention sweep: once immediately, then every day at
/// 03:00 local time.
pub fn start_log_cleaner(
    store: LogStore,
    retention_days: i64,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(retention_days, "Log cleaner started");
        clean_expired(&store, retention_days).await;

        loop {
            let pause = until_next_sweep(Local::now());
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Log cleaner stopped");
                    return;
                }
                _ = tokio::time::sleep(pause) => clean_expired(&store, retention_days).await,
            }
        }
    })
}

/// Delete records whose `endAt` is older than the retention window.
pub async fn clean_expired(store: &LogStore, retention_days: i64) {
    let retention_days = if retention_days > 0 { retention_days } else { 30 };
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);

    match store.delete_before(cutoff.timestamp()).await {
        Ok(deleted) if deleted > 0 => {
            tracing::info!(retention_days, deleted, "Cleaned expired logs");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(retention_days, error = %e, "Failed to clean expired logs");
        }
    }
}

fn until_next_sweep(now: DateTime<Local>) -> Duration {
    let day = Duration::from_secs(24 * 60 * 60);

    let Some(today) = now.date_naive().and_hms_opt(SWEEP_HOUR, 0, 0) else {
        return day;
    };
    let mut target = today;
    if now.naive_local() >= target {
        target = target + chrono::Duration::days(1);
    }

    let target = match Local.from_local_datetime(&target) {
        chrono::LocalResult::Single(t) => t,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => return day,
    };

    (target - now).to_std().unwrap_or(day)
}
