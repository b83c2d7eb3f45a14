//! Worker-side scheduling and execution.
//!
//! Each worker mirrors the job set from etcd, schedules due jobs locally,
//! and races the rest of the fleet for a per-job dispatch lock so every
//! fire instant executes at most once cluster-wide:
//!
//! - [`cache::JobCache`]: mirrors `/cron/jobs/` and emits change events
//! - [`register::Register`]: leased liveness record plus heartbeat loop
//! - [`lock::JobLock`]: CAS-backed distributed lock with lease renewal
//! - [`executor::Executor`]: shell subprocesses with timeout and kill scopes
//! - [`scheduler::Scheduler`]: the single-threaded plan/dispatch loop
//! - [`logsink::LogSink`]: batched commit of execution records to MongoDB
//! - [`kill`]: `/cron/kill/` watch feeding the scheduler's kill channel

pub mod cache;
pub mod executor;
pub mod kill;
pub mod lock;
pub mod logsink;
pub mod register;
pub mod scheduler;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::store::{KvGateway, LogStore};

/// Capacity of the kill-request channel.
const KILL_CHANNEL_CAPACITY: usize = 64;

/// Wire up and run a worker until the shutdown token fires.
///
/// Connection failures at startup are fatal and propagate; once running,
/// transient failures are retried on the next tick or heartbeat.
pub async fn run_worker(config: Config, shutdown: CancellationToken) -> Result<()> {
    let kv = KvGateway::connect(&config.etcd_endpoints, config.etcd_dial_timeout).await?;
    let store = LogStore::connect(&config.mongo_uri, config.mongo_connect_timeout).await?;

    let (job_cache, event_rx) = cache::JobCache::new(kv.clone()).await?;
    job_cache.start_watch(shutdown.clone());

    register::Register::new(kv.clone(), &config)
        .start(shutdown.clone())
        .await?;

    let (job_executor, result_rx) = executor::Executor::new(config.executor_threads);

    let (sink, sink_handle) = logsink::LogSink::start(
        store.clone(),
        config.log_batch_size,
        config.log_commit_timeout,
        shutdown.clone(),
    );
    let cleaner_handle =
        logsink::start_log_cleaner(store, config.log_retention_days, shutdown.clone());

    let (kill_tx, kill_rx) = mpsc::channel(KILL_CHANNEL_CAPACITY);
    kill::start_kill_watch(kv.clone(), kill_tx, shutdown.clone());

    tracing::info!(
        worker_id = %config.worker_id,
        etcd_endpoints = ?config.etcd_endpoints,
        "Worker started"
    );

    scheduler::Scheduler::new(
        kv,
        job_executor,
        sink,
        job_cache.list(),
        event_rx,
        result_rx,
        kill_rx,
        &config,
    )
    .run(shutdown)
    .await;

    // The sink drains and flushes once the token is cancelled; wait for it
    // so buffered logs reach the store before exit.
    let _ = sink_handle.await;
    cleaner_handle.abort();

    tracing::info!("Worker shutdown complete");
    Ok(())
}
