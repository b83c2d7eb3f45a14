use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{CronfleetError, Result};
use crate::model::{ExecuteInfo, ExecuteResult, Job, JobEvent, JobEventKind, JobLog};
use crate::store::KvGateway;
use crate::worker::executor::Executor;
use crate::worker::lock::JobLock;
use crate::worker::logsink::LogSink;

/// Scheduler wakeup period.
const TICK_PERIOD: Duration = Duration::from_millis(100);

/// How long shutdown waits for outstanding execution results.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One enabled job's schedule state: its compiled cron expression and the
/// next instant it is due.
pub struct SchedulePlan {
    pub job: Job,
    schedule: Schedule,
    pub next_fire_at: DateTime<Utc>,
}

impl SchedulePlan {
    pub fn new(job: Job) -> Result<Self> {
        let schedule =
            Schedule::from_str(&job.cron_expr).map_err(|e| CronfleetError::InvalidCronExpr {
                job: job.name.clone(),
                expr: job.cron_expr.clone(),
                source: e,
            })?;

        let next_fire_at = schedule.after(&Utc::now()).next().ok_or_else(|| {
            CronfleetError::InvalidJob(format!(
                "cron expression {:?} yields no future fire times",
                job.cron_expr
            ))
        })?;

        Ok(Self {
            job,
            schedule,
            next_fire_at,
        })
    }

    /// Move the plan past `now`. Many elapsed fire instants collapse into
    /// one: the next fire is computed from `now`, not from the missed one.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.next_fire_at = self
            .schedule
            .after(&now)
            .next()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

/// The scheduler's plan table: enabled jobs with parseable cron expressions.
/// Owned by the scheduler loop; no locking needed.
#[derive(Default)]
pub struct PlanTable {
    plans: HashMap<String, SchedulePlan>,
}

impl PlanTable {
    /// Seed the table from a job snapshot. Disabled and unparseable jobs
    /// are skipped.
    pub fn load(jobs: Vec<Job>) -> Self {
        let mut table = Self::default();
        for job in jobs {
            table.apply_event(JobEvent {
                kind: JobEventKind::Save,
                job,
            });
        }
        table
    }

    pub fn apply_event(&mut self, event: JobEvent) {
        let name = event.job.name.clone();
        match event.kind {
            JobEventKind::Save => {
                if event.job.disabled {
                    if self.plans.remove(&name).is_some() {
                        tracing::info!(job_name = %name, "Job disabled, removed from schedule");
                    }
                    return;
                }
                match SchedulePlan::new(event.job) {
                    Ok(plan) => {
                        tracing::info!(
                            job_name = %name,
                            next_fire_at = %plan.next_fire_at,
                            "Job scheduled"
                        );
                        self.plans.insert(name, plan);
                    }
                    Err(e) => {
                        tracing::error!(job_name = %name, error = %e, "Failed to plan job");
                        self.plans.remove(&name);
                    }
                }
            }
            JobEventKind::Delete => {
                if self.plans.remove(&name).is_some() {
                    tracing::info!(job_name = %name, "Job removed from schedule");
                }
            }
        }
    }

    /// Names of plans due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        self.plans
            .iter()
            .filter(|(_, plan)| plan.next_fire_at <= now)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn advance(&mut self, name: &str, now: DateTime<Utc>) {
        if let Some(plan) = self.plans.get_mut(name) {
            plan.advance(now);
        }
    }

    pub fn get(&self, name: &str) -> Option<&SchedulePlan> {
        self.plans.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plans.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// The worker's scheduling loop.
///
/// A single task selects over job events, execution results, kill requests,
/// and a 100 ms tick. Due plans race for the distributed lock; winners
/// dispatch to the executor and release the lock immediately (the lock
/// serializes the decision to start, not the run).
pub struct Scheduler {
    kv: KvGateway,
    executor: Executor,
    sink: LogSink,
    plans: PlanTable,
    executing: HashMap<String, ExecuteInfo>,
    event_rx: mpsc::Receiver<JobEvent>,
    result_rx: mpsc::Receiver<ExecuteResult>,
    kill_rx: mpsc::Receiver<String>,
    worker_id: String,
    lock_ttl: i64,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: KvGateway,
        executor: Executor,
        sink: LogSink,
        initial_jobs: Vec<Job>,
        event_rx: mpsc::Receiver<JobEvent>,
        result_rx: mpsc::Receiver<ExecuteResult>,
        kill_rx: mpsc::Receiver<String>,
        config: &Config,
    ) -> Self {
        let plans = PlanTable::load(initial_jobs);
        tracing::info!(count = plans.len(), "Scheduler starting with initial plans");

        Self {
            kv,
            executor,
            sink,
            plans,
            executing: HashMap::new(),
            event_rx,
            result_rx,
            kill_rx,
            worker_id: config.worker_id.clone(),
            lock_ttl: config.job_lock_ttl,
        }
    }

    /// Run until the shutdown token fires, then drain outstanding results
    /// for a bounded grace period. In-flight subprocesses are not aborted.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(TICK_PERIOD);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = self.event_rx.recv() => self.plans.apply_event(event),
                Some(result) = self.result_rx.recv() => self.handle_result(result),
                Some(job_name) = self.kill_rx.recv() => self.handle_kill(&job_name),
                _ = tick.tick() => self.try_schedule().await,
            }
        }

        self.drain().await;
        tracing::info!("Scheduler stopped");
    }

    async fn try_schedule(&mut self) {
        let now = Utc::now();
        for name in self.plans.due(now) {
            self.try_start(&name).await;
            self.plans.advance(&name, now);
        }
    }

    /// Attempt to dispatch one due plan. Local in-flight entries and remote
    /// lock holders both cause a silent skip; contention resolves at the
    /// next tick.
    async fn try_start(&mut self, name: &str) {
        if self.executing.contains_key(name) {
            tracing::debug!(job_name = %name, "Job still executing, skipping fire");
            return;
        }

        let Some(plan) = self.plans.get(name) else {
            return;
        };
        let job = plan.job.clone();
        let planned_fire_at = plan.next_fire_at;

        let mut lock = JobLock::new(self.kv.clone(), name, self.lock_ttl);
        match lock.try_lock().await {
            Ok(()) => {}
            Err(e) if e.is_contention() => {
                tracing::debug!(job_name = %name, "Lock held elsewhere, skipping fire");
                return;
            }
            Err(e) => {
                tracing::warn!(job_name = %name, error = %e, "Lock acquisition failed");
                return;
            }
        }

        let info = ExecuteInfo {
            job,
            planned_fire_at,
            dispatch_at: Utc::now(),
            cancel: CancellationToken::new(),
        };

        tracing::info!(
            job_name = %name,
            planned_fire_at = %info.planned_fire_at,
            dispatch_at = %info.dispatch_at,
            "Job dispatched"
        );

        self.executing.insert(name.to_string(), info.clone());
        self.executor.execute(info);

        // Dispatch-level lock: released as soon as the start decision is
        // made so a crashed worker cannot pin the job for a full TTL.
        lock.unlock().await;
    }

    fn handle_result(&mut self, result: ExecuteResult) {
        tracing::info!(
            job_name = %result.job_name,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            "Job execution finished"
        );

        // Deleted jobs may still deliver a result; it is logged like any
        // other.
        match self.executing.remove(&result.job_name) {
            Some(info) => {
                let log = JobLog::from_result(&result, &info, &self.worker_id);
                self.sink.append(log);
            }
            None => {
                tracing::warn!(
                    job_name = %result.job_name,
                    "Result without matching in-flight entry"
                );
            }
        }
    }

    fn handle_kill(&mut self, job_name: &str) {
        match self.executing.get(job_name) {
            Some(info) => self.executor.kill(job_name, info),
            None => {
                // Expected: the master broadcasts kills to every worker.
                tracing::debug!(job_name, "Kill request for job not running here");
            }
        }
    }

    /// Wait up to the grace period for results of in-flight executions so
    /// their logs reach the sink before exit.
    async fn drain(&mut self) {
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;

        while !self.executing.is_empty() {
            match tokio::time::timeout_at(deadline, self.result_rx.recv()).await {
                Ok(Some(result)) => self.handle_result(result),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        outstanding = self.executing.len(),
                        "Drain grace period elapsed with executions outstanding"
                    );
                    break;
                }
            }
        }
    }
}
