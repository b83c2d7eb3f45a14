use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Etcd namespace for job definitions.
pub const JOB_KEY_PREFIX: &str = "/cron/jobs/";
/// Etcd namespace for per-job dispatch locks.
pub const LOCK_KEY_PREFIX: &str = "/cron/lock/";
/// Etcd namespace for kill requests. Kept separate from the lock namespace
/// so a worker can tell "someone holds the lock" apart from "terminate this
/// job".
pub const KILL_KEY_PREFIX: &str = "/cron/kill/";
/// Etcd namespace for worker liveness records.
pub const WORKER_KEY_PREFIX: &str = "/cron/workers/";

/// TTL for kill markers, in seconds.
pub const KILL_MARKER_TTL: i64 = 5;

/// MongoDB collection holding execution logs.
pub const LOG_COLLECTION: &str = "job_logs";
/// MongoDB database name.
pub const LOG_DATABASE: &str = "cron";

/// Default timeout applied by the API layer when a job does not carry one.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 60;

pub fn job_key(name: &str) -> String {
    format!("{JOB_KEY_PREFIX}{name}")
}

pub fn lock_key(name: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{name}")
}

pub fn kill_key(name: &str) -> String {
    format!("{KILL_KEY_PREFIX}{name}")
}

pub fn worker_key(id: &str) -> String {
    format!("{WORKER_KEY_PREFIX}{id}")
}

/// Strip a namespace prefix from an etcd key, yielding the job or worker name.
pub fn strip_prefix<'a>(key: &'a str, prefix: &str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}

/// A cron job definition, persisted as JSON at `/cron/jobs/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique, immutable identifier.
    pub name: String,
    /// Shell command line, evaluated through the platform shell.
    pub command: String,
    /// Six-field cron expression with seconds precision.
    pub cron_expr: String,
    /// Wall-clock budget in seconds; 0 means unbounded.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Job {
    /// Check the fields the registry requires before persisting. Cron
    /// expression syntax is validated separately by the caller.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.is_empty() {
            return Err(crate::error::CronfleetError::InvalidJob(
                "job name is required".into(),
            ));
        }
        if self.command.is_empty() {
            return Err(crate::error::CronfleetError::InvalidJob(
                "job command is required".into(),
            ));
        }
        if self.cron_expr.is_empty() {
            return Err(crate::error::CronfleetError::InvalidJob(
                "job cron expression is required".into(),
            ));
        }
        Ok(())
    }
}

/// Kind of change observed on the job namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    Save,
    Delete,
}

/// In-memory job change event, produced by the worker job cache from watch
/// deltas and consumed once by the scheduler.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
}

/// State of one in-flight execution on this worker, keyed by job name.
/// At most one exists per job name at any instant.
#[derive(Debug, Clone)]
pub struct ExecuteInfo {
    pub job: Job,
    /// The fire instant the plan was due at.
    pub planned_fire_at: DateTime<Utc>,
    /// When the scheduler actually dispatched the execution.
    pub dispatch_at: DateTime<Utc>,
    /// Cancelling this token terminates the subprocess.
    pub cancel: CancellationToken,
}

/// Outcome of one subprocess run, sent from the executor to the scheduler.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub job_name: String,
    pub output: String,
    pub error_text: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub exit_code: i32,
    pub timed_out: bool,
}

/// A committed execution record. Never mutated after insert; removed only by
/// the retention sweep. All timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLog {
    pub job_name: String,
    pub command: String,
    pub output: String,
    pub error_text: String,
    pub planned_fire_at: i64,
    pub actual_dispatch_at: i64,
    pub start_at: i64,
    pub end_at: i64,
    pub exit_code: i32,
    pub timed_out: bool,
    pub worker_id: String,
}

impl JobLog {
    /// Denormalize an execution result with its dispatch context.
    pub fn from_result(result: &ExecuteResult, info: &ExecuteInfo, worker_id: &str) -> Self {
        Self {
            job_name: result.job_name.clone(),
            command: info.job.command.clone(),
            output: result.output.clone(),
            error_text: result.error_text.clone(),
            planned_fire_at: info.planned_fire_at.timestamp(),
            actual_dispatch_at: info.dispatch_at.timestamp(),
            start_at: result.start_at.timestamp(),
            end_at: result.end_at.timestamp(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            worker_id: worker_id.to_string(),
        }
    }
}

/// A worker's liveness record, persisted under a lease at
/// `/cron/workers/<id>` and refreshed on every heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub id: String,
    pub hostname: String,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub last_seen_ms: i64,
}

impl WorkerInfo {
    /// A worker is considered online while its last heartbeat is within
    /// three heartbeat periods of `now`.
    pub fn is_online(&self, now: DateTime<Utc>, heartbeat_interval_ms: u64) -> bool {
        let age_ms = now.timestamp_millis() - self.last_seen_ms;
        age_ms <= 3 * heartbeat_interval_ms as i64
    }
}
