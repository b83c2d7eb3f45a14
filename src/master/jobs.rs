use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;

use crate::error::{CronfleetError, Result};
use crate::model::{
    job_key, kill_key, strip_prefix, Job, JOB_KEY_PREFIX, KILL_MARKER_TTL, LOCK_KEY_PREFIX,
};
use crate::store::KvGateway;

/// Master-side CRUD over job definitions in etcd.
///
/// Writes are last-writer-wins; the registry is an admin surface, not a
/// transactional store.
#[derive(Clone)]
pub struct JobRegistry {
    kv: KvGateway,
}

impl JobRegistry {
    pub fn new(kv: KvGateway) -> Self {
        Self { kv }
    }

    /// Validate, stamp timestamps, and persist a job definition. Returns
    /// the stamped job.
    pub async fn save(&self, mut job: Job) -> Result<Job> {
        job.validate()?;
        Schedule::from_str(&job.cron_expr).map_err(|e| CronfleetError::InvalidCronExpr {
            job: job.name.clone(),
            expr: job.cron_expr.clone(),
            source: e,
        })?;

        let now = Utc::now().timestamp();
        if job.created_at == 0 {
            job.created_at = now;
        }
        job.updated_at = now;

        let data = serde_json::to_string(&job)?;
        self.kv.put(&job_key(&job.name), &data).await?;

        tracing::info!(job_name = %job.name, "Job saved");
        Ok(job)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let deleted = self.kv.delete(&job_key(name)).await?;
        if deleted == 0 {
            return Err(CronfleetError::JobNotFound(name.to_string()));
        }

        tracing::info!(job_name = %name, "Job deleted");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Job> {
        let Some((value, _)) = self.kv.get(&job_key(name)).await? else {
            return Err(CronfleetError::JobNotFound(name.to_string()));
        };
        Ok(serde_json::from_slice(&value)?)
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        let pairs = self.kv.get_prefix(JOB_KEY_PREFIX).await?;

        let mut jobs = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match serde_json::from_slice::<Job>(&value) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::error!(key, error = %e, "Skipping undecodable job definition");
                }
            }
        }
        Ok(jobs)
    }

    /// Case-insensitive substring match against job name or command.
    /// An empty keyword returns everything.
    pub async fn search(&self, keyword: &str) -> Result<Vec<Job>> {
        let jobs = self.list().await?;
        if keyword.is_empty() {
            return Ok(jobs);
        }

        let needle = keyword.to_lowercase();
        Ok(jobs
            .into_iter()
            .filter(|job| {
                job.name.to_lowercase().contains(&needle)
                    || job.command.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub async fn disable(&self, name: &str) -> Result<Job> {
        self.set_disabled(name, true).await
    }

    pub async fn enable(&self, name: &str) -> Result<Job> {
        self.set_disabled(name, false).await
    }

    async fn set_disabled(&self, name: &str, disabled: bool) -> Result<Job> {
        let mut job = self.get(name).await?;
        job.disabled = disabled;
        self.save(job).await
    }

    /// Publish a short-lived kill marker at `/cron/kill/<name>`. Workers
    /// watching that namespace cancel any matching in-flight execution.
    pub async fn request_kill(&self, name: &str) -> Result<()> {
        self.kv
            .put_with_lease(&kill_key(name), "", KILL_MARKER_TTL)
            .await?;

        tracing::info!(job_name = %name, "Kill marker created");
        Ok(())
    }

    /// Names of jobs whose dispatch lock is currently held somewhere in the
    /// fleet. Dispatch locks are short-lived, so this is a best-effort view
    /// of what is starting right now.
    pub async fn running(&self) -> Result<Vec<String>> {
        let pairs = self.kv.get_prefix(LOCK_KEY_PREFIX).await?;
        Ok(pairs
            .into_iter()
            .map(|(key, _)| strip_prefix(&key, LOCK_KEY_PREFIX).to_string())
            .collect())
    }
}
