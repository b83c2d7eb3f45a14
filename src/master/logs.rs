use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{CronfleetError, Result};
use crate::model::JobLog;
use crate::store::LogStore;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_STATS_DAYS: i64 = 7;

/// Validated pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub page_size: i64,
}

impl Pagination {
    /// Clamp raw request values: `page >= 1`, `pageSize` in
    /// `[1, MAX_PAGE_SIZE]` with non-positive values replaced by the
    /// default.
    pub fn clamp(page: i64, page_size: i64) -> Self {
        let page = if page <= 0 { DEFAULT_PAGE } else { page as u64 };
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };
        Self { page, page_size }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1) * self.page_size as u64
    }
}

/// Aggregated execution statistics over a trailing window.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub total_count: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub timeout_count: usize,
    pub avg_duration_seconds: f64,
    pub period_days: i64,
}

impl LogStatistics {
    /// Fold a set of records into counters. Success is `exitCode == 0`;
    /// timeouts also count as failures.
    pub fn aggregate(logs: &[JobLog], period_days: i64) -> Self {
        let mut success_count = 0;
        let mut fail_count = 0;
        let mut timeout_count = 0;
        let mut total_duration = 0i64;

        for log in logs {
            if log.exit_code == 0 {
                success_count += 1;
            } else {
                fail_count += 1;
            }
            if log.timed_out {
                timeout_count += 1;
            }
            total_duration += log.end_at - log.start_at;
        }

        let avg_duration_seconds = if logs.is_empty() {
            0.0
        } else {
            total_duration as f64 / logs.len() as f64
        };

        Self {
            total_count: logs.len(),
            success_count,
            fail_count,
            timeout_count,
            avg_duration_seconds,
            period_days,
        }
    }
}

/// Master-side query surface over the log store: pagination, latest-log
/// lookup, statistics, and retention.
#[derive(Clone)]
pub struct LogManager {
    store: LogStore,
}

impl LogManager {
    pub fn new(store: LogStore) -> Self {
        Self { store }
    }

    /// Paginated listing, newest first. Empty `job_name` means all jobs.
    /// Returns the page of records and the unpaginated total.
    pub async fn list(&self, job_name: &str, page: i64, page_size: i64) -> Result<(Vec<JobLog>, u64)> {
        let window = Pagination::clamp(page, page_size);

        let logs = self
            .store
            .find_logs(job_name, window.skip(), window.page_size)
            .await?;
        let total = self.store.count_logs(job_name).await?;

        Ok((logs, total))
    }

    /// Most recent record for a job.
    pub async fn latest(&self, job_name: &str) -> Result<JobLog> {
        let logs = self.store.find_logs(job_name, 0, 1).await?;
        logs.into_iter()
            .next()
            .ok_or_else(|| CronfleetError::JobNotFound(job_name.to_string()))
    }

    /// Aggregate statistics for executions started in the last `days` days.
    pub async fn statistics(&self, job_name: &str, days: i64) -> Result<LogStatistics> {
        let days = if days > 0 { days } else { DEFAULT_STATS_DAYS };
        let since = (Utc::now() - chrono::Duration::days(days)).timestamp();

        let logs = self.store.find_logs_since(job_name, since).await?;
        Ok(LogStatistics::aggregate(&logs, days))
    }

    /// Delete records older than the retention window; returns the count
    /// removed.
    pub async fn clean_expired(&self, retention_days: i64) -> Result<u64> {
        let retention_days = if retention_days > 0 { retention_days } else { 30 };
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);

        let deleted = self.store.delete_before(cutoff.timestamp()).await?;
        if deleted > 0 {
            tracing::info!(retention_days, deleted, "Cleaned expired logs");
        }
        Ok(deleted)
    }

    /// Daily retention sweep on the master side.
    pub fn start_cleaner(&self, retention_days: i64, shutdown: CancellationToken) {
        let manager = self.clone();

        tokio::spawn(async move {
            tracing::info!(retention_days, "Log cleaner started");
            let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Log cleaner stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = manager.clean_expired(retention_days).await {
                            tracing::error!(error = %e, "Periodic log cleaning failed");
                        }
                    }
                }
            }
        });
    }
}
