use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CronfleetError, Result};

/// System configuration shared by master and worker.
///
/// Sources are merged with precedence flags > environment > file > defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Etcd cluster endpoints.
    pub etcd_endpoints: Vec<String>,
    /// Etcd dial budget in milliseconds.
    pub etcd_dial_timeout: u64,

    /// Worker identity; falls back to the OS hostname when empty.
    pub worker_id: String,
    /// Heartbeat refresh period in milliseconds.
    pub heartbeat_interval: u64,
    /// Log sink flush threshold.
    pub log_batch_size: usize,
    /// Log sink commit timer period in milliseconds.
    pub log_commit_timeout: u64,
    /// Advisory cap on concurrent subprocess executions.
    pub executor_threads: usize,
    /// Lease TTL for `/cron/lock/*` keys, in seconds.
    pub job_lock_ttl: i64,
    /// Retention window for execution logs, in days.
    pub log_retention_days: i64,

    /// Master HTTP listen port.
    pub api_port: u16,
    /// MongoDB connection URI.
    pub mongo_uri: String,
    /// MongoDB connect budget in milliseconds.
    pub mongo_connect_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec!["localhost:2379".to_string()],
            etcd_dial_timeout: 5000,
            worker_id: String::new(),
            heartbeat_interval: 5000,
            log_batch_size: 100,
            log_commit_timeout: 1000,
            executor_threads: 10,
            job_lock_ttl: 5,
            log_retention_days: 30,
            api_port: 8070,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_connect_timeout: 5000,
        }
    }
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub etcd_endpoints: Option<String>,
    pub worker_id: Option<String>,
    pub api_port: Option<u16>,
    pub mongo_uri: Option<String>,
}

impl Config {
    /// Build the effective configuration from an optional file, the process
    /// environment, and command-line overrides.
    pub fn load(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.apply_overrides(overrides);

        if config.worker_id.is_empty() {
            config.worker_id = sysinfo::System::host_name().unwrap_or_else(|| "unknown".into());
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CronfleetError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            CronfleetError::Config(format!("cannot parse config file {}: {e}", path.display()))
        })
    }

    /// Apply environment overrides through a lookup function so the merge
    /// order is testable without touching process state.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(endpoints) = get("ETCD_ENDPOINTS") {
            self.etcd_endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(value) = get("ETCD_DIAL_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.etcd_dial_timeout = value;
        }
        if let Some(worker_id) = get("WORKER_ID") {
            self.worker_id = worker_id;
        }
        if let Some(value) = get("HEARTBEAT_INTERVAL").and_then(|v| v.parse().ok()) {
            self.heartbeat_interval = value;
        }
        if let Some(value) = get("LOG_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.log_batch_size = value;
        }
        if let Some(value) = get("LOG_COMMIT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.log_commit_timeout = value;
        }
        if let Some(value) = get("EXECUTOR_THREADS").and_then(|v| v.parse().ok()) {
            self.executor_threads = value;
        }
        if let Some(value) = get("JOB_LOCK_TTL").and_then(|v| v.parse().ok()) {
            self.job_lock_ttl = value;
        }
        if let Some(value) = get("LOG_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            self.log_retention_days = value;
        }
        if let Some(value) = get("API_PORT").and_then(|v| v.parse().ok()) {
            self.api_port = value;
        }
        if let Some(uri) = get("MONGO_URI") {
            self.mongo_uri = uri;
        }
        if let Some(value) = get("MONGO_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.mongo_connect_timeout = value;
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(endpoints) = &overrides.etcd_endpoints {
            self.etcd_endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(worker_id) = &overrides.worker_id {
            self.worker_id = worker_id.clone();
        }
        if let Some(port) = overrides.api_port {
            self.api_port = port;
        }
        if let Some(uri) = &overrides.mongo_uri {
            self.mongo_uri = uri.clone();
        }
    }

    /// Lease TTL for the worker registration, per heartbeat settings:
    /// `max(5s, 2 × heartbeatInterval)`.
    pub fn register_ttl_secs(&self) -> i64 {
        let ttl = (self.heartbeat_interval * 2 / 1000) as i64;
        ttl.max(5)
    }
}
