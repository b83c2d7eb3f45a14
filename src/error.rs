use thiserror::Error;

#[derive(Error, Debug)]
pub enum CronfleetError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("lock for job {0} is already held")]
    LockAlreadyHeld(String),

    #[error("lock acquisition for job {0} timed out after {1:?}")]
    LockTimeout(String, std::time::Duration),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("invalid cron expression {expr:?} for job {job}: {source}")]
    InvalidCronExpr {
        job: String,
        expr: String,
        source: cron::error::Error,
    },

    #[error("etcd {op} failed for key {key:?}: {source}")]
    Etcd {
        op: &'static str,
        key: String,
        source: etcd_client::Error,
    },

    #[error("etcd {op} timed out for key {key:?}")]
    EtcdTimeout { op: &'static str, key: String },

    #[error("mongodb {op} failed: {source}")]
    Mongo {
        op: &'static str,
        source: mongodb::error::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl CronfleetError {
    /// Lock contention is an expected outcome of every scheduling tick;
    /// callers use this to decide between debug and warn logging.
    pub fn is_contention(&self) -> bool {
        matches!(self, CronfleetError::LockAlreadyHeld(_))
    }
}

pub type Result<T> = std::result::Result<T, CronfleetError>;
