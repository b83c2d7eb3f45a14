use std::time::Duration;

use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, IndexModel};

use crate::error::{CronfleetError, Result};
use crate::model::{JobLog, LOG_COLLECTION, LOG_DATABASE};

/// Append-only store for execution records, keyed by `(jobName, startAt)`
/// with a secondary order of `startAt` descending.
#[derive(Clone)]
pub struct LogStore {
    collection: Collection<JobLog>,
}

impl LogStore {
    /// Connect, verify the server with a ping, and ensure the
    /// `(jobName asc, startAt desc)` index exists.
    pub async fn connect(uri: &str, connect_timeout_ms: u64) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| op_err("parse_uri", e))?;
        options.connect_timeout = Some(Duration::from_millis(connect_timeout_ms));
        options.server_selection_timeout = Some(Duration::from_millis(connect_timeout_ms));

        let client = Client::with_options(options).map_err(|e| op_err("connect", e))?;
        let database = client.database(LOG_DATABASE);

        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| op_err("ping", e))?;

        let collection = database.collection::<JobLog>(LOG_COLLECTION);

        let index = IndexModel::builder()
            .keys(doc! { "jobName": 1, "startAt": -1 })
            .build();
        collection
            .create_index(index, None)
            .await
            .map_err(|e| op_err("create_index", e))?;

        Ok(Self { collection })
    }

    /// Bulk insert a batch of execution records.
    pub async fn insert_many(&self, logs: Vec<JobLog>) -> Result<usize> {
        let count = logs.len();
        self.collection
            .insert_many(logs, None)
            .await
            .map_err(|e| op_err("insert_many", e))?;
        Ok(count)
    }

    /// Fetch records ordered by `startAt` descending. An empty `job_name`
    /// matches all jobs.
    pub async fn find_logs(&self, job_name: &str, skip: u64, limit: i64) -> Result<Vec<JobLog>> {
        let options = FindOptions::builder()
            .sort(doc! { "startAt": -1 })
            .skip(skip)
            .limit(limit)
            .build();

        let cursor = self
            .collection
            .find(job_filter(job_name), options)
            .await
            .map_err(|e| op_err("find", e))?;

        cursor.try_collect().await.map_err(|e| op_err("find", e))
    }

    /// Fetch records with `startAt >= since`, newest first.
    pub async fn find_logs_since(&self, job_name: &str, since: i64) -> Result<Vec<JobLog>> {
        let mut filter = job_filter(job_name);
        filter.insert("startAt", doc! { "$gte": since });

        let options = FindOptions::builder().sort(doc! { "startAt": -1 }).build();
        let cursor = self
            .collection
            .find(filter, options)
            .await
            .map_err(|e| op_err("find_since", e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| op_err("find_since", e))
    }

    pub async fn count_logs(&self, job_name: &str) -> Result<u64> {
        self.collection
            .count_documents(job_filter(job_name), None)
            .await
            .map_err(|e| op_err("count", e))
    }

    /// Delete every record whose `endAt` predates `cutoff` (unix seconds).
    /// Returns the number of records removed.
    pub async fn delete_before(&self, cutoff: i64) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "endAt": { "$lt": cutoff } }, None)
            .await
            .map_err(|e| op_err("delete_before", e))?;
        Ok(result.deleted_count)
    }
}

fn job_filter(job_name: &str) -> Document {
    if job_name.is_empty() {
        doc! {}
    } else {
        doc! { "jobName": job_name }
    }
}

fn op_err(op: &'static str, source: mongodb::error::Error) -> CronfleetError {
    CronfleetError::Mongo { op, source }
}
