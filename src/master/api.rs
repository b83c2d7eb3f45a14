use std::net::SocketAddr;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{CronfleetError, Result};
use crate::master::jobs::JobRegistry;
use crate::master::logs::LogManager;
use crate::master::workers::WorkerRegistry;
use crate::model::Job;

pub const API_SUCCESS: i32 = 0;
pub const API_FAILURE: i32 = 1000;
pub const API_PARAM_ERROR: i32 = 1001;
pub const API_JOB_NOT_EXIST: i32 = 1002;
pub const API_SYSTEM_ERROR: i32 = 2000;

/// Uniform JSON envelope: `code` is 0 on success, nonzero otherwise.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub code: i32,
    pub message: String,
    pub data: serde_json::Value,
}

fn success(data: impl Serialize) -> Json<ApiResponse> {
    Json(ApiResponse {
        code: API_SUCCESS,
        message: "success".to_string(),
        data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
    })
}

fn failure(code: i32, message: impl Into<String>) -> Json<ApiResponse> {
    Json(ApiResponse {
        code,
        message: message.into(),
        data: serde_json::Value::Null,
    })
}

fn failure_from(err: CronfleetError) -> Json<ApiResponse> {
    let code = match &err {
        CronfleetError::JobNotFound(_) => API_JOB_NOT_EXIST,
        CronfleetError::InvalidJob(_) | CronfleetError::InvalidCronExpr { .. } => API_PARAM_ERROR,
        CronfleetError::Etcd { .. }
        | CronfleetError::EtcdTimeout { .. }
        | CronfleetError::Mongo { .. } => API_SYSTEM_ERROR,
        _ => API_FAILURE,
    };
    failure(code, err.to_string())
}

#[derive(Clone)]
pub struct ApiState {
    pub jobs: JobRegistry,
    pub workers: WorkerRegistry,
    pub logs: LogManager,
}

#[derive(Debug, Deserialize)]
struct KeywordQuery {
    #[serde(default)]
    keyword: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogListQuery {
    #[serde(default)]
    job_name: String,
    #[serde(default)]
    page: i64,
    #[serde(default)]
    page_size: i64,
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    #[serde(default)]
    days: i64,
}

#[derive(Debug, Serialize)]
struct LogPage {
    logs: Vec<crate::model::JobLog>,
    total: u64,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/job/save", post(save_job))
        .route("/api/v1/job/list", get(list_jobs))
        .route("/api/v1/job/running", get(running_jobs))
        .route("/api/v1/job/kill/:name", post(kill_job))
        .route("/api/v1/job/disable/:name", post(disable_job))
        .route("/api/v1/job/enable/:name", post(enable_job))
        .route("/api/v1/job/:name", get(get_job).delete(delete_job))
        .route("/api/v1/log/list", get(list_logs))
        .route("/api/v1/log/stats/:name", get(log_stats))
        .route("/api/v1/log/:name", get(latest_log))
        .route("/api/v1/worker/list", get(list_workers))
        .route("/api/v1/worker/stats", get(worker_stats))
        .layer(cors)
        .with_state(state)
}

/// Serve the control API until the shutdown token fires. Bind failures are
/// startup errors.
pub async fn serve(port: u16, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CronfleetError::Config(format!("cannot bind API port {port}: {e}")))?;

    tracing::info!(%addr, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| CronfleetError::Config(format!("API server failed: {e}")))?;

    Ok(())
}

async fn save_job(State(state): State<ApiState>, Json(job): Json<Job>) -> Json<ApiResponse> {
    match state.jobs.save(job).await {
        Ok(saved) => success(saved),
        Err(e) => failure_from(e),
    }
}

async fn delete_job(State(state): State<ApiState>, Path(name): Path<String>) -> Json<ApiResponse> {
    match state.jobs.delete(&name).await {
        Ok(()) => success(()),
        Err(e) => failure_from(e),
    }
}

async fn get_job(State(state): State<ApiState>, Path(name): Path<String>) -> Json<ApiResponse> {
    match state.jobs.get(&name).await {
        Ok(job) => success(job),
        Err(e) => failure_from(e),
    }
}

async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<KeywordQuery>,
) -> Json<ApiResponse> {
    match state.jobs.search(&query.keyword).await {
        Ok(jobs) => success(jobs),
        Err(e) => failure_from(e),
    }
}

async fn running_jobs(State(state): State<ApiState>) -> Json<ApiResponse> {
    match state.jobs.running().await {
        Ok(names) => success(names),
        Err(e) => failure_from(e),
    }
}

async fn kill_job(State(state): State<ApiState>, Path(name): Path<String>) -> Json<ApiResponse> {
    match state.jobs.request_kill(&name).await {
        Ok(()) => success(()),
        Err(e) => failure_from(e),
    }
}

async fn disable_job(State(state): State<ApiState>, Path(name): Path<String>) -> Json<ApiResponse> {
    match state.jobs.disable(&name).await {
        Ok(job) => success(job),
        Err(e) => failure_from(e),
    }
}

async fn enable_job(State(state): State<ApiState>, Path(name): Path<String>) -> Json<ApiResponse> {
    match state.jobs.enable(&name).await {
        Ok(job) => success(job),
        Err(e) => failure_from(e),
    }
}

async fn list_logs(
    State(state): State<ApiState>,
    Query(query): Query<LogListQuery>,
) -> Json<ApiResponse> {
    match state
        .logs
        .list(&query.job_name, query.page, query.page_size)
        .await
    {
        Ok((logs, total)) => success(LogPage { logs, total }),
        Err(e) => failure_from(e),
    }
}

async fn latest_log(State(state): State<ApiState>, Path(name): Path<String>) -> Json<ApiResponse> {
    match state.logs.latest(&name).await {
        Ok(log) => success(log),
        Err(e) => failure_from(e),
    }
}

async fn log_stats(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Json<ApiResponse> {
    match state.logs.statistics(&name, query.days).await {
        Ok(stats) => success(stats),
        Err(e) => failure_from(e),
    }
}

async fn list_workers(State(state): State<ApiState>) -> Json<ApiResponse> {
    success(state.workers.list().await)
}

async fn worker_stats(State(state): State<ApiState>) -> Json<ApiResponse> {
    success(state.workers.stats().await)
}
