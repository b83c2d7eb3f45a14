use chrono::{Duration, Utc};
use cronfleet::master::logs::{LogStatistics, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use cronfleet::model::{
    job_key, kill_key, lock_key, strip_prefix, worker_key, Job, JobLog, WorkerInfo,
    JOB_KEY_PREFIX,
};

fn test_job() -> Job {
    Job {
        name: "greet".to_string(),
        command: "echo hi".to_string(),
        cron_expr: "*/5 * * * * *".to_string(),
        timeout: 10,
        disabled: false,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_100,
    }
}

fn test_log(exit_code: i32, timed_out: bool, duration_secs: i64) -> JobLog {
    JobLog {
        job_name: "greet".to_string(),
        command: "echo hi".to_string(),
        output: String::new(),
        error_text: String::new(),
        planned_fire_at: 1000,
        actual_dispatch_at: 1000,
        start_at: 1000,
        end_at: 1000 + duration_secs,
        exit_code,
        timed_out,
        worker_id: "worker-1".to_string(),
    }
}

#[test]
fn job_serializes_camel_case() {
    let value = serde_json::to_value(test_job()).unwrap();
    let object = value.as_object().unwrap();

    assert!(object.contains_key("cronExpr"));
    assert!(object.contains_key("createdAt"));
    assert!(object.contains_key("updatedAt"));
    assert_eq!(object["name"], "greet");
}

#[test]
fn job_roundtrips_through_json() {
    let job = test_job();
    let encoded = serde_json::to_string(&job).unwrap();
    let decoded: Job = serde_json::from_str(&encoded).unwrap();
    assert_eq!(job, decoded);
}

#[test]
fn job_decodes_with_missing_optional_fields() {
    let decoded: Job = serde_json::from_str(
        r#"{"name": "n", "command": "c", "cronExpr": "* * * * * *"}"#,
    )
    .unwrap();

    assert_eq!(decoded.timeout, 0);
    assert!(!decoded.disabled);
    assert_eq!(decoded.created_at, 0);
}

#[test]
fn job_validation_requires_core_fields() {
    assert!(test_job().validate().is_ok());

    let mut job = test_job();
    job.name.clear();
    assert!(job.validate().is_err());

    let mut job = test_job();
    job.command.clear();
    assert!(job.validate().is_err());

    let mut job = test_job();
    job.cron_expr.clear();
    assert!(job.validate().is_err());
}

#[test]
fn job_log_uses_camel_case_field_names() {
    let value = serde_json::to_value(test_log(0, false, 1)).unwrap();
    let object = value.as_object().unwrap();

    for key in [
        "jobName",
        "command",
        "output",
        "errorText",
        "plannedFireAt",
        "actualDispatchAt",
        "startAt",
        "endAt",
        "exitCode",
        "timedOut",
        "workerId",
    ] {
        assert!(object.contains_key(key), "missing field {key}");
    }
}

#[test]
fn key_helpers_compose_and_strip() {
    assert_eq!(job_key("greet"), "/cron/jobs/greet");
    assert_eq!(lock_key("greet"), "/cron/lock/greet");
    assert_eq!(kill_key("greet"), "/cron/kill/greet");
    assert_eq!(worker_key("w1"), "/cron/workers/w1");

    assert_eq!(strip_prefix("/cron/jobs/greet", JOB_KEY_PREFIX), "greet");
    assert_eq!(strip_prefix("unrelated", JOB_KEY_PREFIX), "unrelated");
}

#[test]
fn worker_liveness_uses_three_heartbeats() {
    let now = Utc::now();
    let mut info = WorkerInfo {
        id: "w1".to_string(),
        hostname: "host".to_string(),
        cpu_usage: 0.0,
        mem_usage: 0.0,
        last_seen_ms: now.timestamp_millis(),
    };

    assert!(info.is_online(now, 5000));

    info.last_seen_ms = (now - Duration::seconds(14)).timestamp_millis();
    assert!(info.is_online(now, 5000));

    info.last_seen_ms = (now - Duration::seconds(16)).timestamp_millis();
    assert!(!info.is_online(now, 5000));
}

#[test]
fn pagination_clamps_boundaries() {
    assert_eq!(Pagination::clamp(0, 0), Pagination {
        page: 1,
        page_size: DEFAULT_PAGE_SIZE,
    });
    assert_eq!(Pagination::clamp(-3, -1), Pagination {
        page: 1,
        page_size: DEFAULT_PAGE_SIZE,
    });
    assert_eq!(Pagination::clamp(2, 500), Pagination {
        page: 2,
        page_size: MAX_PAGE_SIZE,
    });
    assert_eq!(Pagination::clamp(4, 20).skip(), 60);
    assert_eq!(Pagination::clamp(1, 20).skip(), 0);
}

#[test]
fn statistics_aggregate_counts_and_average() {
    let logs = vec![
        test_log(0, false, 1),
        test_log(0, false, 3),
        test_log(2, false, 2),
        test_log(-1, true, 10),
    ];

    let stats = LogStatistics::aggregate(&logs, 7);

    assert_eq!(stats.total_count, 4);
    assert_eq!(stats.success_count, 2);
    assert_eq!(stats.fail_count, 2);
    assert_eq!(stats.timeout_count, 1);
    assert_eq!(stats.avg_duration_seconds, 4.0);
    assert_eq!(stats.period_days, 7);
}

#[test]
fn statistics_of_nothing_are_zero() {
    let stats = LogStatistics::aggregate(&[], 7);

    assert_eq!(stats.total_count, 0);
    assert_eq!(stats.avg_duration_seconds, 0.0);
}
