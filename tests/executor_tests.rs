use chrono::Utc;
use cronfleet::model::{ExecuteInfo, Job};
use cronfleet::worker::executor::Executor;
use tokio_util::sync::CancellationToken;

fn test_job(name: &str, command: &str, timeout: u64) -> Job {
    Job {
        name: name.to_string(),
        command: command.to_string(),
        cron_expr: "* * * * * *".to_string(),
        timeout,
        disabled: false,
        created_at: 0,
        updated_at: 0,
    }
}

fn test_info(job: Job) -> ExecuteInfo {
    let now = Utc::now();
    ExecuteInfo {
        job,
        planned_fire_at: now,
        dispatch_at: now,
        cancel: CancellationToken::new(),
    }
}

#[tokio::test]
async fn execute_simple_command() {
    let (executor, mut results) = Executor::new(4);

    executor.execute(test_info(test_job("greet", "echo hello", 0)));
    let result = results.recv().await.unwrap();

    assert_eq!(result.job_name, "greet");
    assert_eq!(result.output, "hello\n");
    assert_eq!(result.exit_code, 0);
    assert!(!result.timed_out);
    assert!(result.error_text.is_empty());
}

#[tokio::test]
async fn execute_nonzero_exit_captures_code() {
    let (executor, mut results) = Executor::new(4);

    executor.execute(test_info(test_job("fail", "exit 3", 0)));
    let result = results.recv().await.unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.timed_out);
    assert!(!result.error_text.is_empty());
}

#[tokio::test]
async fn execute_failure_reports_stderr() {
    let (executor, mut results) = Executor::new(4);

    executor.execute(test_info(test_job(
        "stderr",
        "echo 'boom' >&2 && exit 1",
        0,
    )));
    let result = results.recv().await.unwrap();

    assert_eq!(result.exit_code, 1);
    assert!(result.error_text.contains("boom"));
    assert!(result.output.is_empty());
}

#[tokio::test]
async fn execute_missing_command_still_emits_result() {
    let (executor, mut results) = Executor::new(4);

    executor.execute(test_info(test_job("missing", "nonexistent_command_12345", 0)));
    let result = results.recv().await.unwrap();

    assert_ne!(result.exit_code, 0);
    assert!(!result.error_text.is_empty());
}

#[tokio::test]
async fn execute_timeout_kills_subprocess() {
    let (executor, mut results) = Executor::new(4);

    executor.execute(test_info(test_job("slow", "sleep 5", 1)));
    let result = results.recv().await.unwrap();

    assert!(result.timed_out);
    assert_eq!(result.exit_code, -1);
    assert_eq!(result.error_text, "job execution timed out");

    let duration = (result.end_at - result.start_at).num_seconds();
    assert!(duration >= 1, "duration was {duration}s");
    assert!(duration < 3, "duration was {duration}s");
}

#[tokio::test]
async fn kill_cancels_running_execution() {
    let (executor, mut results) = Executor::new(4);

    let info = test_info(test_job("long", "sleep 30", 60));
    executor.execute(info.clone());

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    executor.kill("long", &info);
    // Repeated kills are safe.
    executor.kill("long", &info);

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), results.recv())
        .await
        .expect("result should arrive promptly after kill")
        .unwrap();

    assert_eq!(result.exit_code, -1);
    assert!(!result.timed_out);

    let duration = (result.end_at - result.start_at).num_seconds();
    assert!(duration < 5, "duration was {duration}s");
}

#[tokio::test]
async fn concurrent_executions_all_report() {
    let (executor, mut results) = Executor::new(2);

    for i in 0..3 {
        executor.execute(test_info(test_job(&format!("job{i}"), "echo ok", 0)));
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let result = results.recv().await.unwrap();
        assert_eq!(result.exit_code, 0);
        seen.push(result.job_name);
    }
    seen.sort();
    assert_eq!(seen, vec!["job0", "job1", "job2"]);
}
