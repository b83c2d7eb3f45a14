use cronfleet::model::JobLog;
use cronfleet::worker::logsink::LogBatch;

fn test_log(job_name: &str) -> JobLog {
    JobLog {
        job_name: job_name.to_string(),
        command: "echo hi".to_string(),
        output: "hi\n".to_string(),
        error_text: String::new(),
        planned_fire_at: 100,
        actual_dispatch_at: 100,
        start_at: 100,
        end_at: 101,
        exit_code: 0,
        timed_out: false,
        worker_id: "worker-1".to_string(),
    }
}

#[test]
fn push_signals_flush_at_capacity() {
    let mut batch = LogBatch::new(3);

    assert!(!batch.push(test_log("a")));
    assert!(!batch.push(test_log("b")));
    assert!(batch.push(test_log("c")));
    assert_eq!(batch.len(), 3);
}

#[test]
fn take_drains_the_batch() {
    let mut batch = LogBatch::new(10);
    batch.push(test_log("a"));
    batch.push(test_log("b"));

    let drained = batch.take();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].job_name, "a");
    assert!(batch.is_empty());

    // Refilling after a drain starts a fresh batch.
    assert!(!batch.push(test_log("c")));
    assert_eq!(batch.len(), 1);
}

#[test]
fn zero_capacity_still_accepts_records() {
    let mut batch = LogBatch::new(0);
    // Degenerate config clamps to a batch of one.
    assert!(batch.push(test_log("a")));
}

#[test]
fn over_capacity_keeps_signalling() {
    let mut batch = LogBatch::new(2);
    batch.push(test_log("a"));
    assert!(batch.push(test_log("b")));
    // Caller missed the flush; the next push still reports full.
    assert!(batch.push(test_log("c")));
    assert_eq!(batch.len(), 3);
}
