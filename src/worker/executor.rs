use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};

use crate::model::{ExecuteInfo, ExecuteResult};

/// Capacity of the result channel. Senders block when it is full; results
/// are never dropped.
const RESULT_CHANNEL_CAPACITY: usize = 1000;

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs job commands as shell subprocesses, one task per execution.
///
/// Each execution captures stdout and stderr, honors the job's wall-clock
/// timeout, and reacts to its cancellation scope (kill requests). The
/// semaphore is an advisory cap on concurrent subprocesses.
#[derive(Clone)]
pub struct Executor {
    result_tx: mpsc::Sender<ExecuteResult>,
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(max_parallel: usize) -> (Self, mpsc::Receiver<ExecuteResult>) {
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let executor = Self {
            result_tx,
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
        };
        (executor, result_rx)
    }

    /// Spawn a task that runs the command and emits exactly one result,
    /// launch failures included.
    pub fn execute(&self, info: ExecuteInfo) {
        let result_tx = self.result_tx.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;

            let result = run_command(&info).await;

            if result.exit_code == 0 {
                tracing::info!(
                    job_name = %result.job_name,
                    duration_ms = (result.end_at - result.start_at).num_milliseconds(),
                    "Job executed successfully"
                );
            } else {
                tracing::warn!(
                    job_name = %result.job_name,
                    exit_code = result.exit_code,
                    timed_out = result.timed_out,
                    error = %result.error_text,
                    "Job execution failed"
                );
            }

            // Block rather than drop when the channel is full.
            if result_tx.send(result).await.is_err() {
                tracing::error!("Result channel closed, execution result lost");
            }
        });
    }

    /// Cancel the execution's scope; the subprocess is killed through it.
    /// Idempotent.
    pub fn kill(&self, job_name: &str, info: &ExecuteInfo) {
        info.cancel.cancel();
        tracing::info!(job_name, "Job kill requested");
    }
}

async fn run_command(info: &ExecuteInfo) -> ExecuteResult {
    let start_at = Utc::now();
    let mut result = ExecuteResult {
        job_name: info.job.name.clone(),
        output: String::new(),
        error_text: String::new(),
        start_at,
        end_at: start_at,
        exit_code: 0,
        timed_out: false,
    };

    let mut command = shell_command(&info.job.command);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            result.exit_code = -1;
            result.error_text = e.to_string();
            result.end_at = Utc::now();
            return result;
        }
    };

    // Drain both pipes concurrently so a chatty child cannot fill one and
    // stall on write while we wait for exit.
    let stdout_task = tokio::spawn(slurp(child.stdout.take()));
    let stderr_task = tokio::spawn(slurp(child.stderr.take()));

    let outcome = if info.job.timeout > 0 {
        tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = tokio::time::sleep(Duration::from_secs(info.job.timeout)) => WaitOutcome::TimedOut,
            _ = info.cancel.cancelled() => WaitOutcome::Cancelled,
        }
    } else {
        tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = info.cancel.cancelled() => WaitOutcome::Cancelled,
        }
    };

    result.output = stdout_task.await.unwrap_or_default();
    let stderr_output = stderr_task.await.unwrap_or_default();

    match outcome {
        WaitOutcome::Exited(Ok(status)) => {
            if status.success() {
                result.exit_code = 0;
            } else {
                result.exit_code = status.code().unwrap_or(-1);
                result.error_text = if stderr_output.is_empty() {
                    format!("exit status {}", result.exit_code)
                } else {
                    stderr_output
                };
            }
        }
        WaitOutcome::Exited(Err(e)) => {
            result.exit_code = -1;
            result.error_text = e.to_string();
        }
        WaitOutcome::TimedOut => {
            let _ = child.kill().await;
            result.timed_out = true;
            result.exit_code = -1;
            result.error_text = "job execution timed out".to_string();
        }
        WaitOutcome::Cancelled => {
            let _ = child.kill().await;
            result.exit_code = -1;
            result.error_text = "job execution cancelled".to_string();
        }
    }

    result.end_at = Utc::now();
    result
}

#[cfg(unix)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

async fn slurp<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).to_string()
}
