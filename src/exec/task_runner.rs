// src/exec/task_runner.rs

//! Individual task process runner.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::exec::backend::{BackendFailure, ProcessExecutorOptions, ResultSink};
use crate::types::{EndpointIdentity, Task};

/// Run a single task process and report its outcome on `sink`.
///
/// Stdout of a successful process is the result payload. A non-zero exit is
/// a failure whose raw form is the process's stderr.
pub async fn run_task(
    options: &ProcessExecutorOptions,
    identity: &EndpointIdentity,
    task: Task,
    sink: &ResultSink,
) {
    let task_id = task.task_id.clone();

    let outcome = match run_task_inner(options, identity, &task).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(task_id = %task_id, error = %err, "task execution error");
            Err(BackendFailure {
                summary: "failed to run task process".to_string(),
                raw: format!("{err:#}"),
            })
        }
    };

    if !sink.send(task_id.clone(), outcome) {
        debug!(task_id = %task_id, "result sink closed; dropping result");
    }
}

async fn run_task_inner(
    options: &ProcessExecutorOptions,
    identity: &EndpointIdentity,
    task: &Task,
) -> Result<std::result::Result<String, BackendFailure>> {
    info!(
        task_id = %task.task_id,
        cmd = %options.cmd,
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&options.cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&options.cmd);
        c
    };

    cmd.env("TASK_ID", &task.task_id)
        .env("ENDPOINT_ID", &identity.endpoint_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.task_id))?;

    // Feed stdin from a separate task so a chatty process can't deadlock us.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = task.function_payload.clone();
        let task_id = task.task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                debug!(task_id = %task_id, error = %e, "failed to write task payload to stdin");
            }
        });
    }

    let wait = child.wait_with_output();
    let output = match options.task_timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(res) => res,
            Err(_) => {
                warn!(
                    task_id = %task.task_id,
                    timeout_secs = limit.as_secs_f64(),
                    "task exceeded its timeout; process killed"
                );
                return Ok(Err(BackendFailure {
                    summary: format!("task exceeded timeout of {:.1}s", limit.as_secs_f64()),
                    raw: format!("process killed after {limit:?}"),
                }));
            }
        },
        None => wait.await,
    }
    .with_context(|| format!("waiting for process of task '{}'", task.task_id))?;

    let code = output.status.code().unwrap_or(-1);
    info!(
        task_id = %task.task_id,
        exit_code = code,
        success = output.status.success(),
        "task process exited"
    );

    if output.status.success() {
        Ok(Ok(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        Ok(Err(BackendFailure {
            summary: format!("task process exited with status {code}"),
            raw: String::from_utf8_lossy(&output.stderr).into_owned(),
        }))
    }
}
