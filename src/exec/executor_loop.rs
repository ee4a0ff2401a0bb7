// src/exec/executor_loop.rs

//! Worker loop behind [`ProcessExecutor`](crate::exec::ProcessExecutor).

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::exec::backend::{ProcessExecutorOptions, ResultSink};
use crate::exec::task_runner::run_task;
use crate::types::{EndpointIdentity, Task};

/// Spawn the background executor loop.
///
/// The returned sender is the executor's submission queue. It is unbounded
/// so submitting never waits on running tasks; queued tasks wait for a
/// worker permit instead. Each task runs in its own Tokio task, and **at most
/// `max_workers` task processes run at the same time**. Aborting the returned
/// handle drops every running task, which kills their processes
/// (`kill_on_drop`).
pub fn spawn_executor(
    options: ProcessExecutorOptions,
    identity: EndpointIdentity,
    sink: ResultSink,
) -> (mpsc::UnboundedSender<Task>, JoinHandle<()>) {
    let workers = options.max_workers.max(1);
    let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

    let handle = tokio::spawn(async move {
        info!(label = %sink.label(), workers, "executor loop started");

        let permits = Arc::new(Semaphore::new(workers));
        let mut running: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                maybe_task = rx.recv() => {
                    let Some(task) = maybe_task else { break };

                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };

                    let options = options.clone();
                    let identity = identity.clone();
                    let sink = sink.clone();
                    running.spawn(async move {
                        let _permit = permit;
                        run_task(&options, &identity, task, &sink).await;
                    });
                }

                Some(joined) = running.join_next(), if !running.is_empty() => {
                    log_join(joined);
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            log_join(joined);
        }

        info!(label = %sink.label(), "executor loop finished (queue closed)");
    });

    (tx, handle)
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Ok(()) => debug!("task runner future finished"),
        Err(e) => warn!(error = %e, "task runner did not finish cleanly"),
    }
}
